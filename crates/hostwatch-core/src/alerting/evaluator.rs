//! Sustained-threshold evaluation engine
//!
//! The evaluator is a pure function of prior state, the current samples, and
//! the current time. It owns every breach/recovery/cooldown transition; I/O
//! lives in the store, dispatcher and coordinator.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::models::{AlertEvent, BreachState, BreachStatus, EngineState, MetricKey, MetricKind, MetricSample};

/// Thresholds and timing windows applied by the evaluator
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// CPU threshold (percent)
    pub cpu: f64,
    /// Memory threshold (percent)
    pub memory: f64,
    /// Disk threshold (percent), applied to every partition
    pub disk: f64,
    /// Continuous breach time required before alerting
    pub sustain: Duration,
    /// Minimum time between alerts for one key
    pub cooldown: Duration,
}

impl Thresholds {
    /// Threshold for a resource kind
    pub fn for_kind(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Disk => self.disk,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: 90.0,
            memory: 90.0,
            disk: 90.0,
            sustain: Duration::minutes(15),
            cooldown: Duration::hours(3),
        }
    }
}

/// Result of one evaluation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// State after applying the samples
    pub state: EngineState,
    /// Alerts to deliver, ordered by metric key
    pub alerts: Vec<AlertEvent>,
}

/// Applies samples to breach state and decides which alerts fire
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    thresholds: Thresholds,
}

impl ThresholdEvaluator {
    /// Create a new evaluator
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in effect
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Evaluate a snapshot against prior state
    ///
    /// Keys without a sample are left exactly as they were. If a key appears
    /// more than once, the last sample wins.
    pub fn evaluate(
        &self,
        prior: EngineState,
        samples: &[MetricSample],
        now: DateTime<Utc>,
    ) -> Evaluation {
        let mut latest: BTreeMap<&MetricKey, &MetricSample> = BTreeMap::new();
        for sample in samples {
            if !sample.value.is_finite() {
                warn!(key = %sample.key, value = sample.value, "Ignoring non-finite sample");
                continue;
            }
            latest.insert(&sample.key, sample);
        }

        let mut state = prior;
        let mut alerts = Vec::new();

        for (key, sample) in latest {
            let threshold = self.thresholds.for_kind(key.kind());
            let record = state.entry(key.clone());

            if let Some(alert) = self.step(key, record, sample, threshold, now) {
                alerts.push(alert);
            }
        }

        Evaluation { state, alerts }
    }

    /// Apply one sample to one record
    fn step(
        &self,
        key: &MetricKey,
        record: &mut BreachState,
        sample: &MetricSample,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        if sample.value < threshold {
            if record.status != BreachStatus::Normal {
                debug!(key = %key, value = sample.value, threshold, "Metric returned to normal");
            }
            record.recover();
            return None;
        }

        let started_at = match (record.status, record.breach_started_at) {
            (BreachStatus::Breaching | BreachStatus::Alerted, Some(started_at)) => started_at,
            _ => {
                debug!(key = %key, value = sample.value, threshold, "Threshold breached, starting timer");
                record.status = BreachStatus::Breaching;
                record.breach_started_at = Some(now);
                now
            }
        };

        if now - started_at < self.thresholds.sustain {
            return None;
        }

        let cooled_down = record
            .last_alert_sent_at
            .map_or(true, |last| now - last >= self.thresholds.cooldown);

        if !cooled_down {
            if record.status == BreachStatus::Breaching {
                debug!(key = %key, "Sustained breach suppressed by cooldown");
            }
            record.status = BreachStatus::Alerted;
            return None;
        }

        record.status = BreachStatus::Alerted;
        record.last_alert_sent_at = Some(now);

        info!(
            key = %key,
            value = sample.value,
            threshold,
            breach_started_at = %started_at,
            "Sustained breach, alert triggered"
        );

        Some(AlertEvent {
            key: key.clone(),
            kind: key.kind(),
            label: key.partition().map(String::from),
            current_value: sample.value,
            threshold,
            triggered_at: now,
            synthetic: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    fn evaluator() -> ThresholdEvaluator {
        ThresholdEvaluator::new(Thresholds::default())
    }

    /// Feed `value` for `key` once per minute over `[from, to]`, returning
    /// the minutes at which alerts fired
    fn feed(
        evaluator: &ThresholdEvaluator,
        state: &mut EngineState,
        sample: impl Fn(f64) -> MetricSample,
        value: f64,
        from: i64,
        to: i64,
    ) -> Vec<i64> {
        let mut fired = Vec::new();
        for minute in from..=to {
            let evaluation = evaluator.evaluate(std::mem::take(state), &[sample(value)], at(minute));
            *state = evaluation.state;
            if !evaluation.alerts.is_empty() {
                fired.push(minute);
            }
        }
        fired
    }

    #[rstest]
    #[case::normal_below(BreachStatus::Normal, None, None, 50.0, BreachStatus::Normal, false)]
    #[case::normal_at_threshold(BreachStatus::Normal, None, None, 90.0, BreachStatus::Breaching, false)]
    #[case::breaching_accumulating(BreachStatus::Breaching, Some(-10), None, 95.0, BreachStatus::Breaching, false)]
    #[case::breaching_sustained(BreachStatus::Breaching, Some(-15), None, 95.0, BreachStatus::Alerted, true)]
    #[case::breaching_sustained_in_cooldown(BreachStatus::Breaching, Some(-15), Some(-60), 95.0, BreachStatus::Alerted, false)]
    #[case::breaching_sustained_cooldown_over(BreachStatus::Breaching, Some(-15), Some(-180), 95.0, BreachStatus::Alerted, true)]
    #[case::alerted_in_cooldown(BreachStatus::Alerted, Some(-100), Some(-85), 95.0, BreachStatus::Alerted, false)]
    #[case::alerted_rearms(BreachStatus::Alerted, Some(-300), Some(-180), 95.0, BreachStatus::Alerted, true)]
    #[case::alerted_recovers(BreachStatus::Alerted, Some(-30), Some(-15), 10.0, BreachStatus::Normal, false)]
    #[case::breaching_recovers(BreachStatus::Breaching, Some(-5), None, 89.9, BreachStatus::Normal, false)]
    fn test_transitions(
        #[case] status: BreachStatus,
        #[case] started: Option<i64>,
        #[case] last_alert: Option<i64>,
        #[case] value: f64,
        #[case] expected: BreachStatus,
        #[case] fires: bool,
    ) {
        let now = at(1000);
        let prior: EngineState = [(
            MetricKey::Cpu,
            BreachState {
                status,
                breach_started_at: started.map(|m| now + Duration::minutes(m)),
                last_alert_sent_at: last_alert.map(|m| now + Duration::minutes(m)),
            },
        )]
        .into_iter()
        .collect();

        let evaluation = evaluator().evaluate(prior, &[MetricSample::cpu(value)], now);
        let record = evaluation.state.get(&MetricKey::Cpu).unwrap();

        assert_eq!(record.status, expected);
        assert_eq!(evaluation.alerts.len(), usize::from(fires));
        assert!(record.is_consistent());
        if fires {
            assert_eq!(record.last_alert_sent_at, Some(now));
        } else {
            assert_eq!(record.last_alert_sent_at, last_alert.map(|m| now + Duration::minutes(m)));
        }
    }

    #[test]
    fn test_fires_once_at_exact_sustain_boundary() {
        let evaluator = evaluator();
        let mut state = EngineState::new();

        let fired = feed(&evaluator, &mut state, MetricSample::cpu, 95.0, 0, 15);

        assert_eq!(fired, vec![15]);
        assert_eq!(state.get(&MetricKey::Cpu).unwrap().status, BreachStatus::Alerted);
    }

    #[test]
    fn test_cooldown_scenario() {
        let evaluator = evaluator();
        let mut state = EngineState::new();

        // alert at 15, then 180 minutes of suppression, then re-fire
        let fired = feed(&evaluator, &mut state, MetricSample::cpu, 95.0, 0, 194);
        assert_eq!(fired, vec![15]);

        let fired = feed(&evaluator, &mut state, MetricSample::cpu, 95.0, 195, 200);
        assert_eq!(fired, vec![195]);
    }

    #[test]
    fn test_recovery_restarts_sustain_timer() {
        let evaluator = evaluator();
        let mut state = EngineState::new();

        assert!(feed(&evaluator, &mut state, MetricSample::cpu, 95.0, 0, 9).is_empty());
        assert!(feed(&evaluator, &mut state, MetricSample::cpu, 50.0, 10, 10).is_empty());
        assert!(state.get(&MetricKey::Cpu).unwrap().breach_started_at.is_none());

        let fired = feed(&evaluator, &mut state, MetricSample::cpu, 95.0, 11, 40);
        assert_eq!(fired, vec![26]);
    }

    #[test]
    fn test_cooldown_spans_recovery() {
        let evaluator = evaluator();
        let mut state = EngineState::new();

        assert_eq!(feed(&evaluator, &mut state, MetricSample::memory, 97.0, 0, 15), vec![15]);
        feed(&evaluator, &mut state, MetricSample::memory, 20.0, 16, 16);

        // a fresh sustained episode inside the cooldown stays silent
        let fired = feed(&evaluator, &mut state, MetricSample::memory, 97.0, 17, 194);
        assert!(fired.is_empty());
        assert_eq!(state.get(&MetricKey::Memory).unwrap().status, BreachStatus::Alerted);

        assert_eq!(feed(&evaluator, &mut state, MetricSample::memory, 97.0, 195, 195), vec![195]);
    }

    #[test]
    fn test_absent_keys_are_untouched() {
        let evaluator = evaluator();
        let mut state = EngineState::new();
        feed(&evaluator, &mut state, |v| MetricSample::disk("/mnt/backup", v), 99.0, 0, 5);
        let before = state.get(&MetricKey::disk("/mnt/backup")).cloned();

        let evaluation = evaluator.evaluate(state, &[MetricSample::cpu(10.0)], at(30));

        assert_eq!(evaluation.state.get(&MetricKey::disk("/mnt/backup")).cloned(), before);
        assert!(evaluation.alerts.is_empty());
    }

    #[test]
    fn test_partitions_alert_independently_in_key_order() {
        let evaluator = evaluator();
        let mut state = EngineState::new();
        let samples = [MetricSample::disk("/var", 96.0), MetricSample::disk("/", 93.0)];

        for minute in 0..15 {
            let evaluation = evaluator.evaluate(state, &samples, at(minute));
            assert!(evaluation.alerts.is_empty());
            state = evaluation.state;
        }
        let evaluation = evaluator.evaluate(state, &samples, at(15));

        let keys: Vec<_> = evaluation.alerts.iter().map(|a| a.key.clone()).collect();
        assert_eq!(keys, vec![MetricKey::disk("/"), MetricKey::disk("/var")]);
        assert_eq!(evaluation.alerts[1].label.as_deref(), Some("/var"));
        assert_eq!(evaluation.alerts[1].kind, MetricKind::Disk);
        assert_eq!(evaluation.state.len(), 2);
    }

    #[test]
    fn test_non_finite_sample_is_skipped() {
        let evaluation = evaluator().evaluate(EngineState::new(), &[MetricSample::cpu(f64::NAN)], at(0));
        assert!(evaluation.state.is_empty());
    }

    #[test]
    fn test_zero_sustain_fires_on_first_breach() {
        let evaluator = ThresholdEvaluator::new(Thresholds {
            sustain: Duration::zero(),
            ..Thresholds::default()
        });

        let evaluation = evaluator.evaluate(EngineState::new(), &[MetricSample::cpu(91.0)], at(0));
        assert_eq!(evaluation.alerts.len(), 1);
    }

    fn arb_sample() -> impl Strategy<Value = MetricSample> {
        prop_oneof![
            (0.0..100.0f64).prop_map(MetricSample::cpu),
            (0.0..100.0f64).prop_map(MetricSample::memory),
            (0.0..100.0f64).prop_map(|v| MetricSample::disk("/", v)),
            (0.0..100.0f64).prop_map(|v| MetricSample::disk("/var", v)),
        ]
    }

    proptest! {
        #[test]
        fn prop_status_matches_timer_and_cooldown_holds(
            steps in prop::collection::vec(
                (prop::collection::vec(arb_sample(), 0..4), 0i64..90),
                1..200,
            )
        ) {
            let evaluator = ThresholdEvaluator::new(Thresholds {
                cpu: 50.0,
                memory: 50.0,
                disk: 50.0,
                ..Thresholds::default()
            });
            let mut state = EngineState::new();
            let mut now = t0();
            let mut last_fired: BTreeMap<MetricKey, DateTime<Utc>> = BTreeMap::new();

            for (samples, advance) in steps {
                now += Duration::minutes(advance);
                let evaluation = evaluator.evaluate(state, &samples, now);
                state = evaluation.state;

                for (_, record) in state.iter() {
                    prop_assert!(record.is_consistent());
                }
                for alert in &evaluation.alerts {
                    if let Some(previous) = last_fired.insert(alert.key.clone(), alert.triggered_at) {
                        prop_assert!(alert.triggered_at - previous >= evaluator.thresholds().cooldown);
                    }
                }
                let keys: Vec<_> = evaluation.alerts.iter().map(|a| &a.key).collect();
                prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
