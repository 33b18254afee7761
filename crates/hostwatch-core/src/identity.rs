//! Host identification for alert payloads

use std::net::UdpSocket;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Instance metadata service endpoint
pub const EC2_METADATA_URL: &str = "http://169.254.169.254/latest";

const UNKNOWN: &str = "unknown";

/// EC2 instance metadata, when running on AWS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ec2Info {
    /// e.g. `i-0abc123`
    pub instance_id: Option<String>,
    /// e.g. `t3.micro`
    pub instance_type: Option<String>,
    /// e.g. `us-east-1a`
    pub availability_zone: Option<String>,
    /// Derived from the availability zone
    pub region: Option<String>,
}

impl Ec2Info {
    /// Whether the metadata service told us nothing
    pub fn is_empty(&self) -> bool {
        self.instance_id.is_none()
            && self.instance_type.is_none()
            && self.availability_zone.is_none()
    }
}

/// Who is sending the alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    /// Host name
    pub hostname: String,
    /// Primary (outbound) IPv4 address
    pub ip_address: String,
    /// EC2 metadata, when lookup is enabled and succeeded
    pub ec2: Option<Ec2Info>,
}

impl HostIdentity {
    /// Identity with explicit values
    pub fn new(hostname: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip_address: ip_address.into(),
            ec2: None,
        }
    }

    /// Detect the local host, optionally querying EC2 metadata
    pub async fn detect(ec2_metadata: bool) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| UNKNOWN.to_string());
        let ip_address = primary_ip().unwrap_or_else(|| UNKNOWN.to_string());

        let ec2 = if ec2_metadata {
            match Ec2MetadataClient::new(EC2_METADATA_URL) {
                Ok(client) => Some(client.fetch().await).filter(|info| !info.is_empty()),
                Err(e) => {
                    debug!(error = %e, "Could not build EC2 metadata client");
                    None
                }
            }
        } else {
            None
        };

        Self {
            hostname,
            ip_address,
            ec2,
        }
    }

    /// Human-readable server name used in alert messages
    pub fn server_id(&self) -> String {
        match self.ec2.as_ref().and_then(|ec2| ec2.instance_id.as_deref()) {
            Some(instance_id) => format!("{} ({instance_id})", self.hostname),
            None => self.hostname.clone(),
        }
    }
}

/// Address the kernel would use for outbound traffic
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn primary_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

/// Minimal IMDS client (IMDSv2 token, falling back to IMDSv1)
pub struct Ec2MetadataClient {
    client: Client,
    base_url: String,
}

impl Ec2MetadataClient {
    /// Create a client against a metadata endpoint
    pub fn new(base_url: impl Into<String>) -> crate::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(2)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch what the metadata service will tell us; unreachable fields stay `None`
    pub async fn fetch(&self) -> Ec2Info {
        let token = self.token().await;

        let instance_id = self.get("meta-data/instance-id", token.as_deref()).await;
        let instance_type = self.get("meta-data/instance-type", token.as_deref()).await;
        let availability_zone = self
            .get("meta-data/placement/availability-zone", token.as_deref())
            .await;

        // us-east-1a -> us-east-1
        let region = availability_zone
            .as_deref()
            .and_then(|az| az.get(..az.len().saturating_sub(1)))
            .filter(|region| !region.is_empty())
            .map(String::from);

        Ec2Info {
            instance_id,
            instance_type,
            availability_zone,
            region,
        }
    }

    async fn token(&self) -> Option<String> {
        let response = self
            .client
            .put(format!("{}/api/token", self.base_url))
            .header("X-aws-ec2-metadata-token-ttl-seconds", "21600")
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "IMDSv2 token unavailable, using IMDSv1");
            return None;
        }
        response.text().await.ok()
    }

    async fn get(&self, path: &str, token: Option<&str>) -> Option<String> {
        let mut request = self.client.get(format!("{}/{path}", self.base_url));
        if let Some(token) = token {
            request = request.header("X-aws-ec2-metadata-token", token);
        }

        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok().map(|body| body.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_server_id_prefers_instance_id() {
        let mut identity = HostIdentity::new("web-1", "10.0.0.5");
        assert_eq!(identity.server_id(), "web-1");

        identity.ec2 = Some(Ec2Info {
            instance_id: Some("i-0abc".to_string()),
            ..Ec2Info::default()
        });
        assert_eq!(identity.server_id(), "web-1 (i-0abc)");
    }

    #[tokio::test]
    async fn test_fetch_with_imdsv2_token() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("tok"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/instance-id"))
            .and(header("X-aws-ec2-metadata-token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("i-0abc"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/placement/availability-zone"))
            .respond_with(ResponseTemplate::new(200).set_body_string("eu-west-1b"))
            .mount(&server)
            .await;

        let client = Ec2MetadataClient::new(format!("{}/latest", server.uri())).unwrap();
        let info = client.fetch().await;

        assert_eq!(info.instance_id.as_deref(), Some("i-0abc"));
        assert_eq!(info.instance_type, None);
        assert_eq!(info.availability_zone.as_deref(), Some("eu-west-1b"));
        assert_eq!(info.region.as_deref(), Some("eu-west-1"));
    }

    #[tokio::test]
    async fn test_fetch_off_ec2_is_empty() {
        let server = MockServer::start().await;
        let client = Ec2MetadataClient::new(format!("{}/latest", server.uri())).unwrap();

        assert!(client.fetch().await.is_empty());
    }
}
