//! EC2 Query API client adapter
//!
//! The single choke point for every EC2 call. Requests are form-encoded
//! Query API actions signed with Signature Version 4; AWS error codes map
//! into the taxonomy here and nowhere else. Exactly one attempt per call,
//! no retries.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2016-11-15";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "content-type;host;x-amz-date";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

// =============================================================================
// Signing
// =============================================================================

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("HMAC key setup failed: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the SigV4 `Authorization` header for a form-encoded POST to `/`
pub(super) fn sign_request(
    access_key_id: &str,
    secret_access_key: &str,
    region: &str,
    host: &str,
    amz_date: &str,
    body: &str,
) -> Result<String> {
    let date = &amz_date[..8];
    let scope = format!("{}/{}/ec2/aws4_request", date, region);

    let canonical = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\nx-amz-date:{}\n\n{}\n{}",
        CONTENT_TYPE,
        host,
        amz_date,
        SIGNED_HEADERS,
        sha256_hex(body.as_bytes())
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical.as_bytes())
    );

    let k_date = hmac_sha256(
        format!("AWS4{}", secret_access_key).as_bytes(),
        date.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, b"ec2")?;
    let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, access_key_id, scope, SIGNED_HEADERS, signature
    ))
}

fn host_of(endpoint: &str) -> Result<String> {
    let stripped = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint);
    let host = stripped.split('/').next().unwrap_or("");
    if host.is_empty() {
        Err(Error::Configuration(format!(
            "malformed EC2 endpoint: {}",
            endpoint
        )))
    } else {
        Ok(host.to_string())
    }
}

// =============================================================================
// Error mapping
// =============================================================================

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Errors", default)]
    errors: ErrorList,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorList {
    #[serde(rename = "Error", default)]
    errors: Vec<Ec2Error>,
}

#[derive(Debug, Deserialize)]
struct Ec2Error {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

/// Fixed AWS error-code table; anything unmapped becomes the caller-supplied
/// fallback error
fn map_error<F>(code: &str, message: String, fallback: F) -> Error
where
    F: FnOnce(String) -> Error,
{
    match code {
        "AuthFailure" | "InvalidClientTokenId" | "SignatureDoesNotMatch"
        | "MissingAuthenticationToken" => Error::Authentication(message),
        "UnauthorizedOperation" | "OptInRequired" => Error::Authorization(message),
        _ if code.ends_with(".NotFound") => Error::not_found("ec2", message),
        _ if code.starts_with("IncorrectState")
            || code.starts_with("IncorrectInstanceState")
            || code == "VolumeInUse" =>
        {
            Error::ResourceState {
                state: code.to_string(),
                reason: message,
            }
        }
        _ => fallback(message),
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Raw HTTP leg of a Query API exchange; mockable in tests
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// POST the signed form body; returns the HTTP status and response body
    async fn send(&self, headers: Vec<(String, String)>, body: String) -> Result<(u16, String)>;
}

/// reqwest-backed transport. The timeout is fixed at construction.
pub struct HttpsTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpsTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl QueryTransport for HttpsTransport {
    async fn send(&self, headers: Vec<(String, String)>, body: String) -> Result<(u16, String)> {
        let mut request = self.client.post(&self.endpoint).body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok((status, body))
    }
}

// =============================================================================
// Client
// =============================================================================

/// EC2 Query API client
pub struct Ec2Client {
    transport: Arc<dyn QueryTransport>,
    host: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
}

impl Ec2Client {
    pub fn new(
        transport: Arc<dyn QueryTransport>,
        endpoint: &str,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            host: host_of(endpoint)?,
            region: region.to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        })
    }

    /// Execute one Query API action. On success returns the response XML.
    pub async fn call<F>(
        &self,
        action: &str,
        params: &[(String, String)],
        fallback: F,
    ) -> Result<String>
    where
        F: FnOnce(String) -> Error,
    {
        trace!(action, "ec2 call");
        let mut sorted: BTreeMap<&str, &str> = BTreeMap::new();
        sorted.insert("Action", action);
        sorted.insert("Version", API_VERSION);
        for (key, value) in params {
            sorted.insert(key, value);
        }
        let body = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let authorization = sign_request(
            &self.access_key_id,
            &self.secret_access_key,
            &self.region,
            &self.host,
            &amz_date,
            &body,
        )?;
        let headers = vec![
            ("Content-Type".to_string(), CONTENT_TYPE.to_string()),
            ("Host".to_string(), self.host.clone()),
            ("X-Amz-Date".to_string(), amz_date),
            ("Authorization".to_string(), authorization),
        ];

        let (status, response) = self.transport.send(headers, body).await?;
        if (200..300).contains(&status) {
            debug!(action, "ec2 ok");
            return Ok(response);
        }

        match quick_xml::de::from_str::<ErrorResponse>(&response) {
            Ok(parsed) => match parsed.errors.errors.into_iter().next() {
                Some(e) => Err(map_error(&e.code, e.message, fallback)),
                None => Err(Error::Connection(format!("HTTP {} from {}", status, action))),
            },
            Err(_) => Err(Error::Connection(format!("HTTP {} from {}", status, action))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    #[test]
    fn test_signature_is_deterministic_and_well_formed() {
        let auth = sign_request(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI",
            "eu-west-1",
            "ec2.eu-west-1.amazonaws.com",
            "20260828T120000Z",
            "Action=DescribeInstances&Version=2016-11-15",
        )
        .unwrap();

        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260828/eu-west-1/ec2/aws4_request"));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date"));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        let again = sign_request(
            "AKIDEXAMPLE",
            "wJalrXUtnFEMI",
            "eu-west-1",
            "ec2.eu-west-1.amazonaws.com",
            "20260828T120000Z",
            "Action=DescribeInstances&Version=2016-11-15",
        )
        .unwrap();
        assert_eq!(auth, again);
    }

    #[test]
    fn test_signature_changes_with_body() {
        let a = sign_request("k", "s", "r", "h", "20260828T120000Z", "Action=A").unwrap();
        let b = sign_request("k", "s", "r", "h", "20260828T120000Z", "Action=B").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://ec2.eu-west-1.amazonaws.com").unwrap(),
            "ec2.eu-west-1.amazonaws.com"
        );
        assert_eq!(host_of("http://localhost:8788/services/Eucalyptus").unwrap(), "localhost:8788");
        assert_matches!(host_of("https://"), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_error_code_table() {
        assert_matches!(
            map_error("AuthFailure", "bad keys".into(), Error::ResourceRetrieval),
            Error::Authentication(_)
        );
        assert_matches!(
            map_error("UnauthorizedOperation", "no".into(), Error::ResourceRetrieval),
            Error::Authorization(_)
        );
        assert_matches!(
            map_error("InvalidInstanceID.NotFound", "i-1".into(), Error::ResourceRetrieval),
            Error::ResourceNotFound { .. }
        );
        assert_matches!(
            map_error("IncorrectInstanceState", "stopped".into(), Error::ResourceRetrieval),
            Error::ResourceState { .. }
        );
        assert_matches!(
            map_error("DryRunOperation", "dry".into(), Error::ResourceCreation),
            Error::ResourceCreation(_)
        );
    }

    struct CannedTransport {
        responses: Mutex<Vec<(u16, String)>>,
        requests: Mutex<Vec<(Vec<(String, String)>, String)>>,
    }

    #[async_trait]
    impl QueryTransport for CannedTransport {
        async fn send(&self, headers: Vec<(String, String)>, body: String) -> Result<(u16, String)> {
            self.requests.lock().push((headers, body));
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| Error::Connection("no canned response".into()))
        }
    }

    fn client(responses: Vec<(u16, &str)>) -> (Arc<CannedTransport>, Ec2Client) {
        let transport = Arc::new(CannedTransport {
            responses: Mutex::new(
                responses.into_iter().rev().map(|(s, b)| (s, b.to_string())).collect(),
            ),
            requests: Mutex::new(vec![]),
        });
        let client = Ec2Client::new(
            transport.clone(),
            "https://ec2.eu-west-1.amazonaws.com",
            "eu-west-1",
            "AKIDEXAMPLE",
            "secret",
        )
        .unwrap();
        (transport, client)
    }

    #[tokio::test]
    async fn test_call_sends_signed_sorted_form() {
        let (transport, client) = client(vec![(200, "<DescribeInstancesResponse/>")]);
        client
            .call(
                "DescribeInstances",
                &[("InstanceId.1".to_string(), "i-22af91c7".to_string())],
                Error::ResourceRetrieval,
            )
            .await
            .unwrap();

        let sent = transport.requests.lock();
        let (headers, body) = &sent[0];
        assert_eq!(body, "Action=DescribeInstances&InstanceId.1=i-22af91c7&Version=2016-11-15");
        assert!(headers.iter().any(|(n, v)| n == "Authorization" && v.starts_with("AWS4-HMAC-SHA256")));
        assert!(headers.iter().any(|(n, _)| n == "X-Amz-Date"));
    }

    #[tokio::test]
    async fn test_aws_error_body_maps_through_table() {
        let error_xml = "<Response><Errors><Error>\
                         <Code>InvalidInstanceID.NotFound</Code>\
                         <Message>The instance ID 'i-ffffffff' does not exist</Message>\
                         </Error></Errors><RequestID>x</RequestID></Response>";
        let (_, client) = client(vec![(400, error_xml)]);
        assert_matches!(
            client.call("DescribeInstances", &[], Error::ResourceRetrieval).await,
            Err(Error::ResourceNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_unparseable_error_body_is_connection_error() {
        let (_, client) = client(vec![(500, "<html>gateway timeout</html>")]);
        assert_matches!(
            client.call("DescribeInstances", &[], Error::ResourceRetrieval).await,
            Err(Error::Connection(_))
        );
    }
}
