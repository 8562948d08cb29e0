//! OpenNebula XML-RPC client adapter
//!
//! The single choke point for every OpenNebula call. Transport faults become
//! `Connection`; the fixed OpenNebula error-code table maps domain failures
//! into the taxonomy; anything unmapped becomes the caller-supplied fallback
//! error. Exactly one attempt per call, no retries.

use crate::error::{Error, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

// OpenNebula error codes (oned XML-RPC API)
const ONE_AUTHENTICATION: i64 = 0x0100;
const ONE_AUTHORIZATION: i64 = 0x0200;
const ONE_NO_EXISTS: i64 = 0x0400;
const ONE_ACTION: i64 = 0x0800;

// =============================================================================
// Parameters
// =============================================================================

/// XML-RPC call parameter
#[derive(Debug, Clone)]
pub enum RpcParam {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for RpcParam {
    fn from(v: &str) -> Self {
        RpcParam::Str(v.to_string())
    }
}

impl From<String> for RpcParam {
    fn from(v: String) -> Self {
        RpcParam::Str(v)
    }
}

impl From<i64> for RpcParam {
    fn from(v: i64) -> Self {
        RpcParam::Int(v)
    }
}

impl From<bool> for RpcParam {
    fn from(v: bool) -> Self {
        RpcParam::Bool(v)
    }
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn encode_call(method: &str, session: &str, params: &[RpcParam]) -> String {
    let mut body = String::with_capacity(512);
    body.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<methodCall>");
    body.push_str(&format!("<methodName>{}</methodName><params>", method));
    body.push_str(&format!(
        "<param><value><string>{}</string></value></param>",
        xml_escape(session)
    ));
    for param in params {
        let encoded = match param {
            RpcParam::Str(v) => format!("<string>{}</string>", xml_escape(v)),
            RpcParam::Int(v) => format!("<i4>{}</i4>", v),
            RpcParam::Bool(v) => format!("<boolean>{}</boolean>", if *v { 1 } else { 0 }),
        };
        body.push_str(&format!("<param><value>{}</value></param>", encoded));
    }
    body.push_str("</params></methodCall>");
    body
}

// =============================================================================
// Response parsing
// =============================================================================

/// Leaf scalar inside an XML-RPC response
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// Flatten the response's leaf values in document order. OpenNebula replies
/// are `[success, body, errcode]` arrays; faults carry a struct we detect by
/// the surrounding `fault` element.
fn parse_scalars(xml: &str) -> Result<(bool, Vec<Scalar>)> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut scalars = Vec::new();
    let mut in_fault = false;
    let mut current: Option<&'static str> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"fault" => in_fault = true,
                b"boolean" => current = Some("boolean"),
                b"i4" | b"int" => current = Some("int"),
                b"string" => current = Some("string"),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(kind) = current {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::Connection(format!("malformed RPC response: {}", e)))?
                        .to_string();
                    let scalar = match kind {
                        "boolean" => Scalar::Bool(text.trim() == "1" || text.trim() == "true"),
                        "int" => Scalar::Int(text.trim().parse().map_err(|_| {
                            Error::Connection(format!("non-integer RPC value: {}", text))
                        })?),
                        _ => Scalar::Str(text),
                    };
                    scalars.push(scalar);
                }
            }
            Ok(Event::End(e)) => {
                if matches!(e.name().as_ref(), b"boolean" | b"i4" | b"int" | b"string") {
                    current = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Connection(format!("malformed RPC response: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok((in_fault, scalars))
}

// =============================================================================
// Transport
// =============================================================================

/// Raw HTTP leg of an XML-RPC exchange; mockable in tests
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn post(&self, body: String) -> Result<String>;
}

/// reqwest-backed transport. The timeout is fixed at construction; no
/// per-call override exists.
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
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
impl RpcTransport for HttpTransport {
    async fn post(&self, body: String) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connection(format!("HTTP {} from {}", status, self.endpoint)));
        }
        response
            .text()
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}

// =============================================================================
// Client
// =============================================================================

/// OpenNebula XML-RPC client
pub struct OneClient {
    transport: Arc<dyn RpcTransport>,
    /// `user:token` session string, sent as the first parameter of every call
    session: String,
}

impl OneClient {
    pub fn new(transport: Arc<dyn RpcTransport>, session: &str) -> Self {
        Self {
            transport,
            session: session.to_string(),
        }
    }

    /// Execute one call. On success returns the response body (usually an
    /// XML document or a numeric id rendered as text).
    pub async fn call<F>(&self, method: &str, params: &[RpcParam], fallback: F) -> Result<String>
    where
        F: FnOnce(String) -> Error,
    {
        trace!(method, "rpc call");
        let body = encode_call(method, &self.session, params);
        let raw = self.transport.post(body).await?;
        let (fault, scalars) = parse_scalars(&raw)?;

        if fault {
            let message = scalars
                .iter()
                .find_map(|s| match s {
                    Scalar::Str(m) => Some(m.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| "unknown fault".to_string());
            return Err(Error::Connection(format!("RPC fault from {}: {}", method, message)));
        }

        let success = match scalars.first() {
            Some(Scalar::Bool(v)) => *v,
            _ => {
                return Err(Error::Connection(format!(
                    "unexpected RPC response shape from {}",
                    method
                )))
            }
        };

        let message = scalars
            .iter()
            .skip(1)
            .find_map(|s| match s {
                Scalar::Str(m) => Some(m.clone()),
                Scalar::Int(v) => Some(v.to_string()),
                _ => None,
            })
            .unwrap_or_default();

        if success {
            debug!(method, "rpc ok");
            return Ok(message);
        }

        let code = scalars
            .iter()
            .rev()
            .find_map(|s| match s {
                Scalar::Int(v) => Some(*v),
                _ => None,
            })
            .unwrap_or(0);

        Err(match code {
            ONE_AUTHENTICATION => Error::Authentication(message),
            ONE_AUTHORIZATION => Error::Authorization(message),
            ONE_NO_EXISTS => Error::not_found("opennebula", message),
            ONE_ACTION => Error::ResourceAction {
                action: method.to_string(),
                reason: message,
            },
            _ => fallback(message),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
