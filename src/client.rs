//! Blocking HTTP client for the Smile's local XML API.
//!
//! - One request at a time over a `ureq` agent (no async).
//! - Basic auth with the gateway id as password.
//! - Transport failures are retried immediately a fixed number of times;
//!   anything the gateway actually answered is never retried.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::Method;
use log::{debug, error, warn};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::xml::{Element, XmlError, parse_gateway_document};

pub const APPLIANCES: &str = "/core/appliances";
pub const DIRECT_OBJECTS: &str = "/core/direct_objects";
pub const DOMAIN_OBJECTS: &str = "/core/domain_objects";
pub const LOCATIONS: &str = "/core/locations";
pub const NOTIFICATIONS: &str = "/core/notifications";
pub const RULES: &str = "/core/rules";
pub const STATUS: &str = "/system/status.xml";

pub const DEFAULT_USERNAME: &str = "smile";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum SmileClientError {
    /// Timeout or transport failure that outlived every retry.
    Connectivity(String),
    InvalidAuthentication,
    Http { status: u16, message: String },
    /// Empty body or an `<error>` payload.
    MalformedResponse(String),
    InvalidXml(XmlError),
}

impl core::fmt::Display for SmileClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SmileClientError::Connectivity(s) => write!(f, "connectivity error: {}", s),
            SmileClientError::InvalidAuthentication => write!(f, "gateway rejected the credentials"),
            SmileClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            SmileClientError::MalformedResponse(s) => write!(f, "malformed response: {}", s),
            SmileClientError::InvalidXml(e) => write!(f, "invalid xml: {}", e),
        }
    }
}

impl std::error::Error for SmileClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SmileClientError::InvalidXml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<XmlError> for SmileClientError {
    fn from(value: XmlError) -> Self {
        SmileClientError::InvalidXml(value)
    }
}

/// Raw answer of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// One attempt at one request. Implementations report every failure to get
/// an answer as `Connectivity` and a body that cannot be decoded as
/// `MalformedResponse`; HTTP statuses come back as values.
pub trait Transport {
    fn send(&self, method: &Method, path: &str, body: Option<&str>) -> Result<RawResponse, SmileClientError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, method: &Method, path: &str, body: Option<&str>) -> Result<RawResponse, SmileClientError> {
        (**self).send(method, path, body)
    }
}

pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
    authorization: String,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16, username: &str, password: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        let credentials = STANDARD.encode(format!("{}:{}", username, password));
        HttpTransport {
            agent,
            endpoint: format!("http://{}:{}", host, port),
            authorization: format!("Basic {}", credentials),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.endpoint, path)
        } else {
            format!("{}/{}", self.endpoint, path)
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, method: &Method, path: &str, body: Option<&str>) -> Result<RawResponse, SmileClientError> {
        let url = self.url(path);
        let auth = self.authorization.as_str();
        let result = if *method == Method::PUT {
            self.agent
                .put(&url)
                .header("Authorization", auth)
                .header("Content-Type", "text/xml")
                .send(body.unwrap_or_default())
        } else if *method == Method::DELETE {
            self.agent.delete(&url).header("Authorization", auth).call()
        } else {
            self.agent.get(&url).header("Authorization", auth).call()
        };

        let mut response = result.map_err(|e| SmileClientError::Connectivity(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| SmileClientError::Connectivity(e.to_string()))?;
        Ok(RawResponse {
            status,
            body: decode_body(path, bytes)?,
        })
    }
}

/// A body that arrived but is not UTF-8 is the gateway's fault, not the network's.
pub fn decode_body(path: &str, bytes: Vec<u8>) -> Result<String, SmileClientError> {
    String::from_utf8(bytes)
        .map_err(|e| SmileClientError::MalformedResponse(format!("{} returned a non UTF-8 body: {}", path, e)))
}

pub struct SmileClient<T: Transport = HttpTransport> {
    transport: T,
    max_retries: NonZeroU32,
}

impl SmileClient<HttpTransport> {
    pub fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        timeout: Duration,
        max_retries: NonZeroU32,
    ) -> Self {
        SmileClient::with_transport(HttpTransport::new(host, port, username, password, timeout), max_retries)
    }
}

impl<T: Transport> SmileClient<T> {
    pub fn with_transport(transport: T, max_retries: NonZeroU32) -> Self {
        SmileClient { transport, max_retries }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a request; `Ok(None)` when the gateway accepted it without a document.
    pub fn request(&self, method: Method, path: &str, body: Option<&str>) -> Result<Option<Element>, SmileClientError> {
        let attempts = self.max_retries.get() + 1;
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.transport.send(&method, path, body) {
                Ok(r) => break r,
                Err(SmileClientError::Connectivity(e)) if attempt < attempts => {
                    warn!("{} {} failed (attempt {}/{}): {}; retrying", method, path, attempt, attempts, e);
                }
                Err(SmileClientError::Connectivity(e)) => {
                    error!("Timed out sending {} {} to Plugwise: {}", method, path, e);
                    return Err(SmileClientError::Connectivity(e));
                }
                Err(other) => return Err(other),
            }
        };

        match response.status {
            401 => return Err(SmileClientError::InvalidAuthentication),
            202 => return Ok(None),
            200 if method != Method::GET => return Ok(None),
            s if s >= 400 => {
                return Err(SmileClientError::Http {
                    status: s,
                    message: response.body,
                });
            }
            _ => {}
        }

        if response.body.trim().is_empty() || response.body.contains("<error>") {
            error!("Smile response empty or error in {}: {}", path, response.body);
            return Err(SmileClientError::MalformedResponse(format!("{} returned {:?}", path, response.body)));
        }

        let doc = parse_gateway_document(&response.body).inspect_err(|e| {
            error!("Smile returned invalid XML for {}: {}", path, e);
        })?;
        debug!("{} {} -> <{}> with {} children", method, path, doc.name, doc.children.len());
        Ok(Some(doc))
    }

    pub fn get(&self, path: &str) -> Result<Element, SmileClientError> {
        self.request(Method::GET, path, None)?
            .ok_or_else(|| SmileClientError::MalformedResponse(format!("{} returned no document", path)))
    }

    pub fn put(&self, path: &str, body: &str) -> Result<(), SmileClientError> {
        self.request(Method::PUT, path, Some(body)).map(|_| ())
    }

    pub fn delete(&self, path: &str) -> Result<(), SmileClientError> {
        self.request(Method::DELETE, path, None).map(|_| ())
    }
}
