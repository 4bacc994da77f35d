pub mod backend;
pub mod blocking;
pub mod conn;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use http::header::{HeaderName, AUTHORIZATION, CONTENT_LENGTH, DATE, HOST, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method};
use url::Url;

use crate::config::{Config, SignatureType};
use crate::creds::Credentials;
use crate::error::OssError;
use crate::signing::{self, uri_encode, MASK};
use crate::utils::gmt_now;

/// Standard HTTP headers callers may pass through unchanged.
const ALLOWED_REQUEST_HEADERS: &[&str] = &[
    "content-type",
    "content-md5",
    "content-length",
    "content-language",
    "content-encoding",
    "content-disposition",
    "cache-control",
    "expires",
    "origin",
    "access-control-request-method",
    "access-control-request-headers",
    "x-default-storage-class",
    "location",
    "date",
    "etag",
    "range",
    "host",
    "if-modified-since",
    "if-unmodified-since",
    "if-match",
    "if-none-match",
    "last-modified",
    "content-range",
];

/// Query parameters that take part in the canonical resource.
const SUB_RESOURCES: &[&str] = &[
    "acl",
    "append",
    "backtosource",
    "cors",
    "customdomain",
    "delete",
    "deletebucket",
    "encryption",
    "inventory",
    "length",
    "lifecycle",
    "location",
    "logging",
    "metadata",
    "mirrorbacktosource",
    "modify",
    "name",
    "notification",
    "partnumber",
    "policy",
    "position",
    "quota",
    "rename",
    "replication",
    "requestpayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "storageclass",
    "storageinfo",
    "storagepolicy",
    "tagging",
    "torrent",
    "truncate",
    "uploadid",
    "uploads",
    "versionid",
    "versioning",
    "versions",
    "website",
    "x-image-process",
];

/// Deadline for a whole logical call, carried in request extensions so the
/// backend can clamp its socket timeouts to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallDeadline(pub Instant);

impl CallDeadline {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

/// Filters caller supplied headers. Names are trimmed and lowercased; blank
/// names are dropped. Allowed standard headers and headers with a service
/// prefix pass through. Anything else is dropped, or turned into user
/// metadata when `meta` is set (PUT and POST).
pub fn prepare_headers(
    headers: &BTreeMap<String, Vec<String>>,
    meta: bool,
    signature: SignatureType,
) -> Result<HeaderMap, OssError> {
    let mut prepared = HeaderMap::new();
    for (key, values) in headers {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let lower = key.to_lowercase();
        let name = if ALLOWED_REQUEST_HEADERS.contains(&lower.as_str())
            || lower.starts_with(SignatureType::Oss.header_prefix())
            || lower.starts_with(SignatureType::V2.header_prefix())
        {
            lower
        } else if meta {
            format!("{}{}", signature.meta_prefix(), lower)
        } else {
            continue;
        };
        let name = HeaderName::from_bytes(name.as_bytes())?;
        for value in values {
            prepared.append(name.clone(), HeaderValue::from_str(value)?);
        }
    }
    Ok(prepared)
}

/// Header dump for debug logs: Authorization left out, session token masked.
pub fn loggable_headers(headers: &HeaderMap, signature: SignatureType) -> String {
    let mut headers = headers.clone();
    headers.remove(AUTHORIZATION);
    let token_header = signature.security_token_header();
    if headers.contains_key(token_header) {
        headers.insert(token_header, HeaderValue::from_static(MASK));
    }
    format!("{:?}", headers)
}

/// One logical call: what to do and to which bucket/key. Derived headers
/// (Date, Host, Authorization, token) are never stored here; every attempt
/// builds them afresh from this value.
#[derive(Debug, Clone)]
pub struct SignableRequest {
    pub method: Method,
    pub bucket: String,
    pub key: String,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
}

impl SignableRequest {
    pub fn new(method: Method, bucket: &str, key: &str) -> Self {
        SignableRequest {
            method,
            bucket: bucket.trim().to_string(),
            key: key.to_string(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    fn virtual_hosted(&self, config: &Config) -> bool {
        !config.cname && !config.path_style && !self.bucket.is_empty()
    }

    pub fn host(&self, config: &Config) -> String {
        if self.virtual_hosted(config) {
            format!("{}.{}", self.bucket, config.host())
        } else {
            config.host()
        }
    }

    fn encoded_key(&self) -> String {
        uri_encode(&self.key, false)
    }

    pub fn path(&self, config: &Config) -> String {
        let mut path = if !config.cname && config.path_style && !self.bucket.is_empty() {
            format!("/{}", self.bucket)
        } else {
            String::new()
        };
        if !self.key.is_empty() {
            path.push('/');
            path.push_str(&self.encoded_key());
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }

    /// Sorted query string; empty values are emitted bare (`?acl`).
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    uri_encode(key, true)
                } else {
                    format!("{}={}", uri_encode(key, true), uri_encode(value, true))
                }
            })
            .collect::<Vec<String>>()
            .join("&")
    }

    pub fn url(&self, config: &Config, host: &str) -> Result<Url, OssError> {
        let mut url = format!("{}://{}{}", config.scheme(), host, self.path(config));
        let query = self.query_string();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        Ok(Url::parse(&url)?)
    }

    /// `/bucket/key` (`/host/key` with a cname) followed by the sub-resource
    /// parameters, values unencoded.
    pub fn canonical_resource(&self, config: &Config) -> String {
        let mut resource = if config.cname {
            format!("/{}/", config.host())
        } else if self.bucket.is_empty() {
            "/".to_string()
        } else if config.path_style {
            format!("/{}", self.bucket)
        } else {
            format!("/{}/", self.bucket)
        };
        if !self.key.is_empty() {
            if !resource.ends_with('/') {
                resource.push('/');
            }
            resource.push_str(&self.encoded_key());
        }
        let sub_resources = self
            .query
            .iter()
            .filter(|(key, _)| is_sub_resource(key))
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{}={}", key, value)
                }
            })
            .collect::<Vec<String>>();
        if !sub_resources.is_empty() {
            resource.push('?');
            resource.push_str(&sub_resources.join("&"));
        }
        resource
    }

    /// Headers for one attempt against `host`. With `sign` set and a usable
    /// access key the request also gets its Authorization header.
    pub fn attempt_headers(
        &self,
        config: &Config,
        credentials: &Credentials,
        host: &str,
        content_length: u64,
        sign: bool,
    ) -> Result<HeaderMap, OssError> {
        let signature = config.signature;
        let mut headers = self.headers.clone();
        headers.remove(AUTHORIZATION);
        headers.insert(HOST, HeaderValue::from_str(host)?);
        if !headers.contains_key(signature.date_header()) {
            headers.insert(DATE, HeaderValue::from_str(&gmt_now()?)?);
        }
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        if content_length > 0 || self.method == Method::PUT || self.method == Method::POST {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
        }
        if !sign {
            return Ok(headers);
        }
        if let Some(token) = credentials.security_token() {
            headers.insert(signature.security_token_header(), HeaderValue::from_str(token)?);
        }
        if !credentials.access_key.is_empty() {
            let signed = signing::sign(
                self.method.as_str(),
                &headers,
                &self.canonical_resource(config),
                credentials,
                signature,
            )?;
            let authorization = signed.authorization(&credentials.access_key, signature);
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        }
        Ok(headers)
    }
}

fn is_sub_resource(key: &str) -> bool {
    let lower = key.to_lowercase();
    SUB_RESOURCES.contains(&lower.as_str())
        || lower.starts_with(SignatureType::Oss.header_prefix())
        || lower.starts_with(SignatureType::V2.header_prefix())
}
