use std::net::IpAddr;
use std::time::Duration;

use url::Url;

use crate::error::OssError;

pub const DEFAULT_USER_AGENT: &str = concat!("oss-sdk-rust/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;
pub const DEFAULT_MAX_REDIRECT_COUNT: u32 = 3;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);

/// Signing scheme selector. `Oss` is the service's native dialect, `V2` the
/// legacy S3 one; both share the V2 HMAC-SHA1 algorithm and differ only in
/// prefixes and header names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignatureType {
    #[default]
    Oss,
    V2,
}

impl SignatureType {
    /// Scheme token in front of `ak:signature` in the Authorization header.
    pub fn auth_prefix(self) -> &'static str {
        match self {
            SignatureType::Oss => "OSS",
            SignatureType::V2 => "AWS",
        }
    }

    pub fn header_prefix(self) -> &'static str {
        match self {
            SignatureType::Oss => "x-oss-",
            SignatureType::V2 => "x-amz-",
        }
    }

    pub fn meta_prefix(self) -> &'static str {
        match self {
            SignatureType::Oss => "x-oss-meta-",
            SignatureType::V2 => "x-amz-meta-",
        }
    }

    pub fn security_token_header(self) -> &'static str {
        match self {
            SignatureType::Oss => "x-oss-security-token",
            SignatureType::V2 => "x-amz-security-token",
        }
    }

    pub fn request_id_header(self) -> &'static str {
        match self {
            SignatureType::Oss => "x-oss-request-id",
            SignatureType::V2 => "x-amz-request-id",
        }
    }

    pub fn date_header(self) -> &'static str {
        match self {
            SignatureType::Oss => "x-oss-date",
            SignatureType::V2 => "x-amz-date",
        }
    }

    /// Query parameter carrying the access key in a signed URL.
    pub fn access_key_param(self) -> &'static str {
        match self {
            SignatureType::Oss => "AccessKeyId",
            SignatureType::V2 => "AWSAccessKeyId",
        }
    }
}

/// Immutable client configuration. Build it once with the `with_*` methods
/// and share it; changing settings means building a new `Config`.
#[derive(Clone, Debug)]
pub struct Config {
    endpoint: Url,
    pub signature: SignatureType,
    pub path_style: bool,
    pub cname: bool,
    pub max_retry_count: u32,
    pub max_redirect_count: u32,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub final_timeout: Duration,
    /// Upper bound for one logical call, retries included.
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
}

impl Config {
    /// Endpoints without a scheme default to https.
    pub fn new(endpoint: &str) -> Result<Config, OssError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(OssError::Config("Endpoint is not set".to_string()));
        }
        let endpoint = if endpoint.contains("://") {
            Url::parse(endpoint)?
        } else {
            Url::parse(&format!("https://{}", endpoint))?
        };
        if endpoint.host_str().is_none() {
            return Err(OssError::Config(format!("Endpoint {} has no host", endpoint)));
        }
        let path_style = is_ip_host(&endpoint);
        Ok(Config {
            endpoint,
            signature: SignatureType::default(),
            path_style,
            cname: false,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            max_redirect_count: DEFAULT_MAX_REDIRECT_COUNT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            final_timeout: DEFAULT_SOCKET_TIMEOUT * 10,
            request_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn scheme(&self) -> &str {
        self.endpoint.scheme()
    }

    /// Host with port when the endpoint carries a non-default one.
    pub fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub fn with_signature(mut self, signature: SignatureType) -> Self {
        self.signature = signature;
        self
    }

    /// IP endpoints always use path style addressing.
    pub fn with_path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style || is_ip_host(&self.endpoint);
        self
    }

    pub fn with_cname(mut self, cname: bool) -> Self {
        self.cname = cname;
        self
    }

    pub fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    pub fn with_max_redirect_count(mut self, max_redirect_count: u32) -> Self {
        self.max_redirect_count = max_redirect_count;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Stall bound for a single read or write.
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Idle bound after the most recent read or write.
    pub fn with_final_timeout(mut self, timeout: Duration) -> Self {
        self.final_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        let user_agent = user_agent.trim();
        if !user_agent.is_empty() {
            self.user_agent = user_agent.to_string();
        }
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OssError> {
        if self.socket_timeout.is_zero() {
            return Err(OssError::Config("Socket timeout must be positive".to_string()));
        }
        if self.final_timeout < self.socket_timeout {
            return Err(OssError::Config(
                "Final timeout must not be shorter than socket timeout".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_ip_host(endpoint: &Url) -> bool {
    match endpoint.host_str() {
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok(),
        None => false,
    }
}
