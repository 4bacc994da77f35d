use std::fmt;
use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OssError {
    #[error("config: {0}")]
    Config(String),
    #[error("rearm: {0}")]
    Rearm(#[from] RearmError),
    #[error("transport: {0}")]
    Transport(#[from] io::Error),
    #[error("{0}")]
    Service(#[from] ServiceError),
    #[error("Request deadline exceeded")]
    Cancelled,
    #[error("Client is closed")]
    Closed,
    #[error("oss-creds: {0}")]
    Credentials(#[from] crate::creds::error::CredentialsError),
    #[error("hmac invalid length: {0}")]
    HmacInvalidLength(#[from] hmac::digest::InvalidLength),
    #[cfg(feature = "native-tls")]
    #[error("native-tls: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("url parse: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("http: {0}")]
    Http(#[from] http::Error),
    #[error("header to string: {0}")]
    HeaderToStr(#[from] http::header::ToStrError),
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    #[error("invalid method: {0}")]
    InvalidMethod(#[from] http::method::InvalidMethod),
    #[error("from utf8: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),
    #[error("serde xml: {0}")]
    SerdeXml(#[from] quick_xml::de::DeError),
    #[error("Time format error: {0}")]
    TimeFormat(#[from] time::error::Format),
}

impl OssError {
    /// The structured service error, when the failure came from an HTTP status.
    pub fn service(&self) -> Option<&ServiceError> {
        match self {
            OssError::Service(e) => Some(e),
            _ => None,
        }
    }
}

/// A request body could not be replayed from its start.
#[derive(Error, Debug)]
pub enum RearmError {
    #[error("Body source can not seek back to its mark")]
    NotSeekable,
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// A response with status >= 300, parsed from the service's `<Error>` document
/// when one was returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceError {
    pub status_code: u16,
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub host_id: String,
    pub resource: String,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Got HTTP {} with code '{}', message '{}', request id '{}'",
            self.status_code, self.code, self.message, self.request_id
        )
    }
}

impl std::error::Error for ServiceError {}
