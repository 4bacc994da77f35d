//! Transport core of a client SDK for an S3-compatible object storage
//! service: V2 request signing, replayable request bodies, and a blocking
//! HTTP transport with retries, redirects and stall-bounded connections.
#![forbid(unsafe_code)]

#[macro_use]
extern crate serde_derive;

pub use osscreds as creds;

pub use body::BodySource;
pub use client::{Client, HeaderExtension, Marshaled, Serializable, SignedUrl};
pub use config::{Config, SignatureType};
pub use error::{OssError, RearmError, ServiceError};
pub use response::{BaseModel, FromResponse, Response, ResponseBody, XmlModel};
pub use transport::Transport;

pub mod body;
pub mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod response;
pub mod signing;
pub mod transport;
pub mod utils;
