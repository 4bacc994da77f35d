use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::config::SignatureType;
use crate::error::{OssError, ServiceError};

/// Streaming response body. Dropping it closes the underlying connection.
pub struct ResponseBody(Box<dyn Read + Send>);

pub type Response = http::Response<ResponseBody>;

impl ResponseBody {
    pub fn new<R: Read + Send + 'static>(reader: R) -> Self {
        ResponseBody(Box::new(reader))
    }

    pub fn empty() -> Self {
        ResponseBody(Box::new(io::empty()))
    }

    pub fn bytes(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.0.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(data: Vec<u8>) -> Self {
        ResponseBody::new(io::Cursor::new(data))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(data: &'static str) -> Self {
        ResponseBody::new(data.as_bytes())
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseBody")
    }
}

/// Status, request id and headers common to every response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseModel {
    pub status_code: u16,
    pub request_id: String,
    pub response_headers: HashMap<String, Vec<String>>,
}

impl BaseModel {
    fn from_parts(response: &Response, signature: SignatureType) -> Self {
        let mut response_headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            response_headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        BaseModel {
            status_code: response.status().as_u16(),
            request_id: request_id(response, signature),
            response_headers,
        }
    }
}

/// Response body parsed as XML into `T`, together with the common fields.
#[derive(Debug, Clone)]
pub struct XmlModel<T> {
    pub base: BaseModel,
    pub body: T,
}

/// Turns a successful raw response into an output model.
pub trait FromResponse: Sized {
    fn from_response(response: Response, signature: SignatureType) -> Result<Self, OssError>;
}

impl FromResponse for Response {
    fn from_response(response: Response, _: SignatureType) -> Result<Self, OssError> {
        Ok(response)
    }
}

impl FromResponse for BaseModel {
    fn from_response(response: Response, signature: SignatureType) -> Result<Self, OssError> {
        let base = BaseModel::from_parts(&response, signature);
        // drain so the connection finishes cleanly
        io::copy(&mut response.into_body(), &mut io::sink())?;
        Ok(base)
    }
}

impl<T: DeserializeOwned> FromResponse for XmlModel<T> {
    fn from_response(response: Response, signature: SignatureType) -> Result<Self, OssError> {
        let base = BaseModel::from_parts(&response, signature);
        let body = response.into_body().bytes()?;
        let text = String::from_utf8(body.to_vec())?;
        Ok(XmlModel {
            base,
            body: quick_xml::de::from_str(&text)?,
        })
    }
}

fn request_id(response: &Response, signature: SignatureType) -> String {
    response
        .headers()
        .get(signature.request_id_header())
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ErrorDocument {
    code: String,
    message: String,
    request_id: String,
    host_id: String,
    resource: String,
}

/// Builds the structured error for a response with status >= 300. Empty or
/// non-XML bodies still yield the status and the request id header.
pub fn parse_service_error(response: Response, signature: SignatureType) -> ServiceError {
    let status_code = response.status().as_u16();
    let header_request_id = request_id(&response, signature);
    let body = match response.into_body().bytes() {
        Ok(body) => body,
        Err(e) => {
            log::warn!("Failed to read error response body: {}", e);
            Bytes::new()
        }
    };

    let text = String::from_utf8_lossy(&body);
    let document = if text.trim().is_empty() {
        ErrorDocument::default()
    } else if !text.trim_start().starts_with('<') {
        ErrorDocument {
            message: text.trim().to_string(),
            ..Default::default()
        }
    } else {
        match quick_xml::de::from_str::<ErrorDocument>(&text) {
            Ok(document) => document,
            Err(e) => {
                log::warn!("Failed to parse error response with status {}: {}", status_code, e);
                ErrorDocument {
                    message: text.trim().to_string(),
                    ..Default::default()
                }
            }
        }
    };

    let request_id = if document.request_id.is_empty() {
        header_request_id
    } else {
        document.request_id
    };
    ServiceError {
        status_code,
        code: document.code,
        message: document.message,
        request_id,
        host_id: document.host_id,
        resource: document.resource,
    }
}
