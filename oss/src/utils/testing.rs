use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{HeaderMap, Method};

use crate::body::BodySource;
use crate::error::OssError;
use crate::request::backend::{BackendRequestBody, SyncService};
use crate::response::{Response, ResponseBody};
use crate::transport::Sleeper;

/// A canned backend reply.
pub struct Reply {
    outcome: Result<(u16, Vec<(String, String)>, Vec<u8>), String>,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Reply {
            outcome: Ok((status, Vec::new(), Vec::new())),
        }
    }

    pub fn io_error(message: &str) -> Self {
        Reply {
            outcome: Err(message.to_string()),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Ok((_, headers, _)) = &mut self.outcome {
            headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        if let Ok((_, _, data)) = &mut self.outcome {
            *data = body.as_bytes().to_vec();
        }
        self
    }

    fn into_response(self) -> Result<Response, OssError> {
        let (status, headers, body) = self
            .outcome
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let mut builder = http::Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        Ok(builder.body(ResponseBody::from(body))?)
    }
}

/// What the backend saw for one attempt.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Answers attempts from a script and records each request, body included.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Reply>) -> Self {
        ScriptedBackend {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn drain(body: &mut BodySource) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let (n, done) = body.read_bounded(&mut buf)?;
        data.extend_from_slice(&buf[..n]);
        if done {
            return Ok(data);
        }
    }
}

impl<'a> SyncService<http::Request<BackendRequestBody<'a>>> for ScriptedBackend {
    type Response = Response;
    type Error = OssError;

    fn call(&mut self, request: http::Request<BackendRequestBody<'a>>) -> Result<Response, OssError> {
        let (parts, body) = request.into_parts();
        let recorded = RecordedRequest {
            method: parts.method,
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body: drain(body)?,
        };
        self.requests.lock().unwrap().push(recorded);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::io_error("no scripted reply left"));
        reply.into_response()
    }
}

/// Records requested pauses instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    hook: Option<Box<dyn Fn() + Send + Sync>>,
}

impl RecordingSleeper {
    /// Runs `hook` on every pause, e.g. to refresh credentials between attempts.
    pub fn with_hook<F: Fn() + Send + Sync + 'static>(hook: F) -> Self {
        RecordingSleeper {
            sleeps: Mutex::default(),
            hook: Some(Box::new(hook)),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        if let Some(hook) = &self.hook {
            hook();
        }
    }
}
