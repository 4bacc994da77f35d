//! Turns one logical call into as many HTTP attempts as the retry and
//! redirect budgets allow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::LOCATION;
use http::{Method, StatusCode};
use rand::Rng;
use url::Url;

use crate::body::BodySource;
use crate::config::Config;
use crate::creds::CredentialsChain;
use crate::error::OssError;
use crate::request::backend::{Backend, SyncService};
use crate::request::{loggable_headers, CallDeadline, SignableRequest};
use crate::response::{parse_service_error, Response};

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Bookkeeping for one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub redirect_count: u32,
    pub max_retry_count: u32,
    pub max_redirect_count: u32,
    pub last_status: Option<u16>,
}

impl RetryState {
    pub fn new(max_retry_count: u32, max_redirect_count: u32) -> Self {
        RetryState {
            attempt: 0,
            redirect_count: 0,
            max_retry_count,
            max_redirect_count,
            last_status: None,
        }
    }

    fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_retry_count
    }

    /// Redirects get an extra attempt so they do not eat into the retry budget.
    fn follow_redirect(&mut self) {
        self.redirect_count += 1;
        self.max_retry_count += 1;
    }
}

/// What to do with a response status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Follow `location`. With `reissue` the request goes out unchanged
    /// and unsigned instead of being re-signed for the new host.
    Redirect { location: String, reissue: bool },
    Retry,
    Terminal,
}

pub fn classify(
    status: StatusCode,
    location: Option<&str>,
    method: &Method,
    repeatable: bool,
    state: &RetryState,
) -> Outcome {
    let code = status.as_u16();
    if code < 300 {
        return Outcome::Success;
    }
    // a non-repeatable call is sent at most once, redirects included
    if !repeatable || code == 304 || (400..500).contains(&code) {
        return Outcome::Terminal;
    }
    if (300..400).contains(&code) {
        return match location.filter(|l| !l.is_empty()) {
            Some(location) if state.redirect_count < state.max_redirect_count => {
                Outcome::Redirect {
                    location: location.to_string(),
                    reissue: status == StatusCode::FOUND && *method == Method::GET,
                }
            }
            _ => Outcome::Terminal,
        };
    }
    Outcome::Retry
}

/// Randomised, growing pause before attempt `attempt + 1`.
pub fn backoff(attempt: u32) -> Duration {
    let jitter: f64 = rand::thread_rng().gen();
    Duration::from_secs_f64(jitter * (attempt + 2) as f64)
}

enum Target {
    Origin,
    Redirect { location: Url, reissue: bool },
}

pub struct Transport<B> {
    backend: B,
    config: Arc<Config>,
    credentials: Arc<CredentialsChain>,
    sleeper: Arc<dyn Sleeper>,
}

impl<B: Backend> Transport<B> {
    pub fn new(backend: B, config: Arc<Config>, credentials: Arc<CredentialsChain>) -> Self {
        Transport {
            backend,
            config,
            credentials,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs `request` with the configured retry and redirect budgets.
    pub fn execute(
        &mut self,
        request: &SignableRequest,
        body: &mut BodySource,
        repeatable: bool,
    ) -> Result<Response, OssError> {
        let (max_retry_count, max_redirect_count) =
            (self.config.max_retry_count, self.config.max_redirect_count);
        self.execute_with_limits(request, body, repeatable, max_retry_count, max_redirect_count)
    }

    pub fn execute_with_limits(
        &mut self,
        request: &SignableRequest,
        body: &mut BodySource,
        repeatable: bool,
        max_retry_count: u32,
        max_redirect_count: u32,
    ) -> Result<Response, OssError> {
        // a body that cannot be replayed makes the call non-repeatable
        let repeatable = repeatable && body.is_rearmable();
        let deadline = self
            .config
            .request_timeout
            .map(|t| CallDeadline(Instant::now() + t));
        let origin = request.url(&self.config, &request.host(&self.config))?;

        let mut state = RetryState::new(max_retry_count, max_redirect_count);
        let mut target = Target::Origin;
        let mut last_error: Option<OssError> = None;

        while state.attempt <= state.max_retry_count {
            if deadline.is_some_and(|d| d.is_expired()) {
                return Err(OssError::Cancelled);
            }
            let http_request = self.build(request, &origin, &target, body, deadline)?;
            log::debug!(
                "Do request with url [{}] and method [{}]",
                http_request.uri(),
                request.method
            );
            log::debug!(
                "Request headers: {}",
                loggable_headers(http_request.headers(), self.config.signature)
            );

            let start = Instant::now();
            let result: Result<Response, OssError> =
                self.backend.call(http_request).map_err(Into::into);
            log::info!("Do http request cost {} ms", start.elapsed().as_millis());

            let mut last_response: Option<Response> = None;
            let reason = match result {
                Err(e) => {
                    if deadline.is_some_and(|d| d.is_expired()) {
                        return Err(OssError::Cancelled);
                    }
                    if !repeatable {
                        log::warn!("Do http request with error: {}", e);
                        return Err(e);
                    }
                    let reason = e.to_string();
                    last_error = Some(e);
                    reason
                }
                Ok(response) => {
                    log::debug!("Response headers: {:?}", response.headers());
                    let status = response.status();
                    state.last_status = Some(status.as_u16());
                    let location = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    match classify(status, location.as_deref(), &request.method, repeatable, &state) {
                        Outcome::Success => return Ok(response),
                        Outcome::Terminal => {
                            return Err(parse_service_error(response, self.config.signature).into())
                        }
                        Outcome::Redirect { location, reissue } => {
                            let location = origin.join(&location)?;
                            log::warn!("Redirect request to {}", location);
                            state.follow_redirect();
                            target = Target::Redirect { location, reissue };
                        }
                        Outcome::Retry => {}
                    }
                    last_error = None;
                    last_response = Some(response);
                    status.to_string()
                }
            };

            if state.has_attempts_left() {
                // dropping the response closes its connection
                drop(last_response);
                log::warn!("Failed to send request with reason: {}, will try again", reason);
                body.rearm()?;
                let mut pause = backoff(state.attempt);
                if let Some(deadline) = deadline {
                    pause = pause.min(deadline.remaining());
                }
                self.sleeper.sleep(pause);
            } else {
                log::error!("Failed to send request with reason: {}", reason);
                if let Some(response) = last_response {
                    return Err(parse_service_error(response, self.config.signature).into());
                }
            }
            state.attempt += 1;
        }

        Err(last_error.unwrap_or(OssError::Cancelled))
    }

    fn build<'a>(
        &self,
        request: &SignableRequest,
        origin: &Url,
        target: &Target,
        body: &'a mut BodySource,
        deadline: Option<CallDeadline>,
    ) -> Result<http::Request<&'a mut BodySource>, OssError> {
        let credentials = self.credentials.resolve();
        let content_length = body.declared_length();
        let (url, headers) = match target {
            Target::Origin => {
                let host = request.host(&self.config);
                let headers =
                    request.attempt_headers(&self.config, &credentials, &host, content_length, true)?;
                (origin.clone(), headers)
            }
            Target::Redirect { location, reissue } => {
                let host = authority(location);
                let headers = request.attempt_headers(
                    &self.config,
                    &credentials,
                    &host,
                    content_length,
                    !reissue,
                )?;
                let mut url = location.clone();
                if !reissue && url.query().is_none() {
                    url.set_query(origin.query());
                }
                (url, headers)
            }
        };

        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(url.as_str());
        if let Some(deadline) = deadline {
            builder = builder.extension(deadline);
        }
        let mut http_request = builder.body(body)?;
        *http_request.headers_mut() = headers;
        Ok(http_request)
    }
}

fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}
