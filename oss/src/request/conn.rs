//! Connection decorator enforcing a stall bound per read or write and a
//! longer idle bound afterwards.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// A byte stream whose blocking reads and writes can be bounded in time.
pub trait TimeoutStream: Read + Write {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimeoutStream for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }
}

#[cfg(feature = "native-tls")]
impl<S: TimeoutStream> TimeoutStream for native_tls::TlsStream<S> {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.get_ref().set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.get_ref().set_write_timeout(timeout)
    }
}

/// Wraps a stream so every read or write may stall for at most
/// `socket_timeout`, after which the stream is left with the longer
/// `final_timeout`. Both are clamped to the call deadline, if any.
///
/// Failing to update a timeout only weakens stall protection; it is logged
/// and the I/O goes ahead.
pub struct DeadlineConn<S> {
    inner: S,
    socket_timeout: Duration,
    final_timeout: Duration,
    deadline: Option<Instant>,
}

impl<S: TimeoutStream> DeadlineConn<S> {
    pub fn new(inner: S, socket_timeout: Duration, final_timeout: Duration) -> Self {
        DeadlineConn {
            inner,
            socket_timeout,
            final_timeout,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn check_deadline(&self) -> io::Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "call deadline exceeded",
            )),
            _ => Ok(()),
        }
    }

    fn clamp(&self, timeout: Duration) -> Duration {
        let timeout = match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        };
        timeout.max(MIN_TIMEOUT)
    }

    fn set_read(&self, timeout: Duration) {
        if let Err(e) = self.inner.set_read_timeout(Some(self.clamp(timeout))) {
            log::debug!("Failed to set read deadline with reason: {}, but it's ok", e);
        }
    }

    fn set_write(&self, timeout: Duration) {
        if let Err(e) = self.inner.set_write_timeout(Some(self.clamp(timeout))) {
            log::debug!("Failed to set write deadline with reason: {}, but it's ok", e);
        }
    }
}

impl<S: TimeoutStream> Read for DeadlineConn<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_deadline()?;
        self.set_read(self.socket_timeout);
        let result = self.inner.read(buf);
        self.set_read(self.final_timeout);
        result
    }
}

impl<S: TimeoutStream> Write for DeadlineConn<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_deadline()?;
        self.set_write(self.socket_timeout);
        let result = self.inner.write(buf);
        // a write is usually followed by waiting for the response
        self.set_write(self.final_timeout);
        self.set_read(self.final_timeout);
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
