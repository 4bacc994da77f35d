//! Blocking HTTP/1.1 backend speaking over a [`DeadlineConn`].
//!
//! Every call opens its own connection and sends `Connection: close`, so
//! dropping a response (or its body) closes the socket.

use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use http::header::{HeaderName, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::body::BodySource;
use crate::config::Config;
use crate::error::OssError;
use crate::request::backend::{BackendRequestBody, SyncService};
use crate::request::conn::DeadlineConn;
use crate::request::CallDeadline;
use crate::response::{Response, ResponseBody};

const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_HEADERS: usize = 128;
const CHUNK_SIZE: usize = 64 * 1024;

trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

#[derive(Clone)]
pub struct ConnBackend {
    connect_timeout: Duration,
    socket_timeout: Duration,
    final_timeout: Duration,
    #[cfg(feature = "native-tls")]
    tls: Option<native_tls::TlsConnector>,
}

impl ConnBackend {
    pub fn new(config: &Config) -> Result<Self, OssError> {
        config.validate()?;
        #[cfg(feature = "native-tls")]
        let tls = if config.scheme() == "https" {
            Some(native_tls::TlsConnector::new()?)
        } else {
            None
        };
        Ok(ConnBackend {
            connect_timeout: config.connect_timeout,
            socket_timeout: config.socket_timeout,
            final_timeout: config.final_timeout,
            #[cfg(feature = "native-tls")]
            tls,
        })
    }

    fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        deadline: Option<Instant>,
    ) -> Result<TcpStream, OssError> {
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        let mut last_err = None;
        for addr in addrs {
            let timeout = match deadline {
                Some(deadline) => self
                    .connect_timeout
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.connect_timeout,
            };
            if timeout.is_zero() {
                return Err(OssError::Cancelled);
            }
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    log::debug!("Failed to connect to {}: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}", host),
                )
            })
            .into())
    }

    fn connect(&self, uri: &http::Uri, deadline: Option<Instant>) -> Result<Box<dyn Stream>, OssError> {
        let host = uri
            .host()
            .ok_or_else(|| OssError::Config(format!("Request uri {} has no host", uri)))?
            .trim_start_matches('[')
            .trim_end_matches(']');
        let https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        let tcp = self.connect_tcp(host, port, deadline)?;
        if !https {
            return Ok(Box::new(
                DeadlineConn::new(tcp, self.socket_timeout, self.final_timeout)
                    .with_deadline(deadline),
            ));
        }
        self.connect_tls(host, tcp, deadline)
    }

    #[cfg(feature = "native-tls")]
    fn connect_tls(
        &self,
        host: &str,
        tcp: TcpStream,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn Stream>, OssError> {
        tcp.set_read_timeout(Some(self.socket_timeout))?;
        tcp.set_write_timeout(Some(self.socket_timeout))?;
        let connector = match &self.tls {
            Some(connector) => connector.clone(),
            None => native_tls::TlsConnector::new()?,
        };
        let stream = match connector.connect(host, tcp) {
            Ok(stream) => stream,
            Err(native_tls::HandshakeError::Failure(e)) => return Err(e.into()),
            Err(native_tls::HandshakeError::WouldBlock(_)) => {
                return Err(
                    io::Error::new(io::ErrorKind::TimedOut, "TLS handshake stalled").into(),
                )
            }
        };
        Ok(Box::new(
            DeadlineConn::new(stream, self.socket_timeout, self.final_timeout)
                .with_deadline(deadline),
        ))
    }

    #[cfg(not(feature = "native-tls"))]
    fn connect_tls(
        &self,
        _host: &str,
        _tcp: TcpStream,
        _deadline: Option<Instant>,
    ) -> Result<Box<dyn Stream>, OssError> {
        Err(OssError::Config(
            "https endpoints need the `native-tls` feature".to_string(),
        ))
    }
}

impl<'a> SyncService<http::Request<BackendRequestBody<'a>>> for ConnBackend {
    type Response = Response;
    type Error = OssError;

    fn call(&mut self, request: http::Request<BackendRequestBody<'a>>) -> Result<Response, OssError> {
        let deadline = request.extensions().get::<CallDeadline>().map(|d| d.0);
        let (parts, body) = request.into_parts();
        let mut conn = self.connect(&parts.uri, deadline)?;
        write_request(&mut conn, &parts.method, &parts.uri, &parts.headers, body)?;
        read_response(conn, &parts.method)
    }
}

fn write_request<W: Write>(
    conn: &mut W,
    method: &Method,
    uri: &http::Uri,
    headers: &HeaderMap,
    body: &mut BodySource,
) -> Result<(), OssError> {
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, conn);
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    write!(writer, "{} {} HTTP/1.1\r\n", method, target)?;

    if !headers.contains_key(HOST) {
        if let Some(authority) = uri.authority() {
            write!(writer, "host: {}\r\n", authority)?;
        }
    }
    let declared = body.declared_length();
    if declared > 0 && !headers.contains_key(CONTENT_LENGTH) {
        write!(writer, "content-length: {}\r\n", declared)?;
    }
    for (name, value) in headers {
        if name == CONNECTION {
            continue;
        }
        writer.write_all(name.as_str().as_bytes())?;
        writer.write_all(b": ")?;
        writer.write_all(value.as_bytes())?;
        writer.write_all(b"\r\n")?;
    }
    writer.write_all(b"connection: close\r\n\r\n")?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let (n, done) = body.read_bounded(&mut buf)?;
        writer.write_all(&buf[..n])?;
        sent += n as u64;
        if done {
            break;
        }
    }
    if sent < declared {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("request body ended after {} of {} bytes", sent, declared),
        )
        .into());
    }
    writer.flush()?;
    Ok(())
}

struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
}

/// Parses a response head out of `buf`, `None` when more bytes are needed.
fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, usize)>, OssError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut raw_headers);
    let len = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => {
            return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()).into())
        }
    };
    let status = StatusCode::from_u16(parsed.code.unwrap_or_default())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        headers.append(
            HeaderName::from_bytes(header.name.as_bytes())?,
            HeaderValue::from_bytes(header.value)?,
        );
    }
    Ok(Some((ResponseHead { status, headers }, len)))
}

fn read_head<R: Read>(conn: &mut R) -> Result<(ResponseHead, Vec<u8>), OssError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = conn.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the response head",
            )
            .into());
        }
        buf.extend_from_slice(&chunk[..n]);
        // skip interim 1xx responses
        while let Some((head, len)) = parse_head(&buf)? {
            buf.drain(..len);
            if !head.status.is_informational() {
                return Ok((head, buf));
            }
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "response head too large").into());
        }
    }
}

fn read_response(mut conn: Box<dyn Stream>, method: &Method) -> Result<Response, OssError> {
    let (head, leftover) = read_head(&mut conn)?;
    let rest = Cursor::new(leftover).chain(conn);

    let no_body = *method == Method::HEAD
        || head.status == StatusCode::NO_CONTENT
        || head.status == StatusCode::NOT_MODIFIED;
    let chunked = head
        .headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .any(|v| String::from_utf8_lossy(v.as_bytes()).to_ascii_lowercase().contains("chunked"));
    let content_length = head
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let body = if no_body {
        ResponseBody::empty()
    } else if chunked {
        ResponseBody::new(ChunkedReader::new(BufReader::new(rest)))
    } else if let Some(len) = content_length {
        ResponseBody::new(rest.take(len))
    } else {
        ResponseBody::new(rest)
    };

    let mut response = http::Response::new(body);
    *response.status_mut() = head.status;
    *response.headers_mut() = head.headers;
    Ok(response)
}

/// Decodes a `Transfer-Encoding: chunked` body.
struct ChunkedReader<R> {
    inner: R,
    remaining: u64,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    fn new(inner: R) -> Self {
        ChunkedReader {
            inner,
            remaining: 0,
            done: false,
        }
    }

    fn read_raw_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        if self.inner.read_until(b'\n', &mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended early",
            ));
        }
        Ok(line)
    }

    /// Reads a line and reports whether it was blank.
    fn skip_line(&mut self) -> io::Result<bool> {
        let line = self.read_raw_line()?;
        Ok(line.iter().all(|b| *b == b'\r' || *b == b'\n'))
    }

    fn next_chunk_size(&mut self) -> io::Result<u64> {
        let line = self.read_raw_line()?;
        match httparse::parse_chunk_size(&line) {
            Ok(httparse::Status::Complete((_, size))) => Ok(size),
            Ok(httparse::Status::Partial) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended early",
            )),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid chunk size line {:?}", String::from_utf8_lossy(&line)),
            )),
        }
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            self.remaining = self.next_chunk_size()?;
            if self.remaining == 0 {
                // trailers up to the blank line
                while !self.skip_line()? {}
                self.done = true;
                return Ok(0);
            }
        }
        let max = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended early",
            ));
        }
        self.remaining -= n as u64;
        if self.remaining == 0 {
            self.skip_line()?;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    fn config() -> Config {
        Config::new("http://127.0.0.1:9000")
            .unwrap()
            .with_socket_timeout(Duration::from_secs(2))
            .with_final_timeout(Duration::from_secs(5))
    }

    /// Serves one connection: captures the request and answers with `reply`.
    fn serve_once(reply: &'static [u8]) -> (u16, mpsc::Receiver<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(len) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = len.trim().parse().unwrap();
                }
                head.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = stream;
            stream.write_all(reply).unwrap();
            tx.send((head, body)).unwrap();
        });
        (port, rx)
    }

    fn request<'a>(
        method: Method,
        port: u16,
        body: &'a mut BodySource,
    ) -> http::Request<BackendRequestBody<'a>> {
        http::Request::builder()
            .method(method)
            .uri(format!("http://127.0.0.1:{}/bucket/key?acl", port))
            .header("x-oss-meta-color", "blue")
            .body(body)
            .unwrap()
    }

    #[test]
    fn test_put_with_content_length_response() {
        let (port, rx) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nx-oss-request-id: r1\r\n\r\nhello",
        );
        let mut backend = ConnBackend::new(&config()).unwrap();
        let mut body = BodySource::from("payload");

        let response = backend.call(request(Method::PUT, port, &mut body)).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-oss-request-id"], "r1");
        assert_eq!(&response.into_body().bytes().unwrap()[..], b"hello");

        let (head, sent) = rx.recv().unwrap();
        assert!(head.starts_with("PUT /bucket/key?acl HTTP/1.1\r\n"));
        assert!(head.contains(&format!("host: 127.0.0.1:{}\r\n", port)));
        assert!(head.contains("content-length: 7\r\n"));
        assert!(head.contains("x-oss-meta-color: blue\r\n"));
        assert!(head.contains("connection: close\r\n"));
        assert_eq!(sent, b"payload");
    }

    #[test]
    fn test_chunked_response() {
        let (port, _rx) = serve_once(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n",
        );
        let mut backend = ConnBackend::new(&config()).unwrap();
        let mut body = BodySource::empty();

        let response = backend.call(request(Method::GET, port, &mut body)).unwrap();
        assert_eq!(&response.into_body().bytes().unwrap()[..], b"hello world");
    }

    #[test]
    fn test_body_until_close_and_interim_response() {
        let (port, _rx) = serve_once(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 503 Service Unavailable\r\n\r\nbusy",
        );
        let mut backend = ConnBackend::new(&config()).unwrap();
        let mut body = BodySource::empty();

        let response = backend.call(request(Method::GET, port, &mut body)).unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&response.into_body().bytes().unwrap()[..], b"busy");
    }

    #[test]
    fn test_head_response_has_no_body() {
        let (port, _rx) = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 120\r\n\r\n");
        let mut backend = ConnBackend::new(&config()).unwrap();
        let mut body = BodySource::empty();

        let response = backend.call(request(Method::HEAD, port, &mut body)).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.into_body().bytes().unwrap().is_empty());
    }

    #[test]
    fn test_connection_refused_is_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut backend = ConnBackend::new(&config()).unwrap();
        let mut body = BodySource::empty();

        let err = backend.call(request(Method::GET, port, &mut body)).unwrap_err();
        assert!(matches!(err, OssError::Transport(_)));
    }

    #[test]
    fn test_chunked_reader_rejects_truncated_body() {
        let mut reader = ChunkedReader::new(Cursor::new(b"a\r\nshort".to_vec()));
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_chunked_reader_rejects_bad_size_line() {
        let mut reader = ChunkedReader::new(Cursor::new(b"zz\r\nhello\r\n0\r\n\r\n".to_vec()));
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_chunked_reader_skips_trailers() {
        let data = b"3;name=v\r\nabc\r\n0\r\nx-oss-hash: 1\r\n\r\n".to_vec();
        let mut reader = ChunkedReader::new(Cursor::new(data));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }
}
