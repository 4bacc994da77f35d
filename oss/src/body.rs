//! Request bodies that can be replayed from their start between attempts.
//!
//! Every variant enforces its declared length: reads never return more than
//! `declared_length - consumed` bytes and report end-of-data exactly when
//! that reaches zero, even when the underlying source holds more.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::RearmError;

/// A readable handle that can also seek, blanket-implemented.
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

pub enum BodySource {
    Empty,
    Memory(MemoryBody),
    Stream(StreamBody),
    File(FileBody),
}

pub struct MemoryBody {
    data: Bytes,
    pos: usize,
}

enum StreamHandle {
    Seekable(Box<dyn SeekRead>),
    OneShot(Box<dyn Read + Send>),
}

pub struct StreamBody {
    handle: StreamHandle,
    mark: u64,
    declared: u64,
    consumed: u64,
}

pub struct FileBody {
    path: PathBuf,
    mark: u64,
    declared: u64,
    consumed: u64,
    file: Option<File>,
}

impl BodySource {
    pub fn empty() -> Self {
        BodySource::Empty
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            return BodySource::Empty;
        }
        BodySource::Memory(MemoryBody { data, pos: 0 })
    }

    /// A seekable stream truncated to `declared` bytes. The current position
    /// of `reader` becomes the mark that `rearm` returns to.
    pub fn seekable<R: SeekRead + 'static>(mut reader: R, declared: u64) -> io::Result<Self> {
        let mark = reader.stream_position()?;
        Ok(BodySource::Stream(StreamBody {
            handle: StreamHandle::Seekable(Box::new(reader)),
            mark,
            declared,
            consumed: 0,
        }))
    }

    /// A stream that can be read only once. Requests carrying it are never
    /// retried.
    pub fn one_shot<R: Read + Send + 'static>(reader: R, declared: u64) -> Self {
        BodySource::Stream(StreamBody {
            handle: StreamHandle::OneShot(Box::new(reader)),
            mark: 0,
            declared,
            consumed: 0,
        })
    }

    /// A file region starting at `mark`. Without `len` the body runs to the
    /// end of the file.
    pub fn file(path: impl AsRef<Path>, mark: u64, len: Option<u64>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let size = file.metadata()?.len();
        let available = size.saturating_sub(mark);
        let declared = len.map_or(available, |len| len.min(available));
        file.seek(SeekFrom::Start(mark))?;
        Ok(BodySource::File(FileBody {
            path,
            mark,
            declared,
            consumed: 0,
            file: Some(file),
        }))
    }

    pub fn declared_length(&self) -> u64 {
        match self {
            BodySource::Empty => 0,
            BodySource::Memory(body) => body.data.len() as u64,
            BodySource::Stream(body) => body.declared,
            BodySource::File(body) => body.declared,
        }
    }

    pub fn remaining(&self) -> u64 {
        match self {
            BodySource::Empty => 0,
            BodySource::Memory(body) => (body.data.len() - body.pos) as u64,
            BodySource::Stream(body) => body.declared - body.consumed,
            BodySource::File(body) => body.declared - body.consumed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.declared_length() == 0
    }

    /// Whether `rearm` can succeed for this source.
    pub fn is_rearmable(&self) -> bool {
        !matches!(
            self,
            BodySource::Stream(StreamBody {
                handle: StreamHandle::OneShot(_),
                ..
            })
        )
    }

    /// Reads at most the remaining declared length into `buf`. The flag is
    /// `true` once the body is exhausted, either because the declared length
    /// has been consumed or because the underlying source ran dry.
    pub fn read_bounded(&mut self, buf: &mut [u8]) -> io::Result<(usize, bool)> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok((0, true));
        }
        if buf.is_empty() {
            return Ok((0, false));
        }
        let limit = (buf.len() as u64).min(remaining) as usize;
        let buf = &mut buf[..limit];
        let n = match self {
            BodySource::Empty => 0,
            BodySource::Memory(body) => {
                let end = body.pos + limit;
                buf.copy_from_slice(&body.data[body.pos..end]);
                body.pos = end;
                limit
            }
            BodySource::Stream(body) => {
                let n = match &mut body.handle {
                    StreamHandle::Seekable(reader) => reader.read(buf)?,
                    StreamHandle::OneShot(reader) => reader.read(buf)?,
                };
                body.consumed += n as u64;
                n
            }
            BodySource::File(body) => {
                let file = match body.file.as_mut() {
                    Some(file) => file,
                    None => return Err(io::Error::new(io::ErrorKind::Other, "file body is closed")),
                };
                let n = file.read(buf)?;
                body.consumed += n as u64;
                n
            }
        };
        if n == 0 {
            log::debug!(
                "Body source ended {} bytes short of its declared length",
                remaining
            );
            return Ok((0, true));
        }
        Ok((n, n as u64 == remaining))
    }

    /// Resets the source so the next read starts again at its mark. File
    /// bodies reopen their file, since a failed attempt may have closed it.
    pub fn rearm(&mut self) -> Result<(), RearmError> {
        match self {
            BodySource::Empty => Ok(()),
            BodySource::Memory(body) => {
                body.pos = 0;
                Ok(())
            }
            BodySource::Stream(body) => match &mut body.handle {
                StreamHandle::Seekable(reader) => {
                    reader.seek(SeekFrom::Start(body.mark))?;
                    body.consumed = 0;
                    Ok(())
                }
                StreamHandle::OneShot(_) => Err(RearmError::NotSeekable),
            },
            BodySource::File(body) => {
                body.file = None;
                let mut file = File::open(&body.path)?;
                file.seek(SeekFrom::Start(body.mark))?;
                body.file = Some(file);
                body.consumed = 0;
                Ok(())
            }
        }
    }
}

impl Default for BodySource {
    fn default() -> Self {
        BodySource::Empty
    }
}

impl Read for BodySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_bounded(buf).map(|(n, _)| n)
    }
}

impl From<Vec<u8>> for BodySource {
    fn from(data: Vec<u8>) -> Self {
        BodySource::from_bytes(data)
    }
}

impl From<String> for BodySource {
    fn from(data: String) -> Self {
        BodySource::from_bytes(data)
    }
}

impl From<&'static str> for BodySource {
    fn from(data: &'static str) -> Self {
        BodySource::from_bytes(data)
    }
}

impl From<&'static [u8]> for BodySource {
    fn from(data: &'static [u8]) -> Self {
        BodySource::from_bytes(data)
    }
}

impl From<Bytes> for BodySource {
    fn from(data: Bytes) -> Self {
        BodySource::from_bytes(data)
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Empty => f.write_str("Empty"),
            BodySource::Memory(body) => f
                .debug_struct("Memory")
                .field("len", &body.data.len())
                .field("pos", &body.pos)
                .finish(),
            BodySource::Stream(body) => f
                .debug_struct("Stream")
                .field("rearmable", &matches!(body.handle, StreamHandle::Seekable(_)))
                .field("mark", &body.mark)
                .field("declared", &body.declared)
                .field("consumed", &body.consumed)
                .finish(),
            BodySource::File(body) => f
                .debug_struct("File")
                .field("path", &body.path)
                .field("mark", &body.mark)
                .field("declared", &body.declared)
                .field("consumed", &body.consumed)
                .finish(),
        }
    }
}
