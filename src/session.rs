use std::{
    ffi::OsStr,
    io,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
};

use crate::sink::Sink;

/// The status of a connection slot.
///
/// `Disconnected` is a free slot. `Connected`, `FileNameReceived` and
/// `ReceivingFile` are the live phases of a session. `Completed` and `Error`
/// are terminal and only ever appear in a [`Report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Disconnected,
    Connected,
    FileNameReceived,
    ReceivingFile,
    Completed,
    Error,
}

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    InvalidFileName(String),
    IdleTimeout,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::InvalidFileName(name) => write!(f, "invalid file name: {name:?}"),
            Self::IdleTimeout => write!(f, "idle timeout"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// What a chunk did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The chunk was taken as the file name and must be echoed back.
    FileName,
    /// The chunk was appended to the destination file.
    Payload(usize),
}

/// Record emitted when a slot is reclaimed.
#[derive(Debug)]
pub struct Report {
    pub slot: usize,
    pub peer: SocketAddr,
    /// Either `Completed` or `Error`.
    pub status: Status,
    /// Absent when the peer left before sending a file name.
    pub path: Option<PathBuf>,
    pub bytes: u64,
    pub error: Option<Error>,
}

#[derive(Debug)]
enum Phase {
    Connected,
    Receiving {
        path: PathBuf,
        bytes: u64,
        chunks: u64,
    },
}

/// Per connection state machine.
///
/// The first chunk read on a connection is the whole file name, every chunk
/// after that is payload. The destination path is fixed once, on the switch
/// from `Connected` to `FileNameReceived`, and the received byte count only
/// ever grows from there.
#[derive(Debug)]
pub struct Session {
    peer: SocketAddr,
    phase: Phase,
}

impl Session {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            phase: Phase::Connected,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn status(&self) -> Status {
        match self.phase {
            Phase::Connected => Status::Connected,
            Phase::Receiving { chunks: 0, .. } => Status::FileNameReceived,
            Phase::Receiving { .. } => Status::ReceivingFile,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.phase {
            Phase::Connected => None,
            Phase::Receiving { path, .. } => Some(path),
        }
    }

    pub fn bytes_received(&self) -> u64 {
        match self.phase {
            Phase::Connected => 0,
            Phase::Receiving { bytes, .. } => bytes,
        }
    }

    /// Feed one chunk read from the socket.
    ///
    /// No file is created when the name arrives, the first payload chunk
    /// creates it through the sink.
    pub fn on_chunk<S>(&mut self, chunk: &[u8], folder: &Path, sink: &S) -> Result<Transition, Error>
    where
        S: Sink,
    {
        if let Phase::Receiving {
            path,
            bytes,
            chunks,
        } = &mut self.phase
        {
            sink.append(path, chunk)?;

            *bytes += chunk.len() as u64;
            *chunks += 1;

            return Ok(Transition::Payload(chunk.len()));
        }

        let name = file_name(chunk)?;
        self.phase = Phase::Receiving {
            path: folder.join(name),
            bytes: 0,
            chunks: 0,
        };

        Ok(Transition::FileName)
    }

    /// Close the session, a missing error means the peer hung up cleanly.
    pub fn into_report(self, slot: usize, error: Option<Error>) -> Report {
        let (path, bytes) = match self.phase {
            Phase::Connected => (None, 0),
            Phase::Receiving { path, bytes, .. } => (Some(path), bytes),
        };

        Report {
            status: if error.is_some() {
                Status::Error
            } else {
                Status::Completed
            },
            peer: self.peer,
            error,
            slot,
            path,
            bytes,
        }
    }
}

/// Interpret a chunk as a file name.
///
/// Trailing NUL bytes are dropped, clients written in C tend to send the
/// terminator along. The rest is taken as raw bytes, any encoding goes, but
/// it must be exactly one plain path component so nothing can be written
/// outside the ingest folder.
///
/// ```
/// use ingest_server::session::file_name;
///
/// assert_eq!(file_name(b"report.txt").unwrap(), "report.txt");
/// assert_eq!(file_name(b"report.txt\0").unwrap(), "report.txt");
///
/// assert!(file_name(b"../etc/passwd").is_err());
/// assert!(file_name(b"a/b").is_err());
/// assert!(file_name(b"..").is_err());
/// assert!(file_name(b"").is_err());
/// ```
pub fn file_name(chunk: &[u8]) -> Result<&OsStr, Error> {
    let invalid = || Error::InvalidFileName(String::from_utf8_lossy(chunk).into_owned());

    let end = chunk
        .iter()
        .rposition(|byte| *byte != 0)
        .map(|index| index + 1)
        .unwrap_or(0);

    let bytes = &chunk[..end];
    if bytes.contains(&b'/') || bytes.contains(&0) {
        return Err(invalid());
    }

    let name = os_str(bytes).ok_or_else(invalid)?;
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(invalid()),
    }
}

#[cfg(unix)]
fn os_str(bytes: &[u8]) -> Option<&OsStr> {
    use std::os::unix::ffi::OsStrExt;

    Some(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn os_str(bytes: &[u8]) -> Option<&OsStr> {
    std::str::from_utf8(bytes).ok().map(OsStr::new)
}
