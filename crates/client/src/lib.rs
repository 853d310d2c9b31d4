use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

/// The payload is streamed in chunks of this size.
pub const CHUNK_SIZE: usize = 1024;

/// The default address is localhost and port 8080.
pub const DEFAULT_ADDRESS: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    InvalidFileName(PathBuf),
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::IO(value)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IO(e) => write!(f, "io error: {e}"),
            Self::InvalidFileName(path) => write!(f, "invalid file name: {}", path.display()),
        }
    }
}

/// Outcome of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub file_name: String,
    /// Payload bytes written, the file name is not counted.
    pub bytes: u64,
    /// The server echoed the file name back before the payload was sent.
    pub acknowledged: bool,
    /// The server closed its side after the payload, so it has seen all of
    /// it.
    pub confirmed: bool,
}

pub struct IngestClientBuilder {
    address: SocketAddr,
    ack_timeout: Duration,
    close_timeout: Duration,
    chunk_size: usize,
}

impl Default for IngestClientBuilder {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            ack_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(5),
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl IngestClientBuilder {
    pub fn with_address(&mut self, address: SocketAddr) -> &mut Self {
        self.address = address;
        self
    }

    /// How long to wait for the file name echo before sending the payload
    /// anyway.
    pub fn with_ack_timeout(&mut self, ack_timeout: Duration) -> &mut Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// How long to wait for the server to close the connection once the
    /// payload is sent.
    pub fn with_close_timeout(&mut self, close_timeout: Duration) -> &mut Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn with_chunk_size(&mut self, chunk_size: usize) -> &mut Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn build(&self) -> IngestClient {
        IngestClient {
            address: self.address,
            ack_timeout: self.ack_timeout,
            close_timeout: self.close_timeout,
            chunk_size: self.chunk_size,
        }
    }
}

/// Ingest client
///
/// One transfer per connection: the base name of the file goes first, as
/// is, then the contents in fixed size chunks with nothing in between, and
/// the connection is closed to mark the end of the file.
#[derive(Debug, Clone)]
pub struct IngestClient {
    address: SocketAddr,
    ack_timeout: Duration,
    close_timeout: Duration,
    chunk_size: usize,
}

impl IngestClient {
    pub fn builder() -> IngestClientBuilder {
        IngestClientBuilder::default()
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Send a file from disk, the server stores it under its base name.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<SendReport, Error> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidFileName(path.to_path_buf()))?;

        let file = File::open(path).await?;
        self.send(name, file).await
    }

    /// Send the contents of `reader` under the given file name.
    pub async fn send<R>(&self, name: &str, mut reader: R) -> Result<SendReport, Error>
    where
        R: AsyncRead + Unpin,
    {
        if name.is_empty() {
            return Err(Error::InvalidFileName(PathBuf::from(name)));
        }

        let mut stream = TcpStream::connect(self.address).await?;
        log::info!("connected: addr={}, file={name}", self.address);

        stream.write_all(name.as_bytes()).await?;
        let acknowledged = self.wait_ack(&mut stream, name.as_bytes()).await?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut bytes = 0;

        loop {
            let size = reader.read(&mut buffer).await?;
            if size == 0 {
                break;
            }

            stream.write_all(&buffer[..size]).await?;
            bytes += size as u64;
        }

        stream.shutdown().await?;

        let confirmed = self.wait_close(&mut stream).await;
        log::info!("file sent: file={name}, size={bytes}, acknowledged={acknowledged}, confirmed={confirmed}");

        Ok(SendReport {
            file_name: name.to_string(),
            acknowledged,
            confirmed,
            bytes,
        })
    }

    async fn wait_ack(&self, stream: &mut TcpStream, name: &[u8]) -> Result<bool, Error> {
        let mut echo = vec![0u8; name.len()];

        match timeout(self.ack_timeout, stream.read_exact(&mut echo)).await {
            Ok(Ok(_)) if echo == name => Ok(true),
            Ok(Ok(_)) => {
                log::warn!("file name echo does not match: sent={name:?}, received={echo:?}");

                Ok(false)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                log::warn!("no file name echo within {:?}, sending anyway", self.ack_timeout);

                Ok(false)
            }
        }
    }

    async fn wait_close(&self, stream: &mut TcpStream) -> bool {
        let mut buffer = [0u8; 64];

        let drain = async {
            loop {
                match stream.read(&mut buffer).await {
                    Ok(0) => return true,
                    Ok(_) => (),
                    // A reset after our close still means the server is done
                    // with the connection.
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return true,
                    Err(_) => return false,
                }
            }
        };

        timeout(self.close_timeout, drain).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    /// Accepts one connection, echoes the first read and collects the rest.
    async fn fake_server(listener: TcpListener, echo: bool) -> io::Result<(Vec<u8>, Vec<u8>)> {
        let (mut socket, _) = listener.accept().await?;

        let mut buffer = [0u8; 1024];
        let size = socket.read(&mut buffer).await?;
        let name = buffer[..size].to_vec();

        if echo {
            socket.write_all(&name).await?;
        }

        let mut payload = Vec::new();
        socket.read_to_end(&mut payload).await?;

        Ok((name, payload))
    }

    #[tokio::test]
    async fn sends_name_then_payload() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let client = IngestClient::builder()
            .with_address(listener.local_addr()?)
            .build();

        assert_eq!(client.address(), listener.local_addr()?);
        let server = tokio::spawn(fake_server(listener, true));

        let payload = vec![7u8; 3000];
        let report = client.send("report.txt", payload.as_slice()).await?;

        let (name, received) = server.await??;
        assert_eq!(name, b"report.txt");
        assert_eq!(received, payload);

        assert_eq!(report.bytes, 3000);
        assert!(report.acknowledged);
        assert!(report.confirmed);

        Ok(())
    }

    #[tokio::test]
    async fn missing_echo_is_not_fatal() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let client = IngestClient::builder()
            .with_address(listener.local_addr()?)
            .with_ack_timeout(Duration::from_millis(50))
            .build();

        let server = tokio::spawn(fake_server(listener, false));
        let report = client.send("silent.bin", &b"payload"[..]).await?;

        let (_, received) = server.await??;
        assert_eq!(received, b"payload");
        assert!(!report.acknowledged);

        Ok(())
    }

    #[tokio::test]
    async fn open_connection_is_not_confirmed() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let client = IngestClient::builder()
            .with_address(listener.local_addr()?)
            .with_close_timeout(Duration::from_millis(100))
            .build();

        // Echo the name, then hold the connection open without reading on.
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut buffer = [0u8; 64];
            let size = socket.read(&mut buffer).await?;
            socket.write_all(&buffer[..size]).await?;

            tokio::time::sleep(Duration::from_secs(1)).await;
            io::Result::Ok(())
        });

        let report = client.send("held.bin", &b"data"[..]).await?;
        assert!(report.acknowledged);
        assert!(!report.confirmed);

        server.await??;
        Ok(())
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let client = IngestClient::builder().build();

        assert!(matches!(
            client.send("", &b""[..]).await,
            Err(Error::InvalidFileName(_))
        ));
    }

    #[tokio::test]
    async fn send_file_uses_base_name() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let client = IngestClient::builder()
            .with_address(listener.local_addr()?)
            .build();

        let path = std::env::temp_dir().join(format!("ingest-client-{}.txt", std::process::id()));
        tokio::fs::write(&path, b"from disk").await?;

        let server = tokio::spawn(fake_server(listener, true));
        let report = client.send_file(&path).await?;
        tokio::fs::remove_file(&path).await?;

        let (name, received) = server.await??;
        assert_eq!(Some(name.as_slice()), path.file_name().map(|it| it.as_encoded_bytes()));
        assert_eq!(received, b"from disk");
        assert_eq!(report.bytes, 9);

        Ok(())
    }
}
