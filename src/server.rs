use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use bytes::BytesMut;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    time::Instant,
};

use crate::{
    config::Config,
    multiplexer,
    observer::Observer,
    session::{Error, Session, Status, Transition},
    sink::FileSink,
    slots::SlotTable,
    statistics::{Statistics, Stats},
};

/// An occupied slot: the socket and the state of its transfer.
pub struct Client {
    socket: TcpStream,
    session: Session,
    last_active: Instant,
}

impl AsRef<TcpStream> for Client {
    fn as_ref(&self) -> &TcpStream {
        &self.socket
    }
}

/// The ingest server.
///
/// Everything happens on the task that drives [`Server::run`]: the
/// multiplexer wait is the only place it suspends, so the slot table is
/// only ever touched between two waits and needs no locking.
pub struct Server<O> {
    listener: TcpListener,
    slots: SlotTable<Client>,
    folder: PathBuf,
    buffer: BytesMut,
    idle_timeout: Option<Duration>,
    statistics: Statistics,
    observer: O,
    sink: FileSink,
}

impl<O> Server<O>
where
    O: Observer,
{
    /// Create the listening socket.
    ///
    /// Any failure here is a startup failure, no server is created.
    pub async fn bind(config: &Config, statistics: Statistics, observer: O) -> Result<Self> {
        let socket = match config.listen {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        socket.set_reuseaddr(true)?;
        socket.bind(config.listen)?;

        Ok(Self {
            listener: socket.listen(config.server.backlog)?,
            slots: SlotTable::new(config.server.max_clients),
            folder: config.folder.clone(),
            buffer: BytesMut::zeroed(config.server.buffer_size),
            idle_timeout: match config.server.idle_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs as u64)),
            },
            sink: FileSink,
            statistics,
            observer,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Number of occupied slots.
    pub fn active(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Status of a slot, `Disconnected` when it is free.
    pub fn status(&self, slot: usize) -> Status {
        self.slots
            .get(slot)
            .map(|client| client.session.status())
            .unwrap_or(Status::Disconnected)
    }

    /// Serve connections until the process is stopped.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.serve_once().await;
        }
    }

    /// Run a single iteration of the event loop.
    ///
    /// New connections are taken first, then every ready slot gets exactly
    /// one read, in table order.
    pub async fn serve_once(&mut self) {
        let deadline = self.next_deadline();
        let readiness = multiplexer::wait(&self.listener, &self.slots, deadline).await;

        if let Some((socket, peer)) = readiness.accepted {
            self.accept(socket, peer);
        }

        for slot in readiness.readable {
            self.service(slot);
        }

        if readiness.expired {
            self.reap_idle(Instant::now());
        }
    }

    fn accept(&mut self, socket: TcpStream, peer: SocketAddr) {
        let client = Client {
            session: Session::new(peer),
            last_active: Instant::now(),
            socket,
        };

        match self.slots.allocate(client) {
            Ok(slot) => {
                self.statistics.send(&[Stats::Accepted(1)]);
                self.observer.accepted(slot, peer);
            }
            Err(full) => {
                // Dropping the client closes the socket.
                drop(full.into_inner());

                self.statistics.send(&[Stats::Rejected(1)]);
                self.observer.rejected(peer);
            }
        }
    }

    fn service(&mut self, slot: usize) {
        let Some(client) = self.slots.get_mut(slot) else {
            return;
        };

        let size = match client.socket.try_read(&mut self.buffer) {
            Ok(size) => size,
            // Spurious wakeup, the socket comes back on the next readiness
            // notification.
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                return;
            }
            Err(e) => return self.close(slot, Some(e.into())),
        };

        // When the received message is 0, it means that the socket has been
        // closed.
        if size == 0 {
            return self.close(slot, None);
        }

        client.last_active = Instant::now();

        let chunk = &self.buffer[..size];
        match client.session.on_chunk(chunk, &self.folder, &self.sink) {
            Ok(Transition::FileName) => {
                log::debug!(
                    "file name received: slot={slot}, addr={}, file={:?}",
                    client.session.peer(),
                    client.session.path(),
                );

                // The echo is an acknowledgement only, a short write is not
                // worth blocking the loop for.
                match client.socket.try_write(chunk) {
                    Ok(written) if written == size => (),
                    Ok(written) => {
                        log::warn!("file name echo truncated: slot={slot}, size={size}, written={written}");
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        log::warn!("file name echo dropped, socket is not writable: slot={slot}");
                    }
                    Err(e) => self.close(slot, Some(e.into())),
                }
            }
            Ok(Transition::Payload(size)) => {
                log::trace!(
                    "payload received: slot={slot}, size={size}, total={}",
                    client.session.bytes_received()
                );

                self.statistics.send(&[Stats::ReceivedBytes(size)]);
            }
            Err(e) => self.close(slot, Some(e)),
        }
    }

    /// Reclaim a slot and report how the transfer ended.
    fn close(&mut self, slot: usize, error: Option<Error>) {
        let Some(Client {
            socket, session, ..
        }) = self.slots.release(slot)
        else {
            return;
        };

        drop(socket);

        self.statistics.send(&[if error.is_some() {
            Stats::Failed(1)
        } else {
            Stats::Completed(1)
        }]);

        self.observer.closed(session.into_report(slot, error));
    }

    fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.idle_timeout?;

        self.slots
            .iter()
            .map(|(_, client)| client.last_active + timeout)
            .min()
    }

    fn reap_idle(&mut self, now: Instant) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };

        let expired = self
            .slots
            .iter()
            .filter(|(_, client)| now.saturating_duration_since(client.last_active) >= timeout)
            .map(|(slot, _)| slot)
            .collect::<Vec<_>>();

        for slot in expired {
            log::info!("connection idle for too long: slot={slot}, timeout={timeout:?}");

            self.close(slot, Some(Error::IdleTimeout));
        }
    }
}
