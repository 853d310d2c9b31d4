use std::{io, net::SocketAddr, time::Duration};

use futures::{FutureExt, StreamExt, stream::FuturesUnordered};
use tokio::{
    net::{TcpListener, TcpStream},
    time::{Instant, sleep, sleep_until},
};

use crate::slots::SlotTable;

/// Pause after an accept error that is not going away by itself, such as
/// running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What woke the event loop.
#[derive(Debug, Default)]
pub struct Readiness {
    /// A connection taken off the listening socket.
    pub accepted: Option<(TcpStream, SocketAddr)>,
    /// Slots with data (or end of stream) waiting, in table order.
    pub readable: Vec<usize>,
    /// The idle deadline passed.
    pub expired: bool,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_none() && self.readable.is_empty() && !self.expired
    }
}

/// Block until the listening socket or any occupied slot is readable, or the
/// deadline passes.
///
/// The wait set is built from the table on every call. Once something is
/// ready, every other socket is polled once more without waiting, so the
/// result holds all the ready slots and not only the first one that fired.
/// Transient accept failures never end the wait.
pub async fn wait<T>(listener: &TcpListener, slots: &SlotTable<T>, deadline: Option<Instant>) -> Readiness
where
    T: AsRef<TcpStream>,
{
    loop {
        let mut readiness = Readiness::default();

        {
            let mut readable = slots
                .iter()
                .map(|(index, entry)| async move {
                    let socket: &TcpStream = entry.as_ref();

                    // A readiness error is left for the read that follows to
                    // report.
                    let _ = socket.readable().await;
                    index
                })
                .collect::<FuturesUnordered<_>>();

            let expired = async {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                accepted = listener.accept() => {
                    readiness.accepted = on_accept(accepted).await;
                }
                Some(_) = readable.next() => {}
                _ = expired => {
                    readiness.expired = true;
                }
            }
        }

        readiness.readable = slots
            .iter()
            .filter(|(_, entry)| {
                let socket: &TcpStream = entry.as_ref();
                socket.readable().now_or_never().is_some()
            })
            .map(|(index, _)| index)
            .collect();

        if readiness.accepted.is_none() {
            if let Some(accepted) = listener.accept().now_or_never() {
                readiness.accepted = on_accept(accepted).await;
            }
        }

        if !readiness.is_empty() {
            return readiness;
        }
    }
}

async fn on_accept(accepted: io::Result<(TcpStream, SocketAddr)>) -> Option<(TcpStream, SocketAddr)> {
    match accepted {
        Ok(it) => Some(it),
        Err(e) if is_transient(&e) => {
            log::debug!("accept interrupted, retrying: err={e}");

            None
        }
        Err(e) => {
            log::error!("tcp accept failed: err={e}");
            sleep(ACCEPT_BACKOFF).await;

            None
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::{io::AsyncWriteExt, time::timeout};

    struct Entry(TcpStream);

    impl AsRef<TcpStream> for Entry {
        fn as_ref(&self) -> &TcpStream {
            &self.0
        }
    }

    async fn accept_into(listener: &TcpListener, slots: &mut SlotTable<Entry>) -> anyhow::Result<usize> {
        let readiness = timeout(Duration::from_secs(5), wait(listener, slots, None)).await?;
        let (socket, _) = readiness.accepted.ok_or_else(|| anyhow::anyhow!("nothing accepted"))?;

        Ok(slots.allocate(Entry(socket)).map_err(|_| anyhow::anyhow!("table full"))?)
    }

    #[tokio::test]
    async fn reports_pending_connection() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let mut slots = SlotTable::new(4);

        let _client = TcpStream::connect(listener.local_addr()?).await?;
        assert_eq!(accept_into(&listener, &mut slots).await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn reports_every_readable_slot_in_order() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let mut slots = SlotTable::new(4);

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(TcpStream::connect(listener.local_addr()?).await?);
            accept_into(&listener, &mut slots).await?;
        }

        clients[2].write_all(b"two").await?;
        clients[0].write_all(b"zero").await?;

        // Both writes are in flight, wait until both have landed.
        let mut readable = Vec::new();
        for _ in 0..50 {
            let readiness = timeout(Duration::from_secs(5), wait(&listener, &slots, None)).await?;
            readable = readiness.readable;

            if readable.len() == 2 {
                break;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(readable, vec![0, 2]);

        Ok(())
    }

    #[tokio::test]
    async fn deadline_wakes_an_idle_wait() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let slots = SlotTable::<Entry>::new(4);

        let deadline = Instant::now() + Duration::from_millis(50);
        let readiness = timeout(Duration::from_secs(5), wait(&listener, &slots, Some(deadline))).await?;

        assert!(readiness.expired);
        assert!(readiness.accepted.is_none());
        assert!(readiness.readable.is_empty());

        Ok(())
    }
}
