use std::net::SocketAddr;

use crate::{
    format::format_bytes,
    session::{Report, Status},
};

/// Receives the records produced by the event loop.
///
/// Every method has an empty default, implementors only pick the events they
/// care about.
pub trait Observer {
    /// A connection was accepted into a slot.
    #[allow(unused_variables)]
    fn accepted(&self, slot: usize, peer: SocketAddr) {}

    /// A connection arrived while every slot was taken and was closed.
    #[allow(unused_variables)]
    fn rejected(&self, peer: SocketAddr) {}

    /// A slot was reclaimed, either the transfer completed or it failed.
    #[allow(unused_variables)]
    fn closed(&self, report: Report) {}
}

/// The default observer, writes every record to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct Logger;

impl Observer for Logger {
    fn accepted(&self, slot: usize, peer: SocketAddr) {
        log::info!(
            "new connection: slot={slot}, ip={}, port={}",
            peer.ip(),
            peer.port()
        );
    }

    fn rejected(&self, peer: SocketAddr) {
        log::warn!(
            "connection rejected, all slots are taken: ip={}, port={}",
            peer.ip(),
            peer.port()
        );
    }

    fn closed(&self, report: Report) {
        let path = report
            .path
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<none>".to_string());

        match (report.status, &report.error) {
            (Status::Error, Some(error)) => log::error!(
                "transfer failed: slot={}, addr={}, file={path}, size={}, err={error}",
                report.slot,
                report.peer,
                format_bytes(report.bytes),
            ),
            _ => log::info!(
                "file received: slot={}, addr={}, file={path}, size={}",
                report.slot,
                report.peer,
                format_bytes(report.bytes),
            ),
        }
    }
}
