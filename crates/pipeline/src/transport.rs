//! Inbound transports: UDP syslog and newline-delimited readers (stdin).
//!
//! Both hand [`RawLine`]s to the pipeline input and stop when the shutdown
//! flag turns true or the pipeline input closes.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use logwarden_core::Protocol;

use crate::error::PipelineError;
use crate::message::RawLine;

/// Largest UDP payload we accept.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Bind `addr` and forward every datagram until shutdown.
pub async fn serve_udp(
    addr: &str,
    lines: mpsc::Sender<RawLine>,
    shutdown: watch::Receiver<bool>,
) -> Result<u64, PipelineError> {
    let socket = UdpSocket::bind(addr).await?;
    info!(addr = %socket.local_addr()?, "UDP syslog listener bound");
    serve_udp_socket(socket, lines, shutdown).await
}

/// Forward datagrams from an already bound socket. Returns the number of
/// lines forwarded.
///
/// A datagram carrying several newline-separated messages yields one line each.
pub async fn serve_udp_socket(
    socket: UdpSocket,
    lines: mpsc::Sender<RawLine>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64, PipelineError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut forwarded = 0u64;

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = received?;
                let source = peer.ip().to_string();
                for chunk in split_lines(&buf[..len]) {
                    let line = RawLine::received(chunk.to_vec(), source.clone(), Protocol::Udp);
                    if lines.send(line).await.is_err() {
                        debug!("pipeline input closed, stopping UDP listener");
                        return Ok(forwarded);
                    }
                    forwarded += 1;
                }
            }
            _ = stop_requested(&mut shutdown) => break,
        }
    }

    info!(forwarded, "UDP syslog listener stopped");
    Ok(forwarded)
}

/// Forward newline-delimited lines from `reader` until EOF or shutdown.
///
/// Lines are split on raw bytes, so invalid UTF-8 reaches the classifier intact.
pub async fn read_lines<R>(
    mut reader: R,
    source: &str,
    protocol: Protocol,
    lines: mpsc::Sender<RawLine>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64, PipelineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut forwarded = 0u64;

    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            _ = stop_requested(&mut shutdown) => break,
        };
        if read == 0 {
            break;
        }
        let line = trim_line_end(&buf);
        if line.is_empty() {
            continue;
        }
        if lines
            .send(RawLine::received(line.to_vec(), source, protocol))
            .await
            .is_err()
        {
            debug!("pipeline input closed, stopping line reader");
            break;
        }
        forwarded += 1;
    }

    info!(source = %source, forwarded, "line reader finished");
    Ok(forwarded)
}

/// Resolves once the flag is true or its sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | 0) {
        end -= 1;
    }
    &line[..end]
}

fn split_lines(datagram: &[u8]) -> impl Iterator<Item = &[u8]> {
    datagram
        .split(|b| *b == b'\n')
        .map(trim_line_end)
        .filter(|chunk| !chunk.is_empty())
}
