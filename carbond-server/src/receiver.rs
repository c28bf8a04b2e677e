//! TCP and UDP line receivers. Both stop when the shutdown channel flips to `true`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use carbond_storage::MetricDatabase;

use crate::protocol::process_payload;

const MAX_DATAGRAM: usize = 65_535;

pub async fn bind_tcp(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
}

pub async fn bind_udp(port: u16) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
}

/// Accept connections until shutdown; each connection is read line by line.
///
/// Returns once every connection task has finished, so nothing is appended after it.
pub async fn run_tcp(
    listener: TcpListener,
    db: Arc<MetricDatabase>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "TCP line receiver listening");
    }

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        connections.spawn(handle_connection(stream, peer, db.clone(), shutdown.clone()));
                    }
                    Err(e) => error!("accept failed: {}", e),
                }
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!("connection task failed: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    while let Some(finished) = connections.join_next().await {
        if let Err(e) = finished {
            error!("connection task failed: {}", e);
        }
    }
    info!("TCP line receiver stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    db: Arc<MetricDatabase>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        tokio::select! {
            read = reader.read_until(b'\n', &mut line) => {
                match read {
                    Ok(0) => break,
                    Ok(_) => match std::str::from_utf8(&line) {
                        Ok(text) => {
                            process_payload(&db, text);
                        }
                        Err(_) => {
                            db.stats().record_malformed_line();
                            warn!(%peer, "line is not UTF-8");
                        }
                    },
                    Err(e) => {
                        warn!(%peer, "read failed: {}", e);
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!(%peer, "connection closed");
}

/// Receive datagrams until shutdown; each datagram may carry several lines
pub async fn run_udp(socket: UdpSocket, db: Arc<MetricDatabase>, mut shutdown: watch::Receiver<bool>) {
    if let Ok(addr) = socket.local_addr() {
        info!(%addr, "UDP line receiver listening");
    }
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, peer)) => match std::str::from_utf8(&buf[..len]) {
                        Ok(payload) => {
                            let report = process_payload(&db, payload);
                            debug!(%peer, accepted = report.accepted, rejected = report.rejected, "datagram");
                        }
                        Err(_) => {
                            db.stats().record_malformed_line();
                            warn!(%peer, "datagram is not UTF-8");
                        }
                    },
                    Err(e) => error!("receive failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("UDP line receiver stopped");
}
