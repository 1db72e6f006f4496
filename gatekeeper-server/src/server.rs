//! WebSocket front end.
//!
//! One binary message per request, answered in order on the same
//! connection. Connections per source IP are capped.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use gatekeeper_core::wire::{ErrorCode, Opcode, Request, Response};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::gate::{Gatekeeper, HandshakeOutcome, Upload};

/// A connection with no request for this long is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Room for the upload header on top of the configured upload limit.
const HEADER_SLACK: usize = 64 * 1024;

type IpConnMap = Arc<DashMap<IpAddr, usize>>;

/// Front-end limits.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Concurrent connections per source IP.
    pub max_conn_per_ip: usize,
    /// Largest accepted upload body.
    pub max_upload: usize,
}

impl From<&ServerConfig> for Limits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_conn_per_ip: config.max_conn_per_ip,
            max_upload: config.max_upload,
        }
    }
}

/// Accept connections until the listener fails.
///
/// The session sweeper must be running separately; see
/// [`crate::store::SessionStore::spawn_sweeper`].
pub async fn run_server(listener: TcpListener, gate: Arc<Gatekeeper>, limits: Limits) {
    let ip_conns: IpConnMap = Arc::new(DashMap::new());

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let ip = peer_addr.ip();
        {
            let mut count = ip_conns.entry(ip).or_insert(0);
            if *count >= limits.max_conn_per_ip {
                debug!(%ip, "connection cap reached");
                continue;
            }
            *count += 1;
        }

        let gate = Arc::clone(&gate);
        let ip_conns = Arc::clone(&ip_conns);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, gate, limits).await {
                debug!(%peer_addr, error = %e, "connection closed with error");
            }
            let mut emptied = false;
            if let Some(mut count) = ip_conns.get_mut(&ip) {
                *count = count.saturating_sub(1);
                emptied = *count == 0;
            }
            if emptied {
                ip_conns.remove_if(&ip, |_, c| *c == 0);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    gate: Arc<Gatekeeper>,
    limits: Limits,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(limits.max_upload + HEADER_SLACK);
    ws_config.max_frame_size = Some(limits.max_upload + HEADER_SLACK);
    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let origin = peer_addr.ip().to_string();
    info!(%peer_addr, "connection opened");

    loop {
        let waiting_since = Instant::now();
        let msg = match tokio::time::timeout(IDLE_TIMEOUT, ws_rx.next()).await {
            Ok(Some(msg)) => msg?,
            Ok(None) => break,
            Err(_) => {
                debug!(%peer_addr, "idle timeout");
                break;
            }
        };
        let response = match msg {
            Message::Binary(data) => {
                handle_message(&gate, &data, &origin, waiting_since.elapsed(), limits.max_upload)
                    .await
            }
            Message::Text(_) => Response::Error(ErrorCode::InvalidFormat),
            Message::Close(_) => break,
            _ => continue,
        };
        let wire = response
            .to_wire()
            .unwrap_or_else(|code| vec![Opcode::Error.to_byte(), code.to_byte()]);
        ws_tx.send(Message::Binary(wire)).await?;
    }

    info!(%peer_addr, "connection closed");
    Ok(())
}

/// Decode one request, run it through the gate and build the response.
pub async fn handle_message(
    gate: &Gatekeeper,
    msg: &[u8],
    origin: &str,
    received_in: Duration,
    max_upload: usize,
) -> Response {
    let request = match Request::parse(msg) {
        Ok(request) => request,
        Err(code) => {
            warn!(origin, code = ?code, "bad request");
            return Response::Error(code);
        }
    };

    match request {
        Request::HandshakeInit { client_public } => {
            match gate.handshake_init(&client_public, origin).await {
                Ok(started) => Response::HandshakeStarted {
                    handshake_id: started.handshake_id,
                    server_public: started.server_public,
                },
                Err(err) => Response::error(err),
            }
        }
        Request::HandshakeValidate {
            handshake_id,
            signature,
        } => {
            let signature = signature.as_ref().map(|s| s.as_slice());
            match gate.handshake_validate(handshake_id, signature, origin).await {
                Ok(HandshakeOutcome::Accepted {
                    session_key,
                    report,
                }) => Response::HandshakeAccepted {
                    session_key,
                    report,
                },
                Ok(HandshakeOutcome::Suspicious(report)) => Response::HandshakeSuspicious(report),
                Err(err) => Response::error(err),
            }
        }
        Request::Upload {
            filename,
            claimed_type,
            data,
        } => {
            if data.len() > max_upload {
                warn!(origin, size = data.len(), max_upload, "upload too large");
                return Response::Error(ErrorCode::PayloadTooLarge);
            }
            let upload = Upload {
                data,
                filename,
                claimed_type,
                upload_duration: received_in,
            };
            match gate.classify_and_decide_file(upload, origin).await {
                Ok(report) => Response::FileDecision(report),
                Err(err) => Response::error(err),
            }
        }
    }
}
