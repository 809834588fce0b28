//! WebSocket front end: listener, handshake and per-connection I/O.

pub mod client;
pub mod game;

pub use client::{ChannelTransport, Client, Outbound};
pub use game::{GameState, run_game_loop};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::Error;
use futures_util::{Sink, SinkExt, StreamExt};
use protocol::packets::client::Handshake;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

/// Close code for anything that is not the OgarX protocol.
const PROTOCOL_ERROR: u16 = 1003;

/// Run the game server.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}/{}", addr, config.server.endpoint.trim_start_matches('/'));

    let tick_interval = config.tick_interval_ms();
    let game_state = Arc::new(RwLock::new(GameState::new(Engine::new(config.clone()))));

    let game_loop_state = Arc::clone(&game_state);
    tokio::spawn(async move {
        run_game_loop(game_loop_state, tick_interval).await;
    });

    let config = Arc::new(config);
    loop {
        let (stream, addr) = listener.accept().await?;
        let game_state = Arc::clone(&game_state);
        let config = Arc::clone(&config);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, game_state, config).await {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection from upgrade to teardown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    game_state: Arc<RwLock<GameState>>,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    let endpoint = config.server.endpoint.trim_start_matches('/').to_string();
    let ws_stream = accept_hdr_async(stream, move |req: &Request, resp: Response| {
        if req.uri().path().trim_start_matches('/').starts_with(&endpoint) {
            Ok(resp)
        } else {
            let mut reject = ErrorResponse::new(Some("Unknown endpoint".to_string()));
            *reject.status_mut() = StatusCode::NOT_FOUND;
            Err(reject)
        }
    })
    .await?;
    info!("New connection from {}", addr);

    let (mut write, mut read) = ws_stream.split();

    let wait = Duration::from_millis(config.server.handshake_timeout_ms);
    let handshake = match timeout(wait, read.next()).await {
        Ok(Some(Ok(Message::Binary(data)))) => Handshake::parse(&data).map_err(Error::from),
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return Ok(()),
        Ok(Some(Ok(_))) => Err(Error::Handshake(protocol::ProtocolError::InvalidHandshake)),
        Ok(Some(Err(e))) => return Err(e.into()),
        Err(_) => {
            warn!("Handshake timeout from {}", addr);
            close(&mut write, PROTOCOL_ERROR, "Handshake timeout").await;
            return Ok(());
        }
    };

    let (transport, mut outbound) = ChannelTransport::new();
    let admitted = match handshake {
        Ok(handshake) => game_state.write().await.join(addr, handshake, transport.clone()),
        Err(e) => Err(e),
    };
    let client_id = match admitted {
        Ok(id) => id,
        Err(e) => {
            warn!("Connection rejected from {}: {}", addr, e);
            close(&mut write, e.close_code(), &e.to_string()).await;
            return Ok(());
        }
    };

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let result = game_state.write().await.handle_packet(client_id, &data);
                        if let Err(e) = result {
                            warn!("Packet error from {}: {}", addr, e);
                            close(&mut write, PROTOCOL_ERROR, &e.to_string()).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            out = outbound.recv() => {
                match out {
                    Some(Outbound::Binary(data)) => {
                        let len = data.len();
                        let sent = write.send(Message::Binary(data)).await;
                        transport.written(len);
                        if let Err(e) = sent {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Some(Outbound::Close(code, reason)) => {
                        close(&mut write, code, &reason).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    game_state.write().await.leave(client_id);
    Ok(())
}

async fn close<S>(write: &mut S, code: u16, reason: &str)
where
    S: Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    let _ = write.send(Message::Close(Some(frame))).await;
}
