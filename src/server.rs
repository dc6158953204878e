//! WebSocket front door: one task and one [`SessionContext`] per connection.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{FutureExt, SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::auth::{token_from_query, Authenticator, AUTH_FAILED_CLOSE_CODE};
use crate::protocol::ServerMessage;
use crate::recorder::SessionRecorder;
use crate::session::{SessionContext, SessionServices};

pub const BINARY_FRAME_MESSAGE: &str = "Binary messages are not supported; send JSON text.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error while handling the message.";

pub struct ServerState<R> {
    pub services: SessionServices<R>,
    pub auth: Arc<dyn Authenticator>,
}

impl<R> Clone for ServerState<R> {
    fn clone(&self) -> Self {
        Self {
            services: self.services.clone(),
            auth: Arc::clone(&self.auth),
        }
    }
}

/// Accepts connections until the listener fails.
pub async fn serve<R: SessionRecorder>(listener: TcpListener, state: ServerState<R>) -> Result<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{addr}: set_nodelay failed: {e}");
        }

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, state).await {
                warn!("{addr}: {e:#}");
            }
        });
    }
}

async fn handle_connection<R: SessionRecorder>(
    stream: TcpStream,
    addr: SocketAddr,
    state: ServerState<R>,
) -> Result<()> {
    let mut token = None;
    let mut ws = accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        token = token_from_query(request.uri().query()).map(str::to_owned);
        Ok(response)
    })
    .await
    .context("websocket handshake failed")?;

    let Some(principal) = token.as_deref().and_then(|t| state.auth.authenticate(t)) else {
        info!("{addr}: rejected, missing or unknown token");
        ws.close(Some(CloseFrame {
            code: CloseCode::Library(AUTH_FAILED_CLOSE_CODE),
            reason: "authentication failed".into(),
        }))
        .await?;
        return Ok(());
    };

    info!("{addr}: connected as {} (user {})", principal.username, principal.user_id);
    let (mut sink, mut incoming) = ws.split();
    let mut ctx = SessionContext::new(principal, state.services.clone());

    let outcome: Result<()> = async {
        while let Some(message) = incoming.next().await {
            let replies = match message? {
                // a panicking handler must not skip the close() below
                Message::Text(text) => {
                    let handled = AssertUnwindSafe(ctx.handle_text(&text)).catch_unwind().await;
                    handled.unwrap_or_else(|_| {
                        error!("{addr}: handler panicked on a message");
                        vec![ServerMessage::error(INTERNAL_ERROR_MESSAGE)]
                    })
                }
                Message::Binary(_) => vec![ServerMessage::error(BINARY_FRAME_MESSAGE)],
                Message::Close(_) => break,
                _ => continue,
            };
            for reply in replies {
                sink.send(Message::Text(reply.to_json()?)).await?;
            }
        }
        Ok(())
    }
    .await;

    // finalize whatever is still running, however the loop ended
    if let Ok(Some(summary)) = ctx.close().await {
        info!(
            "{addr}: session {} closed on disconnect ({} frames)",
            summary.session_id, summary.total_frames_analyzed
        );
    }
    info!("{addr}: disconnected");
    outcome
}
