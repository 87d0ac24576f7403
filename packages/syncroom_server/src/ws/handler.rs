//! Per-connection WebSocket loop.
//!
//! Parses inbound frames into [`InboundEvent`]s for the sync server, forwards queued outbound
//! frames to the peer, and keeps the transport alive with pings. A peer that stays silent for
//! [`CLIENT_TIMEOUT`] is disconnected, which runs the same cleanup as a clean close.

#![allow(clippy::future_not_send)]

use std::time::{Duration, Instant};

use actix_ws::Message;
use futures_util::{
    StreamExt as _,
    future::{Either, select},
};
use tokio::{pin, sync::mpsc, time::interval};

use super::server::{HandleError, SyncServerHandle};
use crate::models::InboundEvent;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// # Errors
///
/// * [`HandleError::Closed`] if the sync server stops while the connection is open
#[allow(clippy::cognitive_complexity)]
pub async fn handle_ws(
    sync_server: SyncServerHandle,
    mut session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
) -> Result<(), HandleError> {
    let mut last_heartbeat = Instant::now();
    let mut interval = interval(HEARTBEAT_INTERVAL);

    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();

    let conn_id = sync_server.connect(conn_tx).await?;

    log::debug!("Connection id: {conn_id}");

    let close_reason = loop {
        // most of the futures we process need to be stack-pinned to work with select()

        let tick = interval.tick();
        pin!(tick);

        let msg_rx = conn_rx.recv();
        pin!(msg_rx);

        let messages = select(msg_stream.next(), msg_rx);
        pin!(messages);

        match select(messages, tick).await {
            // events received from the peer
            Either::Left((Either::Left((Some(Ok(msg)), _)), _)) => match msg {
                Message::Ping(bytes) => {
                    last_heartbeat = Instant::now();
                    if let Err(err) = session.pong(&bytes).await {
                        log::debug!("Failed to pong {conn_id}: {err:?}");
                        break None;
                    }
                }

                Message::Pong(_) => {
                    last_heartbeat = Instant::now();
                }

                Message::Text(text) => {
                    last_heartbeat = Instant::now();
                    match serde_json::from_str::<InboundEvent>(&text) {
                        Ok(event) => sync_server.dispatch(conn_id, event)?,
                        Err(err) => log::warn!("Invalid frame from {conn_id}: {err}"),
                    }
                }

                Message::Binary(_) => {
                    last_heartbeat = Instant::now();
                    log::debug!("Ignoring binary frame from {conn_id}");
                }

                Message::Close(reason) => break reason,

                _ => {
                    break None;
                }
            },

            // client WebSocket stream error
            Either::Left((Either::Left((Some(Err(err)), _)), _)) => {
                log::error!("WebSocket stream error: {err}");
                break None;
            }

            // client WebSocket stream ended
            Either::Left((Either::Left((None, _)), _)) => break None,

            // frames queued for this connection by the sync server
            Either::Left((Either::Right((Some(frame), _)), _)) => {
                if let Err(err) = session.text(frame).await {
                    log::debug!("Failed to send frame to {conn_id}: {err:?}");
                    break None;
                }
            }

            // the sync server dropped this connection's sender
            Either::Left((Either::Right((None, _)), _)) => break None,

            // heartbeat internal tick
            Either::Right((_inst, _)) => {
                // if no heartbeat ping/pong received recently, close the connection
                if Instant::now().duration_since(last_heartbeat) > CLIENT_TIMEOUT {
                    log::info!(
                        "client has not sent heartbeat in over {CLIENT_TIMEOUT:?}; disconnecting"
                    );
                    break None;
                }

                // send heartbeat ping
                let _ = session.ping(b"").await;
            }
        }
    };

    sync_server.disconnect(conn_id)?;

    // attempt to close connection gracefully
    let _ = session.close(close_reason).await;

    Ok(())
}
