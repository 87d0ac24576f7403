use tokio::sync::mpsc;

use crate::{Msg, models::OutboundEvent};

/// Drains every frame queued for a connection.
pub fn received(rx: &mut mpsc::UnboundedReceiver<Msg>) -> Vec<OutboundEvent> {
    let mut events = vec![];
    while let Ok(msg) = rx.try_recv() {
        events.push(serde_json::from_str(&msg).unwrap());
    }
    events
}
