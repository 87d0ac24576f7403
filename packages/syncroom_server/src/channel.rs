//! Addressed delivery to connections and to named groups of connections.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendError};

use crate::{ConnId, Msg, RoomId, models::OutboundEvent};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connection {0} not connected")]
    NoConnection(ConnId),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Send(#[from] SendError<Msg>),
}

/// Outbound queues for every live connection plus the group membership index.
#[derive(Debug, Default)]
pub struct Channel {
    connections: BTreeMap<ConnId, mpsc::UnboundedSender<Msg>>,
    groups: BTreeMap<RoomId, BTreeSet<ConnId>>,
}

impl Channel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, id: ConnId, tx: mpsc::UnboundedSender<Msg>) {
        self.connections.insert(id, tx);
    }

    /// Drops the connection's queue and removes it from every group.
    pub fn disconnect(&mut self, id: ConnId) {
        self.connections.remove(&id);
        self.groups.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
    }

    #[must_use]
    pub fn is_connected(&self, id: ConnId) -> bool {
        self.connections.contains_key(&id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn group_members(&self, group: &str) -> Vec<ConnId> {
        self.groups
            .get(group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn try_send(&self, id: ConnId, event: &OutboundEvent) -> Result<(), ChannelError> {
        let tx = self
            .connections
            .get(&id)
            .ok_or(ChannelError::NoConnection(id))?;
        let message = serde_json::to_string(event)?;
        log::trace!("Sending {event} to {id} size={}", message.len());
        // errors if client disconnected abruptly and hasn't been cleaned up yet
        tx.send(message)?;
        Ok(())
    }

    /// Fire-and-forget delivery to a single connection.
    pub fn send(&self, id: ConnId, event: &OutboundEvent) {
        if let Err(err) = self.try_send(id, event) {
            log::debug!("Failed to send {event} to {id}: {err:?}");
        }
    }

    /// Fire-and-forget delivery to every connection in `group`.
    pub fn send_group(&self, group: &str, event: &OutboundEvent) {
        let Some(members) = self.groups.get(group) else {
            log::trace!("send_group: no group {group}");
            return;
        };
        for id in members {
            self.send(*id, event);
        }
    }

    pub fn join_group(&mut self, id: ConnId, group: &str) {
        self.groups.entry(group.to_string()).or_default().insert(id);
    }

    pub fn leave_group(&mut self, id: ConnId, group: &str) {
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(&id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_utils::received;

    #[test_log::test]
    fn send_group_reaches_only_group_members() {
        let mut channel = Channel::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        channel.connect(1, tx1);
        channel.connect(2, tx2);
        channel.join_group(1, "room");

        channel.send_group("room", &OutboundEvent::YouAreLeader);

        assert_eq!(received(&mut rx1), vec![OutboundEvent::YouAreLeader]);
        assert_eq!(received(&mut rx2), vec![]);
    }

    #[test_log::test]
    fn empty_groups_are_dropped() {
        let mut channel = Channel::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        channel.connect(1, tx);
        channel.join_group(1, "room");

        channel.leave_group(1, "room");

        assert!(channel.groups.is_empty());
    }

    #[test_log::test]
    fn disconnect_removes_group_membership() {
        let mut channel = Channel::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        channel.connect(1, tx1);
        channel.connect(2, tx2);
        channel.join_group(1, "room");
        channel.join_group(2, "room");

        channel.disconnect(1);

        assert!(!channel.is_connected(1));
        assert_eq!(channel.group_members("room"), vec![2]);
    }

    #[test_log::test]
    fn send_to_unknown_connection_is_not_fatal() {
        let channel = Channel::new();

        channel.send(42, &OutboundEvent::YouAreLeader);

        assert!(matches!(
            channel.try_send(42, &OutboundEvent::YouAreLeader),
            Err(ChannelError::NoConnection(42))
        ));
    }
}
