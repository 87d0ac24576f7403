//! Allow-listed observers that receive session broadcasts and issue moderation commands.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::{
    ConnId,
    channel::Channel,
    config::normalize_identity,
    models::{ModeratorCommand, OutboundEvent},
    sessions::{SessionChange, SessionRegistry},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unauthorized email")]
    Unauthorized,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandRejected {
    #[error("Connection {0} is not an admin")]
    NotAdmin(ConnId),
    #[error("Target {0} has no live session")]
    UnknownTarget(ConnId),
    #[error("Target {0} is an admin")]
    AdminTarget(ConnId),
}

#[derive(Debug, Default)]
pub struct AdminChannel {
    allow_list: BTreeSet<String>,
    admins: BTreeSet<ConnId>,
}

impl AdminChannel {
    #[must_use]
    pub const fn new(allow_list: BTreeSet<String>) -> Self {
        Self {
            allow_list,
            admins: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn is_admin(&self, id: ConnId) -> bool {
        self.admins.contains(&id)
    }

    #[must_use]
    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }

    fn authorize(&self, identity: &str) -> Result<(), AuthError> {
        if self.allow_list.contains(&normalize_identity(identity)) {
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }

    /// Grants admin status and sends the caller a one-time session snapshot.
    ///
    /// # Errors
    ///
    /// * [`AuthError::Unauthorized`] if `identity` is not on the allow-list
    pub fn login(
        &mut self,
        id: ConnId,
        identity: &str,
        channel: &Channel,
        sessions: &SessionRegistry,
    ) -> Result<(), AuthError> {
        if let Err(err) = self.authorize(identity) {
            log::info!("Admin login rejected for {id}");
            channel.send(id, &OutboundEvent::AdminAuthError(err.to_string()));
            return Err(err);
        }

        log::info!("Admin login accepted for {id}");
        self.admins.insert(id);
        channel.send(id, &OutboundEvent::AdminAuthSuccess(true));
        channel.send(id, &OutboundEvent::SessionsList(sessions.list()));

        Ok(())
    }

    pub fn logout(&mut self, id: ConnId) {
        if self.admins.remove(&id) {
            log::debug!("Admin {id} logged out");
        }
    }

    /// Checks that `id` may send `command` to `target`.
    ///
    /// The target must be a live session that is not itself an admin.
    ///
    /// # Errors
    ///
    /// * [`CommandRejected`] describing why the command is dropped
    pub fn authorize_command(
        &self,
        id: ConnId,
        target: ConnId,
        command: &ModeratorCommand,
        sessions: &SessionRegistry,
    ) -> Result<(), CommandRejected> {
        if !self.is_admin(id) {
            return Err(CommandRejected::NotAdmin(id));
        }
        if !sessions.contains(target) {
            return Err(CommandRejected::UnknownTarget(target));
        }
        if self.is_admin(target) {
            return Err(CommandRejected::AdminTarget(target));
        }
        log::info!("Admin {id} issuing {command:?} to {target}");
        Ok(())
    }

    pub fn broadcast_full_list(&self, channel: &Channel, sessions: &SessionRegistry) {
        if self.admins.is_empty() {
            return;
        }
        let event = OutboundEvent::SessionsList(sessions.list());
        for id in &self.admins {
            channel.send(*id, &event);
        }
    }

    pub fn broadcast_session_update(
        &self,
        channel: &Channel,
        sessions: &SessionRegistry,
        id: ConnId,
    ) {
        if self.admins.is_empty() {
            return;
        }
        let Some(session) = sessions.get(id) else {
            return;
        };
        let event = OutboundEvent::SessionUpdate(session.clone());
        for admin in &self.admins {
            channel.send(*admin, &event);
        }
    }

    /// Publishes whatever broadcast a registry mutation asked for.
    pub fn publish(&self, change: SessionChange, channel: &Channel, sessions: &SessionRegistry) {
        match change {
            SessionChange::FullList => self.broadcast_full_list(channel, sessions),
            SessionChange::Single(id) => self.broadcast_session_update(channel, sessions, id),
            SessionChange::Unchanged => {}
        }
    }
}
