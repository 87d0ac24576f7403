//! The coordinator that owns every registry.
//!
//! All inbound events, disconnects and reaper ticks are queued as [`Command`]s and handled one
//! at a time by [`SyncServer::run`], so no two handlers ever touch the registries concurrently.

use std::{io, time::Duration};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    ConnId, Msg,
    admin::AdminChannel,
    channel::Channel,
    config::Config,
    models::{InboundEvent, ModeratorCommand, OutboundEvent},
    now_millis,
    rooms::RoomManager,
    sessions::{SessionChange, SessionRegistry},
};

/// A command received by the [`SyncServer`].
#[derive(Debug)]
enum Command {
    Connect {
        conn_tx: mpsc::UnboundedSender<Msg>,
        res_tx: oneshot::Sender<ConnId>,
    },

    Disconnect {
        conn: ConnId,
    },

    Event {
        conn: ConnId,
        event: InboundEvent,
    },

    Reap,
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("Sync server is not running")]
    Closed,
}

#[derive(Debug)]
pub struct SyncServer {
    channel: Channel,
    sessions: SessionRegistry,
    admins: AdminChannel,
    rooms: RoomManager,
    session_timeout: Duration,
    next_conn_id: ConnId,

    /// Command receiver.
    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

impl SyncServer {
    #[must_use]
    pub fn new(config: &Config) -> (Self, SyncServerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        (
            Self {
                channel: Channel::new(),
                sessions: SessionRegistry::new(),
                admins: AdminChannel::new(config.admin_identities.clone()),
                rooms: RoomManager::new(),
                session_timeout: config.session_timeout,
                next_conn_id: 1,
                cmd_rx,
            },
            SyncServerHandle { cmd_tx },
        )
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub const fn admins(&self) -> &AdminChannel {
        &self.admins
    }

    #[must_use]
    pub const fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    fn publish(&self, change: SessionChange) {
        self.admins.publish(change, &self.channel, &self.sessions);
    }

    /// Registers a new connection and assigns it the next connection ID.
    pub fn connect(&mut self, conn_tx: mpsc::UnboundedSender<Msg>) -> ConnId {
        let id = self.next_conn_id;
        self.next_conn_id += 1;

        self.channel.connect(id, conn_tx);
        log::info!(
            "New connection: {id} ({} live)",
            self.channel.connection_count()
        );

        id
    }

    /// Runs the full cleanup for a connection: room leave, admin revoke, session delete.
    pub fn disconnect(&mut self, conn: ConnId) {
        self.rooms
            .leave_room(conn, &mut self.channel, &self.sessions);
        self.admins.logout(conn);
        let change = self.sessions.remove(conn);
        self.publish(change);
        self.channel.disconnect(conn);

        log::info!(
            "Disconnected: {conn} ({} live)",
            self.channel.connection_count()
        );
    }

    pub fn reap(&mut self, now: i64) {
        let max_idle = i64::try_from(self.session_timeout.as_millis()).unwrap_or(i64::MAX);
        let change = self.sessions.reap(now, max_idle);
        self.publish(change);
    }

    pub fn handle_event(&mut self, conn: ConnId, event: InboundEvent, now: i64) {
        log::debug!("handle_event: {event} from {conn}");

        match event {
            InboundEvent::RegisterUser(fields) => {
                let change = self.sessions.register(conn, fields, now);
                self.publish(change);
            }
            InboundEvent::Heartbeat(fields) => {
                let change = self.sessions.heartbeat(conn, fields, now);
                self.publish(change);
            }
            InboundEvent::ClientData(payload) => {
                let change = self.sessions.apply_data(conn, payload.kind, payload.data);
                self.publish(change);
            }
            InboundEvent::CreateRoom(media) => {
                self.rooms
                    .create_room(conn, media, &mut self.channel, &self.sessions);
            }
            InboundEvent::JoinRoom(payload) => {
                if let Err(err) = self.rooms.join_room(
                    conn,
                    &payload.room_id,
                    payload.user_metadata,
                    &mut self.channel,
                    &self.sessions,
                ) {
                    log::debug!("join_room failed for {conn}: {err}");
                    self.channel.send(conn, &OutboundEvent::Error(err.to_string()));
                }
            }
            InboundEvent::SyncAction(action) => {
                self.rooms
                    .dispatch_sync_action(conn, action, &self.channel, &self.sessions, now);
            }
            InboundEvent::RoomChatMessage(text) => {
                self.rooms
                    .post_chat(conn, text, &self.channel, &self.sessions, now);
            }
            InboundEvent::LeaveRoom => {
                self.rooms
                    .leave_room(conn, &mut self.channel, &self.sessions);
            }
            InboundEvent::AdminLogin(identity) => {
                if let Err(err) = self
                    .admins
                    .login(conn, &identity, &self.channel, &self.sessions)
                {
                    log::debug!("admin_login failed for {conn}: {err}");
                }
            }
            InboundEvent::AdminCommand(payload) => {
                self.issue_command(conn, payload.target_id, payload.command);
            }
        }
    }

    fn issue_command(&mut self, conn: ConnId, target: ConnId, command: ModeratorCommand) {
        if let Err(err) = self
            .admins
            .authorize_command(conn, target, &command, &self.sessions)
        {
            log::warn!("Dropping admin_command from {conn}: {err}");
            return;
        }

        match &command {
            ModeratorCommand::Kick => {
                self.rooms
                    .leave_room(target, &mut self.channel, &self.sessions);
            }
            ModeratorCommand::Notice { .. } => {}
        }

        self.channel
            .send(target, &OutboundEvent::ServerCommand(command));
    }

    /// Processes commands until every [`SyncServerHandle`] has been dropped.
    ///
    /// # Errors
    ///
    /// * Never; the signature matches the HTTP server future it is joined with
    pub async fn run(mut self) -> io::Result<()> {
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::Connect { conn_tx, res_tx } => {
                    let id = self.connect(conn_tx);
                    if res_tx.send(id).is_err() {
                        log::warn!("Connection {id} went away before it was registered");
                        self.disconnect(id);
                    }
                }

                Command::Disconnect { conn } => self.disconnect(conn),

                Command::Event { conn, event } => self.handle_event(conn, event, now_millis()),

                Command::Reap => self.reap(now_millis()),
            }
        }

        log::debug!("Sync server command channel closed");

        Ok(())
    }
}

/// Handle and command sender for the sync server.
#[derive(Debug, Clone)]
pub struct SyncServerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl SyncServerHandle {
    fn send(&self, cmd: Command) -> Result<(), HandleError> {
        self.cmd_tx.send(cmd).map_err(|_| HandleError::Closed)
    }

    /// Register a connection's message sender and obtain its connection ID.
    ///
    /// # Errors
    ///
    /// * [`HandleError::Closed`] if the server has stopped
    pub async fn connect(&self, conn_tx: mpsc::UnboundedSender<Msg>) -> Result<ConnId, HandleError> {
        let (res_tx, res_rx) = oneshot::channel();

        self.send(Command::Connect { conn_tx, res_tx })?;

        res_rx.await.map_err(|_| HandleError::Closed)
    }

    /// # Errors
    ///
    /// * [`HandleError::Closed`] if the server has stopped
    pub fn dispatch(&self, conn: ConnId, event: InboundEvent) -> Result<(), HandleError> {
        self.send(Command::Event { conn, event })
    }

    /// # Errors
    ///
    /// * [`HandleError::Closed`] if the server has stopped
    pub fn disconnect(&self, conn: ConnId) -> Result<(), HandleError> {
        self.send(Command::Disconnect { conn })
    }

    /// # Errors
    ///
    /// * [`HandleError::Closed`] if the server has stopped
    pub fn reap(&self) -> Result<(), HandleError> {
        self.send(Command::Reap)
    }
}
