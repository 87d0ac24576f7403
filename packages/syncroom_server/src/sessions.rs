//! Per-connection session records and the admin broadcasts their changes trigger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ConnId, models::ClientDataKind};

/// Keys that are owned by the server or by `client_data` and never taken from free-form fields.
pub const RESERVED_KEYS: [&str; 6] = ["id", "lastActive", "isLive", "avatar", "status", "nowPlaying"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: ConnId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub last_active: i64,
    pub is_live: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now_playing: Option<Value>,
}

impl Session {
    fn new(id: ConnId, fields: Map<String, Value>, now: i64) -> Self {
        Self {
            id,
            fields: strip_reserved(fields),
            last_active: now,
            is_live: true,
            avatar: None,
            status: None,
            now_playing: None,
        }
    }

    /// Display name used for chat entries.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}

fn strip_reserved(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        fields.remove(key);
    }
    fields
}

/// Which admin broadcast a registry mutation calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    FullList,
    Single(ConnId),
    Unchanged,
}

/// Sessions keyed by connection id.
///
/// Connection ids are handed out in increasing order, so iteration order is connection order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<ConnId, Session>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: ConnId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ConnId) -> bool {
        self.sessions.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Session> {
        self.sessions.values().cloned().collect()
    }

    pub fn register(&mut self, id: ConnId, fields: Map<String, Value>, now: i64) -> SessionChange {
        log::debug!("register: id={id}");
        self.sessions.insert(id, Session::new(id, fields, now));
        SessionChange::FullList
    }

    /// Merges `fields` into the session, registering it first if it is missing.
    pub fn heartbeat(&mut self, id: ConnId, fields: Map<String, Value>, now: i64) -> SessionChange {
        let Some(session) = self.sessions.get_mut(&id) else {
            log::debug!("heartbeat: re-registering missing session id={id}");
            return self.register(id, fields, now);
        };

        for (key, value) in strip_reserved(fields) {
            session.fields.insert(key, value);
        }
        session.last_active = session.last_active.max(now);
        session.is_live = true;

        SessionChange::Single(id)
    }

    pub fn apply_data(&mut self, id: ConnId, kind: ClientDataKind, value: Value) -> SessionChange {
        let Some(session) = self.sessions.get_mut(&id) else {
            log::trace!("apply_data: no session id={id}");
            return SessionChange::Unchanged;
        };

        let slot = match kind {
            ClientDataKind::Avatar => &mut session.avatar,
            ClientDataKind::Status => &mut session.status,
            ClientDataKind::NowPlaying => &mut session.now_playing,
            ClientDataKind::Unknown => {
                log::debug!("apply_data: ignoring unknown kind for id={id}");
                return SessionChange::Unchanged;
            }
        };
        slot.replace(value);

        SessionChange::Single(id)
    }

    pub fn remove(&mut self, id: ConnId) -> SessionChange {
        if self.sessions.remove(&id).is_some() {
            SessionChange::FullList
        } else {
            SessionChange::Unchanged
        }
    }

    /// Drops every session idle for longer than `max_idle_ms`.
    pub fn reap(&mut self, now: i64, max_idle_ms: i64) -> SessionChange {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now - session.last_active <= max_idle_ms);
        let evicted = before - self.sessions.len();

        if evicted == 0 {
            SessionChange::Unchanged
        } else {
            log::info!("reap: evicted {evicted} stale session(s)");
            SessionChange::FullList
        }
    }
}
