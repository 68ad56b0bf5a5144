// Realtime broadcaster
// Room-scoped fan-out of lock and cursor events over per-connection queues

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Receiver, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use holdfast_common::error::{INVALID_CURSOR_POSITION, INVALID_RECORD_ID};
use holdfast_common::{ActorInfo, Lock, VerifiedActor, is_valid_id};

use super::lock::LockManager;
use crate::event::{
    CursorPosition, EventError, LockAcquired, LockForceReleased, LockReleased, LockRenewalFailed,
    LockRenewed, ServerEvent, UserDisconnected, UserJoined, UserLeft,
};
use crate::model::{RealtimeClient, RealtimeConfig};

/// One actor viewing a record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub actor_id: String,
    pub actor_info: ActorInfo,
    pub cursor: Option<CursorPosition>,
}

pub struct RealtimeBroadcaster {
    manager: Arc<LockManager>,
    config: RealtimeConfig,
    // connection id -> client
    clients: DashMap<String, RealtimeClient>,
    // record id -> connection ids
    rooms: DashMap<String, HashSet<String>>,
    // connection id -> record ids
    memberships: DashMap<String, HashSet<String>>,
    // record id -> actor id -> latest position
    cursors: DashMap<String, HashMap<String, CursorPosition>>,
    // actor id -> last relayed cursor update
    cursor_throttle: DashMap<String, Instant>,
}

impl RealtimeBroadcaster {
    pub fn new(manager: Arc<LockManager>, config: RealtimeConfig) -> Self {
        Self {
            manager,
            config,
            clients: DashMap::new(),
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            cursors: DashMap::new(),
            cursor_throttle: DashMap::new(),
        }
    }

    /// Create an outbound queue sized for one connection
    pub fn outbound_channel(&self) -> (mpsc::Sender<ServerEvent>, Receiver<ServerEvent>) {
        mpsc::channel(self.config.outbound_buffer)
    }

    /// Register an authenticated connection
    pub fn register(&self, client: RealtimeClient) {
        info!(
            connection_id = %client.connection_id,
            actor_id = %client.actor.id,
            remote_addr = %client.remote_addr,
            "Realtime client connected"
        );
        self.memberships
            .insert(client.connection_id.clone(), HashSet::new());
        self.clients.insert(client.connection_id.clone(), client);
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    fn actor_of(&self, connection_id: &str) -> Option<VerifiedActor> {
        self.clients.get(connection_id).map(|c| c.actor.clone())
    }

    fn send_to(&self, connection_id: &str, event: ServerEvent) {
        let Some(tx) = self.clients.get(connection_id).map(|c| c.tx.clone()) else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    connection_id = %connection_id,
                    event = event.name(),
                    "Outbound queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %connection_id, "Outbound queue closed");
            }
        }
    }

    fn room_members(&self, record_id: &str) -> Vec<String> {
        self.rooms
            .get(record_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send to every member of a room, optionally skipping one connection
    fn broadcast_room(&self, record_id: &str, event: ServerEvent, exclude: Option<&str>) {
        for connection_id in self.room_members(record_id) {
            if exclude == Some(connection_id.as_str()) {
                continue;
            }
            self.send_to(&connection_id, event.clone());
        }
    }

    fn broadcast_all(&self, event: ServerEvent) {
        let ids: Vec<String> = self.clients.iter().map(|c| c.key().clone()).collect();
        for connection_id in ids {
            self.send_to(&connection_id, event.clone());
        }
    }

    fn send_error(&self, connection_id: &str, error: EventError) {
        self.send_to(connection_id, ServerEvent::Error(error));
    }

    fn is_member(&self, connection_id: &str, record_id: &str) -> bool {
        self.rooms
            .get(record_id)
            .is_some_and(|members| members.contains(connection_id))
    }

    /// Add a connection to a record's room and tell the other members
    pub fn join(&self, connection_id: &str, record_id: &str) {
        let Some(actor) = self.actor_of(connection_id) else {
            return;
        };
        if !is_valid_id(record_id) {
            self.send_error(
                connection_id,
                EventError::new(&INVALID_RECORD_ID, INVALID_RECORD_ID.message, None),
            );
            return;
        }

        let newly_joined = self
            .rooms
            .entry(record_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        if let Some(mut records) = self.memberships.get_mut(connection_id) {
            records.insert(record_id.to_string());
        }

        if newly_joined {
            debug!(connection_id = %connection_id, record_id = %record_id, "Joined room");
            self.broadcast_room(
                record_id,
                ServerEvent::UserJoined(UserJoined {
                    record_id: record_id.to_string(),
                    actor_id: actor.id.clone(),
                    actor_info: actor.info(),
                }),
                Some(connection_id),
            );
        }
    }

    /// Remove a connection from a room without touching its other rooms
    fn remove_from_room(&self, connection_id: &str, actor_id: &str, record_id: &str) -> bool {
        let (removed, remaining) = match self.rooms.entry(record_id.to_string()) {
            Entry::Occupied(mut members) => {
                let removed = members.get_mut().remove(connection_id);
                let remaining: Vec<String> = members.get().iter().cloned().collect();
                if remaining.is_empty() {
                    members.remove();
                }
                (removed, remaining)
            }
            Entry::Vacant(_) => (false, Vec::new()),
        };

        // The cursor belongs to the actor, not the connection
        let actor_still_present = remaining
            .iter()
            .any(|id| self.actor_of(id).is_some_and(|a| a.id == actor_id));

        if removed
            && !actor_still_present
            && let Entry::Occupied(mut cursors) = self.cursors.entry(record_id.to_string())
        {
            cursors.get_mut().remove(actor_id);
            if cursors.get().is_empty() {
                cursors.remove();
            }
        }
        removed
    }

    pub fn leave(&self, connection_id: &str, record_id: &str) {
        let Some(actor) = self.actor_of(connection_id) else {
            return;
        };

        if let Some(mut records) = self.memberships.get_mut(connection_id) {
            records.remove(record_id);
        }
        if self.remove_from_room(connection_id, &actor.id, record_id) {
            debug!(connection_id = %connection_id, record_id = %record_id, "Left room");
            self.broadcast_room(
                record_id,
                ServerEvent::UserLeft(UserLeft {
                    record_id: record_id.to_string(),
                    actor_id: actor.id,
                }),
                None,
            );
        }
    }

    /// Relay a cursor position to the rest of the room
    ///
    /// Returns `true` if the update was relayed; updates inside the throttle
    /// window are dropped.
    pub fn cursor_update(&self, connection_id: &str, record_id: &str, x: f64, y: f64) -> bool {
        let Some(actor) = self.actor_of(connection_id) else {
            return false;
        };
        if !x.is_finite() || !y.is_finite() {
            self.send_error(
                connection_id,
                EventError::new(
                    &INVALID_CURSOR_POSITION,
                    INVALID_CURSOR_POSITION.message,
                    Some(record_id),
                ),
            );
            return false;
        }
        if !self.is_member(connection_id, record_id) {
            debug!(connection_id = %connection_id, record_id = %record_id, "Cursor update outside joined room");
            return false;
        }

        let now = Instant::now();
        match self.cursor_throttle.entry(actor.id.clone()) {
            Entry::Occupied(mut last) => {
                if now.duration_since(*last.get()) < self.config.cursor_throttle {
                    return false;
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        let position = CursorPosition {
            record_id: record_id.to_string(),
            actor_id: actor.id.clone(),
            actor_info: actor.info(),
            x,
            y,
            server_timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.cursors
            .entry(record_id.to_string())
            .or_default()
            .insert(actor.id, position.clone());

        self.broadcast_room(
            record_id,
            ServerEvent::CursorUpdate(position),
            Some(connection_id),
        );
        true
    }

    pub async fn renew_lock_request(&self, connection_id: &str, record_id: &str) {
        let Some(actor) = self.actor_of(connection_id) else {
            return;
        };

        match self.manager.renew_lock(record_id, &actor.id).await {
            Ok(lock) => {
                self.send_to(
                    connection_id,
                    ServerEvent::LockRenewed(LockRenewed {
                        record_id: record_id.to_string(),
                        actor_id: None,
                        actor_info: None,
                    }),
                );
                self.broadcast_room(
                    record_id,
                    ServerEvent::LockRenewed(LockRenewed {
                        record_id: record_id.to_string(),
                        actor_id: Some(actor.id.clone()),
                        actor_info: Some(lock.holder_info),
                    }),
                    Some(connection_id),
                );
            }
            Err(e) => {
                debug!(record_id = %record_id, actor_id = %actor.id, error = %e, "Lock renewal failed");
                self.send_to(
                    connection_id,
                    ServerEvent::LockRenewalFailed(LockRenewalFailed {
                        record_id: record_id.to_string(),
                        error: e.user_message(),
                    }),
                );
            }
        }
    }

    pub async fn release_lock_request(&self, connection_id: &str, record_id: &str) {
        let Some(actor) = self.actor_of(connection_id) else {
            return;
        };

        match self.manager.release(record_id, &actor.id).await {
            Ok(()) => self.notify_lock_released(record_id, &actor.id),
            Err(e) => {
                debug!(record_id = %record_id, actor_id = %actor.id, error = %e, "Lock release failed");
                self.send_error(
                    connection_id,
                    EventError::new(&e.error_code(), e.user_message(), Some(record_id)),
                );
            }
        }
    }

    /// Tear down a connection
    ///
    /// Releases the actor's locks and tells everyone. Only the first call for
    /// a connection does anything.
    pub async fn disconnect(&self, connection_id: &str) {
        let Some((_, client)) = self.clients.remove(connection_id) else {
            return;
        };
        let actor = client.actor;

        let records = self
            .memberships
            .remove(connection_id)
            .map(|(_, records)| records)
            .unwrap_or_default();
        for record_id in records {
            if self.remove_from_room(connection_id, &actor.id, &record_id) {
                self.broadcast_room(
                    &record_id,
                    ServerEvent::UserLeft(UserLeft {
                        record_id: record_id.clone(),
                        actor_id: actor.id.clone(),
                    }),
                    None,
                );
            }
        }

        match self.manager.release_all_for(&actor.id).await {
            Ok(released) => self.notify_locks_reclaimed(&released),
            Err(e) => {
                warn!(actor_id = %actor.id, error = %e, "Failed to release locks on disconnect");
            }
        }

        self.broadcast_all(ServerEvent::UserDisconnected(UserDisconnected {
            actor_id: actor.id.clone(),
        }));
        self.cursor_throttle.remove(&actor.id);

        info!(connection_id = %connection_id, actor_id = %actor.id, "Realtime client disconnected");
    }

    pub fn notify_lock_acquired(&self, lock: &Lock) {
        self.broadcast_room(
            &lock.record_id,
            ServerEvent::LockAcquired(LockAcquired {
                record_id: lock.record_id.clone(),
                actor_id: lock.holder_id.clone(),
                actor_info: lock.holder_info.clone(),
            }),
            None,
        );
    }

    pub fn notify_lock_released(&self, record_id: &str, actor_id: &str) {
        self.broadcast_room(
            record_id,
            ServerEvent::LockReleased(LockReleased {
                record_id: record_id.to_string(),
                actor_id: actor_id.to_string(),
            }),
            None,
        );
    }

    pub fn notify_lock_renewed(&self, lock: &Lock) {
        self.broadcast_room(
            &lock.record_id,
            ServerEvent::LockRenewed(LockRenewed {
                record_id: lock.record_id.clone(),
                actor_id: Some(lock.holder_id.clone()),
                actor_info: Some(lock.holder_info.clone()),
            }),
            None,
        );
    }

    /// `released_by` is `None` when the system reclaimed the lock
    pub fn notify_lock_force_released(&self, record_id: &str, released_by: Option<&str>) {
        self.broadcast_room(
            record_id,
            ServerEvent::LockForceReleased(LockForceReleased {
                record_id: record_id.to_string(),
                released_by: released_by.map(str::to_string),
            }),
            None,
        );
    }

    pub fn notify_locks_reclaimed(&self, record_ids: &[String]) {
        for record_id in record_ids {
            self.notify_lock_force_released(record_id, None);
        }
    }

    /// Actors currently viewing a record, with their latest cursor
    pub fn presence(&self, record_id: &str) -> Vec<PresenceEntry> {
        let cursors = self
            .cursors
            .get(record_id)
            .map(|c| c.value().clone())
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for connection_id in self.room_members(record_id) {
            let Some(actor) = self.actor_of(&connection_id) else {
                continue;
            };
            if !seen.insert(actor.id.clone()) {
                continue;
            }
            entries.push(PresenceEntry {
                cursor: cursors.get(&actor.id).cloned(),
                actor_info: actor.info(),
                actor_id: actor.id,
            });
        }
        entries.sort_by(|a, b| a.actor_id.cmp(&b.actor_id));
        entries
    }
}
