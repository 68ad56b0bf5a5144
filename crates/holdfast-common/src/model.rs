//! Actor and lock models shared across components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ADMIN_ROLE;

/// Display snapshot of an actor
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorInfo {
    pub name: String,
    pub email: String,
}

impl ActorInfo {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// An actor whose session token has been verified
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedActor {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl VerifiedActor {
    pub fn info(&self) -> ActorInfo {
        ActorInfo::new(&self.name, &self.email)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// Exclusive, time-bounded editing claim on one record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub record_id: String,
    pub holder_id: String,
    pub holder_info: ActorInfo,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_held_by(&self, actor_id: &str) -> bool {
        self.holder_id == actor_id
    }

    /// Time left before expiry, negative once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }
}
