//! Realtime wire events
//!
//! Frames are JSON objects of the form `{"event": <name>, "data": <payload>}`.
//! Inbound and outbound events are closed enums with one payload struct per
//! kind.

use serde::{Deserialize, Serialize};

use holdfast_common::{ActorInfo, ErrorCode};

/// Payload carrying only a record id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRef {
    pub record_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMove {
    pub record_id: String,
    pub x: f64,
    pub y: f64,
}

/// Events sent by clients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Join(RecordRef),
    Leave(RecordRef),
    CursorUpdate(CursorMove),
    RenewLockRequest(RecordRef),
    ReleaseLockRequest(RecordRef),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub record_id: String,
    pub actor_id: String,
    pub actor_info: ActorInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub record_id: String,
    pub actor_id: String,
}

/// A cursor position relayed to the other room members
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub record_id: String,
    pub actor_id: String,
    pub actor_info: ActorInfo,
    pub x: f64,
    pub y: f64,
    /// Server time of receipt, epoch milliseconds
    pub server_timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquired {
    pub record_id: String,
    pub actor_id: String,
    pub actor_info: ActorInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReleased {
    pub record_id: String,
    pub actor_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockForceReleased {
    pub record_id: String,
    /// `None` when the system reclaimed the lock
    pub released_by: Option<String>,
}

/// The requester receives only the record id; the rest of the room also
/// learns who renewed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRenewed {
    pub record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_info: Option<ActorInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRenewalFailed {
    pub record_id: String,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDisconnected {
    pub actor_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationError {
    pub message: String,
}

/// Requester-scoped failure report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

impl EventError {
    pub fn new(code: &ErrorCode<'_>, message: impl Into<String>, record_id: Option<&str>) -> Self {
        Self {
            code: code.code,
            message: message.into(),
            record_id: record_id.map(str::to_string),
        }
    }
}

/// Events sent by the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    UserJoined(UserJoined),
    UserLeft(UserLeft),
    CursorUpdate(CursorPosition),
    LockAcquired(LockAcquired),
    LockReleased(LockReleased),
    LockForceReleased(LockForceReleased),
    LockRenewed(LockRenewed),
    LockRenewalFailed(LockRenewalFailed),
    UserDisconnected(UserDisconnected),
    AuthenticationError(AuthenticationError),
    Error(EventError),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UserJoined(_) => "userJoined",
            ServerEvent::UserLeft(_) => "userLeft",
            ServerEvent::CursorUpdate(_) => "cursorUpdate",
            ServerEvent::LockAcquired(_) => "lockAcquired",
            ServerEvent::LockReleased(_) => "lockReleased",
            ServerEvent::LockForceReleased(_) => "lockForceReleased",
            ServerEvent::LockRenewed(_) => "lockRenewed",
            ServerEvent::LockRenewalFailed(_) => "lockRenewalFailed",
            ServerEvent::UserDisconnected(_) => "userDisconnected",
            ServerEvent::AuthenticationError(_) => "authenticationError",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn authentication_error(message: impl Into<String>) -> Self {
        ServerEvent::AuthenticationError(AuthenticationError {
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_from_wire() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "cursorUpdate",
            "data": { "recordId": "appt-001", "x": 10.5, "y": 20 }
        }))
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::CursorUpdate(CursorMove {
                record_id: "appt-001".to_string(),
                x: 10.5,
                y: 20.0,
            })
        );

        let event: ClientEvent = serde_json::from_value(json!({
            "event": "renewLockRequest",
            "data": { "recordId": "appt-001" }
        }))
        .unwrap();
        assert!(matches!(event, ClientEvent::RenewLockRequest(r) if r.record_id == "appt-001"));
    }

    #[test]
    fn test_client_event_rejects_bad_payload() {
        let result = serde_json::from_value::<ClientEvent>(json!({
            "event": "cursorUpdate",
            "data": { "recordId": "appt-001", "x": "left", "y": 0 }
        }));
        assert!(result.is_err());

        let result = serde_json::from_value::<ClientEvent>(json!({
            "event": "deleteEverything",
            "data": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_lock_renewed_requester_shape() {
        let event = ServerEvent::LockRenewed(LockRenewed {
            record_id: "appt-001".to_string(),
            actor_id: None,
            actor_info: None,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "lockRenewed", "data": { "recordId": "appt-001" } })
        );
    }

    #[test]
    fn test_force_released_by_system_is_null() {
        let event = ServerEvent::LockForceReleased(LockForceReleased {
            record_id: "appt-001".to_string(),
            released_by: None,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "lockForceReleased");
        assert!(value["data"]["releasedBy"].is_null());
    }

    #[test]
    fn test_event_names_match_wire_tags() {
        let events = vec![
            ServerEvent::UserDisconnected(UserDisconnected {
                actor_id: "u".to_string(),
            }),
            ServerEvent::authentication_error("bad token"),
            ServerEvent::Error(EventError::new(
                &holdfast_common::error::INVALID_RECORD_ID,
                "invalid record id",
                None,
            )),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }
}
