//! Attendance envelope
//!
//! A receiver announces its presence on the channel's sender topic:
//! ```text
//! {"id":"live-sender","event":"attendance",
//!  "data":{"client":"c1","event":"begin","data":{"name":"..","image":".."}}}
//! ```
//! `refresh` and `end` carry no inner `data`.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, ATTENDANCE_EVENT, SENDER_ID};

/// Display metadata announced with `begin`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub image: String,
}

impl Participant {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
        }
    }
}

/// One step of the attendance lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceEvent {
    Begin(Participant),
    Refresh,
    End,
}

impl AttendanceEvent {
    /// Wire tag carried in `data.event`
    pub fn tag(&self) -> &'static str {
        match self {
            AttendanceEvent::Begin(_) => "begin",
            AttendanceEvent::Refresh => "refresh",
            AttendanceEvent::End => "end",
        }
    }

    /// Wrap the event in the fixed envelope for `client_id`
    pub fn envelope(&self, client_id: &str) -> Envelope {
        let data = match self {
            AttendanceEvent::Begin(participant) => Some(participant.clone()),
            AttendanceEvent::Refresh | AttendanceEvent::End => None,
        };

        Envelope {
            id: SENDER_ID.to_string(),
            event: ATTENDANCE_EVENT.to_string(),
            data: AttendanceData {
                client: client_id.to_string(),
                event: self.tag().to_string(),
                data,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub event: String,
    pub data: AttendanceData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceData {
    pub client: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Participant>,
}

impl Envelope {
    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::EncodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_begin_envelope() {
        let event = AttendanceEvent::Begin(Participant::new("Alice", "https://img/a.png"));
        let value = serde_json::to_value(event.envelope("c1")).unwrap();

        assert_eq!(
            value,
            json!({
                "id": "live-sender",
                "event": "attendance",
                "data": {
                    "client": "c1",
                    "event": "begin",
                    "data": {"name": "Alice", "image": "https://img/a.png"}
                }
            })
        );
    }

    #[test]
    fn test_refresh_and_end_carry_no_payload() {
        for (event, tag) in [
            (AttendanceEvent::Refresh, "refresh"),
            (AttendanceEvent::End, "end"),
        ] {
            let value = serde_json::to_value(event.envelope("c1")).unwrap();
            assert_eq!(
                value,
                json!({
                    "id": "live-sender",
                    "event": "attendance",
                    "data": {"client": "c1", "event": tag}
                })
            );
        }
    }

    #[test]
    fn test_envelope_parses_back() {
        let text = AttendanceEvent::End.envelope("xyz").to_json().unwrap();
        let parsed: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.data.client, "xyz");
        assert_eq!(parsed.data.event, "end");
        assert!(parsed.data.data.is_none());
    }
}
