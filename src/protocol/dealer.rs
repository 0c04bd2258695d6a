//! Frames of the dealer event stream.
//!
//! The dealer speaks JSON text frames over the websocket. Two shapes matter:
//!
//! * A handshake frame whose `headers` carry `Spotify-Connection-Id`; its
//!   value must be registered with the push-notification endpoint before the
//!   provider sends any playback events.
//! * Event frames whose `payloads` wrap a list of typed events. Only the
//!   first event of the first payload is meaningful; the provider does not
//!   batch beyond that.
//!
//! Frames are transient: they are demultiplexed on arrival and not retained.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Header carrying the connection id on the handshake frame.
const CONNECTION_ID_HEADER: &str = "Spotify-Connection-Id";

/// One inbound dealer frame.
#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
pub struct Frame {
    /// Frame headers; present on handshake and some administrative frames.
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    /// Event payloads; present on push-event frames.
    #[serde(default)]
    pub payloads: Option<Vec<Payload>>,
}

/// One payload of a push-event frame.
#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
pub struct Payload {
    #[serde(default)]
    pub events: Vec<PushEvent>,
}

/// A single provider push event, re-emitted under its own type name.
#[derive(Clone, PartialEq, Deserialize, Debug)]
pub struct PushEvent {
    /// Provider event type name, e.g. `PLAYER_STATE_CHANGED`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Inner event payload, carried verbatim.
    #[serde(default)]
    pub event: Value,
}

impl Frame {
    /// Returns the connection id when this is the handshake frame.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(CONNECTION_ID_HEADER))
            .map(String::as_str)
    }

    /// Extracts the first event of the first payload, if any.
    #[must_use]
    pub fn into_first_event(self) -> Option<PushEvent> {
        self.payloads
            .and_then(|payloads| payloads.into_iter().next())
            .and_then(|payload| payload.events.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_frame_exposes_the_connection_id() {
        let frame: Frame = serde_json::from_str(
            r#"{"headers":{"Spotify-Connection-Id":"abc123","Content-Type":"text/plain"}}"#,
        )
        .unwrap();
        assert_eq!(frame.connection_id(), Some("abc123"));
        assert!(frame.into_first_event().is_none());
    }

    #[test]
    fn event_frame_yields_the_first_event_only() {
        let frame: Frame = serde_json::from_str(
            r#"{"payloads":[
                {"events":[
                    {"type":"PLAYER_STATE_CHANGED","event":{"state":{"is_playing":true}}},
                    {"type":"SECOND","event":{}}
                ]},
                {"events":[{"type":"THIRD","event":{}}]}
            ]}"#,
        )
        .unwrap();

        let event = frame.into_first_event().unwrap();
        assert_eq!(event.kind, "PLAYER_STATE_CHANGED");
        assert_eq!(event.event["state"]["is_playing"], serde_json::json!(true));
    }

    #[test]
    fn unrecognizable_frames_carry_no_event() {
        let frame: Frame = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert!(frame.connection_id().is_none());
        assert!(frame.into_first_event().is_none());

        let frame: Frame = serde_json::from_str(r#"{"payloads":[{"events":[]}]}"#).unwrap();
        assert!(frame.into_first_event().is_none());
    }
}
