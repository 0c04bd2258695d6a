//! Events published by the dealer channel, and their fan-out.
//!
//! Observers subscribe by [`Topic`]: the four lifecycle topics mirror the
//! channel's state machine, and [`Topic::Type`] selects a provider push
//! event by its type name (e.g. `PLAYER_STATE_CHANGED`). Push payloads are
//! carried verbatim.
//!
//! # Example
//!
//! ```rust
//! use chorus::events::{Event, Topic};
//!
//! let mut rx = client.subscribe(Topic::Type("PLAYER_STATE_CHANGED".into()));
//! while let Some(Event::Push { payload, .. }) = rx.recv().await {
//!     println!("playback changed: {payload}");
//! }
//! ```

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// An event observed on the dealer channel.
#[derive(Clone, Debug)]
pub enum Event {
    /// The socket opened.
    Connected,

    /// The subscription handshake completed; playback events will follow.
    Ready,

    /// The socket closed; the session is over.
    Closed,

    /// A transport or handshake error. The socket may or may not close.
    Error(String),

    /// A provider push event, re-emitted under its own type name.
    Push {
        /// Provider event type name.
        kind: String,
        /// Inner event payload, verbatim.
        payload: Value,
    },
}

/// Subscription key for the fan-out registry.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Topic {
    /// [`Event::Connected`] emissions.
    Open,
    /// [`Event::Ready`] emissions.
    Ready,
    /// [`Event::Closed`] emissions.
    Close,
    /// [`Event::Error`] emissions.
    Error,
    /// Provider push events with the given type name.
    Type(String),
}

impl Topic {
    /// The topic an event is published under.
    #[must_use]
    pub fn of(event: &Event) -> Self {
        match event {
            Event::Connected => Self::Open,
            Event::Ready => Self::Ready,
            Event::Closed => Self::Close,
            Event::Error(_) => Self::Error,
            Event::Push { kind, .. } => Self::Type(kind.clone()),
        }
    }
}

/// Name-keyed publish/subscribe registry.
///
/// Senders whose receivers were dropped are pruned on publish, so a
/// long-lived channel does not accumulate dead subscriptions.
#[derive(Debug, Default)]
pub struct Publisher {
    topics: HashMap<Topic, Vec<UnboundedSender<Event>>>,
}

impl Publisher {
    /// Registers a new observer for one topic.
    pub fn subscribe(&mut self, topic: Topic) -> UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.entry(topic).or_default().push(tx);
        rx
    }

    /// Delivers an event to every observer of its topic.
    pub fn publish(&mut self, event: &Event) {
        if let Some(observers) = self.topics.get_mut(&Topic::of(event)) {
            observers.retain(|observer| observer.send(event.clone()).is_ok());
        }
    }

    /// Detaches all observers; their receivers see end-of-stream.
    pub fn clear(&mut self) {
        self.topics.clear();
    }
}
