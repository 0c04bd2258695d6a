//! Wire types for the Spotify web services.
//!
//! This module mirrors the provider's documented JSON shapes:
//! * OAuth and web-session credential responses ([`auth`])
//! * Frames of the dealer event stream ([`dealer`])
//! * Playback payloads and their normalized form ([`player`])
//!
//! All shapes are tolerant of missing optional fields; the provider adds
//! and drops fields without notice.

pub mod auth;
pub mod dealer;
pub mod player;

pub use auth::{ClientToken, ServerTime, TokenResponse};
pub use dealer::Frame;
pub use player::{normalize, CurrentlyPlaying, PlaybackState};
