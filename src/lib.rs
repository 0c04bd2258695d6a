//! Session management for the Spotify web API and its real-time event stream.
//!
//! This crate keeps a local application synchronized with a Spotify account:
//! it owns the OAuth token pair, mints the short-lived credential that opens
//! the dealer websocket, supervises that connection, and exposes a typed
//! command surface for transport control.
//!
//! The main entry points are:
//! * [`tokens::TokenManager`] - OAuth code exchange and serialized refresh
//! * [`gateway::Gateway`] - authenticated playback commands over REST
//! * [`remote::Client`] - the persistent dealer event channel
//! * [`protocol::player::normalize`] - one stable "now playing" shape

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod protocol;
pub mod remote;
pub mod session;
pub mod store;
pub mod tokens;
pub mod totp;
