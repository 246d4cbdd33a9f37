//! Mirror and control a remote music playback session.
//!
//! Logging in uses the OAuth 2.0 authorization code flow with PKCE
//! ([`auth`], [`pkce`]), with login progress kept in a [`store`] so it
//! survives the round trip through the browser. Once logged in,
//! [`sync::PlaybackSync`] polls what is playing, interpolates progress
//! locally between polls and forwards playback commands.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod pkce;
pub mod playback;
pub mod protocol;
pub mod store;
pub mod sync;
