//! Events emitted while mirroring a playback session.
//!
//! Events are notifications only. They carry no data: a presentation layer
//! reacts to one by reading the current [`PlaybackState`] or login state.
//!
//! # Example
//!
//! ```rust
//! use nowplay::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Play => println!("Playback started"),
//!         Event::TrackChanged => println!("New track playing"),
//!         Event::LoggedOut => println!("Log in again"),
//!         _ => {}
//!     }
//! }
//! ```
//!
//! [`PlaybackState`]: crate::playback::PlaybackState

/// Significant changes in login or playback state.
///
/// Playback Events:
/// * [`Play`](Self::Play) - Playback starts or resumes
/// * [`Pause`](Self::Pause) - Playback pauses
/// * [`TrackChanged`](Self::TrackChanged) - A different track is reported
/// * [`Stopped`](Self::Stopped) - Nothing is playing anymore
///
/// Session Events:
/// * [`LoggedIn`](Self::LoggedIn) - Following playback started with an access token
/// * [`LoggedOut`](Self::LoggedOut) - The access token was rejected or dropped
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    Play,
    Pause,
    TrackChanged,

    /// The remote reported no active playback session.
    Stopped,

    /// Sent each time the sync loop starts, not when a login completes.
    LoggedIn,

    /// Polling has stopped; a new login is required.
    LoggedOut,
}
