//! Local mirror of the remote playback session.
//!
//! [`PlaybackState`] follows one rule: the latest poll always wins. Between
//! polls progress is interpolated locally while playing, and commands apply
//! optimistic changes, but both are advisory and are overwritten wholesale
//! by the next authoritative poll.
//!
//! Progress never exceeds the duration of the current track. Without a
//! track, both are zero.

use std::time::{Duration, SystemTime};

use url::Url;

use crate::{events::Event, protocol::player::Item};

/// What was playing at the time of a poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackSnapshot {
    pub track_id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub artwork: Option<Url>,
    pub duration: Duration,
}

impl TrackSnapshot {
    /// Artist names joined for display.
    #[must_use]
    pub fn artist_names(&self) -> String {
        self.artists.join(", ")
    }
}

impl From<&Item> for TrackSnapshot {
    fn from(item: &Item) -> Self {
        // Local files have no id, but do have a URI.
        let track_id = item
            .id
            .clone()
            .or_else(|| item.uri.clone())
            .unwrap_or_default();

        Self {
            track_id,
            title: item.name.clone(),
            artists: item.artists.iter().map(|artist| artist.name.clone()).collect(),
            artwork: item.artwork().cloned(),
            duration: item.duration,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackState {
    snapshot: Option<TrackSnapshot>,
    progress: Duration,
    playing: bool,
    synced_at: Option<SystemTime>,
}

impl PlaybackState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&TrackSnapshot> {
        self.snapshot.as_ref()
    }

    #[must_use]
    pub fn progress(&self) -> Duration {
        self.progress
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.snapshot
            .as_ref()
            .map_or(Duration::ZERO, |snapshot| snapshot.duration)
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.duration().saturating_sub(self.progress)
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Wall-clock time of the last authoritative poll.
    #[must_use]
    pub fn synced_at(&self) -> Option<SystemTime> {
        self.synced_at
    }

    /// Progress as a fraction of the track duration, in `[0, 1]`.
    ///
    /// Zero when there is no track or its duration is zero.
    #[must_use]
    pub fn progress_fraction(&self) -> f64 {
        let duration = self.duration();
        if duration.is_zero() {
            return 0.0;
        }

        self.progress.div_duration_f64(duration).clamp(0.0, 1.0)
    }

    /// Authoritative update: nothing is playing.
    pub fn stop(&mut self, now: SystemTime) -> Vec<Event> {
        let mut events = Vec::new();
        if self.snapshot.is_some() || self.playing {
            events.push(Event::Stopped);
        }

        self.snapshot = None;
        self.progress = Duration::ZERO;
        self.playing = false;
        self.synced_at = Some(now);

        events
    }

    /// Authoritative update: `item` is at `progress`, playing or not.
    ///
    /// Overwrites any local interpolation drift and optimistic changes.
    pub fn apply(
        &mut self,
        item: &Item,
        progress: Duration,
        playing: bool,
        now: SystemTime,
    ) -> Vec<Event> {
        let mut events = Vec::new();

        let snapshot = TrackSnapshot::from(item);
        if self
            .snapshot
            .as_ref()
            .is_none_or(|current| current.track_id != snapshot.track_id)
        {
            events.push(Event::TrackChanged);
        }

        self.progress = progress.min(snapshot.duration);
        self.snapshot = Some(snapshot);
        events.extend(self.set_playing(playing));
        self.synced_at = Some(now);

        events
    }

    /// Advisory update: `elapsed` time passed while playing.
    pub fn advance(&mut self, elapsed: Duration) {
        if self.playing {
            self.progress = self.progress.saturating_add(elapsed).min(self.duration());
        }
    }

    /// Optimistic update: jump to `position`, clamped to the track.
    ///
    /// Returns the position that was actually set.
    pub fn seek(&mut self, position: Duration) -> Duration {
        self.progress = position.min(self.duration());
        self.progress
    }

    /// Optimistic update of the play state. Without a track there is nothing
    /// to play, so only pausing has an effect.
    pub fn set_playing(&mut self, playing: bool) -> Option<Event> {
        if self.playing == playing || (playing && self.snapshot.is_none()) {
            return None;
        }

        self.playing = playing;
        Some(if playing { Event::Play } else { Event::Pause })
    }
}
