//! The currently playing item.
//!
//! # Wire Format
//!
//! `GET /me/player/currently-playing` answers `204 No Content` when nothing
//! is playing, and otherwise:
//!
//! ```json
//! {
//!     "progress_ms": 50000,
//!     "is_playing": true,
//!     "currently_playing_type": "track",
//!     "item": {
//!         "id": "4uLU6hMCjMI75M1A2tKUQC",
//!         "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
//!         "name": "Song",
//!         "duration_ms": 200000,
//!         "artists": [{ "name": "Artist" }],
//!         "album": { "images": [{ "url": "https://i.scdn.co/image/..." }] }
//!     }
//! }
//! ```
//!
//! `item` is `null` while an ad plays or when the item is unavailable.
//! Episodes carry their images on the item itself and have no artists.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationMilliSeconds};
use url::Url;

#[serde_as]
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct CurrentlyPlaying {
    #[serde(rename = "progress_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64, Flexible>>")]
    pub progress: Option<Duration>,

    #[serde(default)]
    pub is_playing: bool,

    pub currently_playing_type: Option<String>,

    pub item: Option<Item>,
}

#[serde_as]
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Item {
    pub id: Option<String>,
    pub uri: Option<String>,
    pub name: String,

    #[serde(rename = "duration_ms", default)]
    #[serde_as(as = "DurationMilliSeconds<u64, Flexible>")]
    pub duration: Duration,

    #[serde(default)]
    pub artists: Vec<Artist>,

    pub album: Option<Album>,

    #[serde(default)]
    pub images: Vec<Image>,
}

impl Item {
    /// Largest available artwork: the album cover for tracks, the item's
    /// own image for episodes.
    #[must_use]
    pub fn artwork(&self) -> Option<&Url> {
        self.album
            .as_ref()
            .and_then(|album| album.images.first())
            .or_else(|| self.images.first())
            .map(|image| &image.url)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Album {
    pub name: Option<String>,

    /// Ordered widest first.
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct Image {
    pub url: Url,
}
