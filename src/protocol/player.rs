//! Playback payloads and their normalized form.
//!
//! The REST API reports "currently playing" in a polymorphic shape: the
//! `item` field is a track or an episode depending on the sibling
//! `currently_playing_type` discriminator, or absent when no session is
//! active. [`normalize`] folds all of that into one stable
//! [`PlaybackState`] so consumers never branch on provider shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw "currently playing" response.
///
/// Every field is optional on the wire; missing fields default so that the
/// normalizer is total over any well-formed payload.
#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub repeat_state: String,
    #[serde(default)]
    pub shuffle_state: bool,
    #[serde(default)]
    pub progress_ms: u64,
    #[serde(default)]
    pub currently_playing_type: String,
    #[serde(default)]
    pub is_playing: bool,

    /// Track or episode object; `None` when no session is active.
    #[serde(default)]
    pub item: Option<Value>,
}

/// Device block of the playback response.
///
/// `volume_percent` is null for restricted devices.
#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
pub struct Device {
    #[serde(default)]
    pub volume_percent: Option<u8>,
    #[serde(default)]
    pub supports_volume: bool,
}

/// External link map as the provider serializes it.
#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: String,
}

/// Cover art entry; dimensions may be omitted by the provider.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Cover {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Track-shaped `item`.
#[derive(Clone, PartialEq, Deserialize, Debug)]
struct TrackItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    artists: Vec<TrackArtist>,
    #[serde(default)]
    album: AlbumRef,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
struct TrackArtist {
    #[serde(default)]
    name: String,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
struct AlbumRef {
    #[serde(default)]
    name: String,
    #[serde(default)]
    href: String,
    #[serde(default)]
    images: Vec<Cover>,
}

/// Episode-shaped `item`.
#[derive(Clone, PartialEq, Deserialize, Debug)]
struct EpisodeItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    images: Vec<Cover>,
    #[serde(default)]
    show: ShowRef,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Clone, PartialEq, Deserialize, Debug, Default)]
struct ShowRef {
    #[serde(default)]
    name: String,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    href: String,
}

/// What kind of item the active session plays.
#[derive(Copy, Clone, Eq, PartialEq, Serialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Track,
    Episode,
}

/// A named external link.
#[derive(Clone, Eq, PartialEq, Serialize, Debug)]
pub struct Link {
    pub name: String,
    pub url: String,
}

/// The one stable playback shape handed to consumers.
#[derive(Clone, PartialEq, Serialize, Debug)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackState {
    /// The provider reports no active item.
    NoSession,
    /// An active playback session.
    Session(Playback),
}

/// Normalized view of an active session.
#[derive(Clone, PartialEq, Serialize, Debug)]
pub struct Playback {
    pub kind: ItemKind,
    pub playing: bool,
    pub title: String,
    pub external_url: String,
    pub repeat_state: String,
    pub shuffle_state: bool,
    pub artists: Vec<Link>,
    pub album: Link,
    pub covers: Vec<Cover>,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub volume_percent: u8,
    pub supports_volume: bool,
}

/// Converts a raw playback payload into the normalized shape.
///
/// Total over any well-formed payload: an absent item, an unknown
/// discriminator or an item that does not match its discriminator all
/// yield [`PlaybackState::NoSession`] rather than an error.
#[must_use]
pub fn normalize(raw: CurrentlyPlaying) -> PlaybackState {
    let Some(item) = raw.item else {
        return PlaybackState::NoSession;
    };

    match raw.currently_playing_type.as_str() {
        "episode" => {
            let Ok(item) = serde_json::from_value::<EpisodeItem>(item) else {
                return PlaybackState::NoSession;
            };

            // A show without a publisher maps to an empty artist list.
            let artists = item
                .show
                .publisher
                .filter(|publisher| !publisher.is_empty())
                .map(|publisher| {
                    vec![Link {
                        name: publisher,
                        url: item.show.external_urls.spotify.clone(),
                    }]
                })
                .unwrap_or_default();

            PlaybackState::Session(Playback {
                kind: ItemKind::Episode,
                playing: raw.is_playing,
                title: item.name,
                external_url: item.external_urls.spotify,
                repeat_state: raw.repeat_state,
                shuffle_state: raw.shuffle_state,
                artists,
                album: Link {
                    name: item.show.name,
                    url: item.show.href,
                },
                covers: item.images,
                progress_ms: raw.progress_ms,
                duration_ms: item.duration_ms,
                volume_percent: raw.device.volume_percent.unwrap_or_default(),
                supports_volume: raw.device.supports_volume,
            })
        }
        "track" => {
            let Ok(item) = serde_json::from_value::<TrackItem>(item) else {
                return PlaybackState::NoSession;
            };

            PlaybackState::Session(Playback {
                kind: ItemKind::Track,
                playing: raw.is_playing,
                title: item.name,
                external_url: item.external_urls.spotify,
                repeat_state: raw.repeat_state,
                shuffle_state: raw.shuffle_state,
                artists: item
                    .artists
                    .into_iter()
                    .map(|artist| Link {
                        name: artist.name,
                        url: artist.external_urls.spotify,
                    })
                    .collect(),
                album: Link {
                    name: item.album.name,
                    url: item.album.href,
                },
                covers: item.album.images,
                progress_ms: raw.progress_ms,
                duration_ms: item.duration_ms,
                volume_percent: raw.device.volume_percent.unwrap_or_default(),
                supports_volume: raw.device.supports_volume,
            })
        }
        // The contract guarantees only the two kinds above, but an unknown
        // kind must not crash the caller.
        _ => PlaybackState::NoSession,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track_payload() -> CurrentlyPlaying {
        serde_json::from_value(json!({
            "device": { "volume_percent": 43, "supports_volume": true },
            "repeat_state": "context",
            "shuffle_state": true,
            "progress_ms": 12_345,
            "currently_playing_type": "track",
            "is_playing": true,
            "item": {
                "name": "L'enfer",
                "external_urls": { "spotify": "https://open.spotify.com/track/1" },
                "artists": [
                    { "name": "Stromae", "external_urls": { "spotify": "https://open.spotify.com/artist/1" } },
                    { "name": "Orelsan", "external_urls": { "spotify": "https://open.spotify.com/artist/2" } }
                ],
                "album": {
                    "name": "Multitude",
                    "href": "https://api.spotify.com/v1/albums/1",
                    "images": [
                        { "url": "https://i.scdn.co/image/a", "width": 640, "height": 640 },
                        { "url": "https://i.scdn.co/image/b", "width": 300, "height": 300 }
                    ]
                },
                "duration_ms": 180_000
            }
        }))
        .unwrap()
    }

    fn episode_payload(publisher: Option<&str>) -> CurrentlyPlaying {
        serde_json::from_value(json!({
            "device": { "volume_percent": 80, "supports_volume": false },
            "repeat_state": "off",
            "shuffle_state": false,
            "progress_ms": 60_000,
            "currently_playing_type": "episode",
            "is_playing": false,
            "item": {
                "name": "Episode 12",
                "external_urls": { "spotify": "https://open.spotify.com/episode/1" },
                "images": [ { "url": "https://i.scdn.co/image/ep", "width": 640, "height": 640 } ],
                "show": {
                    "name": "Some Show",
                    "publisher": publisher,
                    "external_urls": { "spotify": "https://open.spotify.com/show/1" },
                    "href": "https://api.spotify.com/v1/shows/1"
                },
                "duration_ms": 3_600_000
            }
        }))
        .unwrap()
    }

    #[test]
    fn absent_item_yields_no_session() {
        let raw: CurrentlyPlaying = serde_json::from_value(json!({
            "device": {}, "is_playing": false, "item": null,
            "currently_playing_type": "track"
        }))
        .unwrap();
        assert_eq!(normalize(raw), PlaybackState::NoSession);
        assert_eq!(normalize(CurrentlyPlaying::default()), PlaybackState::NoSession);
    }

    #[test]
    fn unknown_discriminator_yields_no_session() {
        let mut raw = track_payload();
        raw.currently_playing_type = "ad".to_owned();
        assert_eq!(normalize(raw), PlaybackState::NoSession);
    }

    #[test]
    fn track_covers_come_from_the_album_in_order() {
        let PlaybackState::Session(playback) = normalize(track_payload()) else {
            panic!("expected a session");
        };

        assert_eq!(playback.kind, ItemKind::Track);
        assert_eq!(playback.covers.len(), 2);
        assert_eq!(playback.covers[0].url, "https://i.scdn.co/image/a");
        assert_eq!(playback.covers[1].url, "https://i.scdn.co/image/b");
        assert_eq!(playback.artists.len(), 2);
        assert_eq!(playback.artists[0].name, "Stromae");
        assert_eq!(playback.album.name, "Multitude");
        assert_eq!(playback.album.url, "https://api.spotify.com/v1/albums/1");
    }

    #[test]
    fn verbatim_fields_are_copied_unchanged() {
        let PlaybackState::Session(playback) = normalize(track_payload()) else {
            panic!("expected a session");
        };

        assert!(playback.playing);
        assert_eq!(playback.progress_ms, 12_345);
        assert_eq!(playback.duration_ms, 180_000);
        assert_eq!(playback.repeat_state, "context");
        assert!(playback.shuffle_state);
        assert_eq!(playback.volume_percent, 43);
        assert!(playback.supports_volume);
    }

    #[test]
    fn episode_maps_show_fields_and_own_covers() {
        let PlaybackState::Session(playback) = normalize(episode_payload(Some("The Publisher")))
        else {
            panic!("expected a session");
        };

        assert_eq!(playback.kind, ItemKind::Episode);
        assert_eq!(playback.artists.len(), 1);
        assert_eq!(playback.artists[0].name, "The Publisher");
        assert_eq!(playback.artists[0].url, "https://open.spotify.com/show/1");
        assert_eq!(playback.album.name, "Some Show");
        assert_eq!(playback.album.url, "https://api.spotify.com/v1/shows/1");
        assert_eq!(playback.covers.len(), 1);
        assert_eq!(playback.covers[0].url, "https://i.scdn.co/image/ep");
    }

    #[test]
    fn episode_artists_empty_exactly_when_publisher_missing_or_empty() {
        for absent in [None, Some("")] {
            let PlaybackState::Session(playback) = normalize(episode_payload(absent)) else {
                panic!("expected a session");
            };
            assert!(playback.artists.is_empty());
        }
    }
}
