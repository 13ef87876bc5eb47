//! Defines the core data structures used by the menu board.
//!
//! This includes the media references fetched from the document store, the
//! interleaved content queue, the business-hours window and the
//! presentations the display front-end knows how to render.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{EmptyQueueError, FetchError};

/// Kind of a single item in the rotation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// A single image or video to show, addressed by its public URL.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaReference {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaReference {
    pub fn image(url: impl Into<String>) -> Self {
        Self { kind: MediaKind::Image, url: url.into() }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self { kind: MediaKind::Video, url: url.into() }
    }
}

/// A menu image record as stored in the `menuImages` collection and in the cache.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MenuItem {
    #[serde(rename = "imageURL")]
    pub image_url: String,
}

/// One snapshot of both media collections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentLists {
    pub menu_items: Vec<MenuItem>,
    pub video_sources: Vec<String>,
}

impl ContentLists {
    pub fn image_refs(&self) -> Vec<MediaReference> {
        self.menu_items.iter().map(|item| MediaReference::image(item.image_url.clone())).collect()
    }

    pub fn video_refs(&self) -> Vec<MediaReference> {
        self.video_sources.iter().map(|url| MediaReference::video(url.clone())).collect()
    }
}

/// The ordered playlist currently being cycled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentQueue {
    items: Vec<MediaReference>,
}

impl ContentQueue {
    pub fn new(items: Vec<MediaReference>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[MediaReference] {
        &self.items
    }

    /// Returns the item under `cursor`, wrapping around the queue length.
    pub fn item_at(&self, cursor: usize) -> Result<&MediaReference, EmptyQueueError> {
        if self.items.is_empty() {
            return Err(EmptyQueueError);
        }
        Ok(&self.items[cursor % self.items.len()])
    }
}

/// Daily open/close window.
///
/// Stored remotely (and in the cache) as a packed `HHMM` integer pair,
/// e.g. `{ "openTime": 700, "closeTime": 2000 }`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(try_from = "PackedHours", into = "PackedHours")]
pub struct BusinessHours {
    pub open_hour: u32,
    pub open_minute: u32,
    pub close_hour: u32,
    pub close_minute: u32,
}

/// Wire form of `BusinessHours`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct PackedHours {
    #[serde(rename = "openTime")]
    pub open_time: i64,
    #[serde(rename = "closeTime")]
    pub close_time: i64,
}

impl BusinessHours {
    /// Builds the window from two `HHMM` integers, rejecting impossible times.
    pub fn from_packed(open_time: i64, close_time: i64) -> Result<Self, FetchError> {
        let (open_hour, open_minute) = unpack_hhmm("openTime", open_time)?;
        let (close_hour, close_minute) = unpack_hhmm("closeTime", close_time)?;
        Ok(Self { open_hour, open_minute, close_hour, close_minute })
    }

    pub fn open_minutes(&self) -> u32 {
        self.open_hour * 60 + self.open_minute
    }

    pub fn close_minutes(&self) -> u32 {
        self.close_hour * 60 + self.close_minute
    }
}

fn unpack_hhmm(field: &str, packed: i64) -> Result<(u32, u32), FetchError> {
    if !(0..=2359).contains(&packed) {
        return Err(FetchError::MalformedRecord(format!("{} out of range: {}", field, packed)));
    }
    let hour = (packed / 100) as u32;
    let minute = (packed % 100) as u32;
    if hour > 23 || minute > 59 {
        return Err(FetchError::MalformedRecord(format!("{} is not a valid HHMM time: {}", field, packed)));
    }
    Ok((hour, minute))
}

impl TryFrom<PackedHours> for BusinessHours {
    type Error = FetchError;

    fn try_from(packed: PackedHours) -> Result<Self, Self::Error> {
        Self::from_packed(packed.open_time, packed.close_time)
    }
}

impl From<BusinessHours> for PackedHours {
    fn from(hours: BusinessHours) -> Self {
        Self {
            open_time: i64::from(hours.open_hour * 100 + hours.open_minute),
            close_time: i64::from(hours.close_hour * 100 + hours.close_minute),
        }
    }
}

impl fmt::Display for BusinessHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.open_hour, self.open_minute, self.close_hour, self.close_minute
        )
    }
}

/// Result of checking the clock against the business-hours window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closed,
}

/// What the display front-end should render right now.
///
/// Exactly one surface is visible at a time: the grid surface (an image or the
/// placeholder tile), the video surface, or the dormant page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Presentation {
    /// Nothing decided yet (start-up).
    Blank,
    Image { play_id: u64, media: MediaReference },
    Video { play_id: u64, media: MediaReference },
    /// No content available; a retry is pending.
    Placeholder,
    /// Outside business hours.
    Dormant,
}

impl Presentation {
    pub fn play_id(&self) -> Option<u64> {
        match self {
            Presentation::Image { play_id, .. } | Presentation::Video { play_id, .. } => Some(*play_id),
            _ => None,
        }
    }
}
