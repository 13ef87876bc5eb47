//! Builds the rotation playlist from the two media lists.

use super::model::{ContentQueue, MediaReference};

/// Interleaves images and videos by index: image[0], video[0], image[1], video[1], …
/// until the longer list runs out.
pub fn build(images: &[MediaReference], videos: &[MediaReference]) -> ContentQueue {
    let longest = images.len().max(videos.len());
    let mut items = Vec::with_capacity(images.len() + videos.len());
    for i in 0..longest {
        if let Some(image) = images.get(i) {
            items.push(image.clone());
        }
        if let Some(video) = videos.get(i) {
            items.push(video.clone());
        }
    }
    ContentQueue::new(items)
}
