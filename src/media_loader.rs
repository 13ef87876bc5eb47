//! Downloads media for the display front-end.
//!
//! Images are fetched and decoded into an `egui::ColorImage`; videos are
//! streamed into a temporary file that the ffmpeg decoder reads from.

use egui::ColorImage as EguiColorImage;
use log::{debug, error, info, trace};
use reqwest::Client as ReqwestClient;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio_stream::StreamExt;

use super::errors::PlaybackError;

/// Fetches an image from its public URL and decodes it.
#[must_use = "fetching an image can fail; the Result must be handled"]
pub async fn fetch_image(client: &ReqwestClient, url: &str) -> Result<EguiColorImage, PlaybackError> {
    debug!("Fetching image: '{}'", url);
    let response = client.get(url).send().await.map_err(|e| {
        error!("Request error fetching image '{}': {:?}", url, e);
        PlaybackError::Download(e)
    })?;

    let response = response.error_for_status().map_err(|e| {
        error!("HTTP error {} fetching image '{}'", e.status().unwrap_or_default(), url);
        PlaybackError::Download(e)
    })?;

    let image_bytes = response.bytes().await?;

    trace!("Decoding {} byte(s) of image data from '{}'", image_bytes.len(), url);
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&image_bytes))
        .await
        .map_err(|e| PlaybackError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(|e| {
            error!("Error decoding image '{}': {:?}", url, e);
            PlaybackError::Image(e)
        })?;

    let size = [decoded.width() as usize, decoded.height() as usize];
    let image_buffer = decoded.to_rgba8();
    let pixels = image_buffer.as_flat_samples();
    let egui_image = EguiColorImage::from_rgba_unmultiplied(size, pixels.as_slice());
    info!("Fetched and decoded image '{}' ({}x{})", url, size[0], size[1]);
    Ok(egui_image)
}

/// Streams a video from its public URL into a temporary file.
#[must_use = "fetching a video can fail; the Result must be handled"]
pub async fn fetch_video_to_temp_file(client: &ReqwestClient, url: &str) -> Result<NamedTempFile, PlaybackError> {
    debug!("Fetching video '{}' to temp file", url);
    let response = client.get(url).send().await.map_err(|e| {
        error!("Request error fetching video '{}': {:?}", url, e);
        PlaybackError::Download(e)
    })?;
    let response = response.error_for_status().map_err(|e| {
        error!("HTTP error {} fetching video '{}'", e.status().unwrap_or_default(), url);
        PlaybackError::Download(e)
    })?;

    let mut temp_file = NamedTempFile::new()?;
    trace!("Created temp file for video '{}' at: {:?}", url, temp_file.path());
    let mut stream = response.bytes_stream();
    let mut written = 0usize;
    while let Some(item) = stream.next().await {
        let chunk = item.map_err(|e| {
            error!("Stream error while downloading video '{}': {:?}", url, e);
            PlaybackError::Download(e)
        })?;
        temp_file.write_all(&chunk)?;
        written += chunk.len();
    }
    temp_file.flush()?;
    info!("Fetched video '{}' ({} bytes) to {:?}", url, written, temp_file.path());
    Ok(temp_file)
}
