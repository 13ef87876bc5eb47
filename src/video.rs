//! Video playback on a dedicated decoder thread.
//!
//! The thread decodes the downloaded file with ffmpeg, converts each frame to
//! RGBA and hands it to the UI over a small bounded channel, sleeping one frame
//! interval between frames. When the stream runs out it reports `VideoEnded`;
//! any error reports `PlaybackFailed`. A playback that is dropped stops its
//! thread silently: its `play_id` is already stale.

use egui::ColorImage as EguiColorImage;
use log::{debug, error, info, trace};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;

use super::errors::PlaybackError;
use super::scheduler::{EventSender, SchedulerEvent};

const FRAME_BUFFER: usize = 5;
const DEFAULT_FRAME_RATE: f64 = 30.0;

enum DecodeOutcome {
    Finished,
    Stopped,
}

/// State of the video currently on the video surface.
#[derive(Debug)]
pub struct VideoPlayback {
    pub play_id: u64,
    frames: Receiver<EguiColorImage>,
    stop: Arc<AtomicBool>,
    /// Keeps the downloaded file alive until playback is dropped.
    _temp_file: NamedTempFile,
}

impl VideoPlayback {
    /// Starts decoding `temp_file` on its own thread.
    pub fn start(play_id: u64, temp_file: NamedTempFile, events: EventSender) -> Self {
        let (tx_frames, rx_frames) = sync_channel::<EguiColorImage>(FRAME_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let path = temp_file.path().to_path_buf();
        let thread_events = events.clone();

        debug!("Spawning video decoding thread for play {} ({:?})", play_id, path);
        let spawned = thread::Builder::new().name(format!("video-{}", play_id)).spawn(move || {
            match decode_to_frames(&path, &tx_frames, &stop_flag) {
                Ok(DecodeOutcome::Finished) => {
                    info!("Video for play {} reached its natural end.", play_id);
                    let _ = thread_events.send(SchedulerEvent::VideoEnded { play_id });
                }
                Ok(DecodeOutcome::Stopped) => {
                    debug!("Video decoder for play {} stopped early.", play_id);
                }
                Err(e) => {
                    error!("Video playback for play {} failed: {}", play_id, e);
                    let _ = thread_events.send(SchedulerEvent::PlaybackFailed { play_id, reason: e.to_string() });
                }
            }
        });
        if let Err(e) = spawned {
            error!("Could not spawn video decoder thread: {}", e);
            let _ = events.send(SchedulerEvent::PlaybackFailed { play_id, reason: e.to_string() });
        }

        Self { play_id, frames: rx_frames, stop, _temp_file: temp_file }
    }

    /// Most recent decoded frame since the last call, if any.
    pub fn latest_frame(&self) -> Option<EguiColorImage> {
        let mut latest = None;
        while let Ok(frame) = self.frames.try_recv() {
            latest = Some(frame);
        }
        latest
    }
}

impl Drop for VideoPlayback {
    fn drop(&mut self) {
        trace!("Stopping video playback for play {}", self.play_id);
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn frame_interval(frame_rate: f64) -> Duration {
    let rate = if frame_rate.is_finite() && frame_rate > 0.0 { frame_rate } else { DEFAULT_FRAME_RATE };
    Duration::from_secs_f64(1.0 / rate)
}

fn decode_to_frames(path: &Path, frames: &SyncSender<EguiColorImage>, stop: &AtomicBool) -> Result<DecodeOutcome, PlaybackError> {
    let mut ictx = ffmpeg::format::input(path)?;
    let (stream_index, interval, mut decoder) = {
        let input_stream = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| PlaybackError::NoVideoStream(path.display().to_string()))?;
        let context_decoder = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())?;
        let decoder = context_decoder.decoder().video()?;
        (input_stream.index(), frame_interval(f64::from(input_stream.avg_frame_rate())), decoder)
    };
    debug!(
        "Video decoder ready: {:?} {}x{}, frame interval {:?}",
        decoder.format(),
        decoder.width(),
        decoder.height(),
        interval
    );

    let mut scaler = Scaler::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        Pixel::RGBA,
        decoder.width(),
        decoder.height(),
        Flags::BILINEAR,
    )?;

    for (stream, packet) in ictx.packets() {
        if stop.load(Ordering::Relaxed) {
            return Ok(DecodeOutcome::Stopped);
        }
        if stream.index() != stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        if !drain_frames(&mut decoder, &mut scaler, frames, interval, stop)? {
            return Ok(DecodeOutcome::Stopped);
        }
    }
    decoder.send_eof()?;
    if !drain_frames(&mut decoder, &mut scaler, frames, interval, stop)? {
        return Ok(DecodeOutcome::Stopped);
    }
    Ok(DecodeOutcome::Finished)
}

/// Sends every frame the decoder has ready. Returns `false` once playback should stop.
fn drain_frames(
    decoder: &mut ffmpeg::decoder::Video,
    scaler: &mut Scaler,
    frames: &SyncSender<EguiColorImage>,
    interval: Duration,
    stop: &AtomicBool,
) -> Result<bool, PlaybackError> {
    let mut decoded = VideoFrame::empty();
    while decoder.receive_frame(&mut decoded).is_ok() {
        if stop.load(Ordering::Relaxed) {
            return Ok(false);
        }
        let mut rgba = VideoFrame::empty();
        scaler.run(&decoded, &mut rgba)?;
        if frames.send(to_color_image(&rgba)).is_err() {
            return Ok(false);
        }
        thread::sleep(interval);
    }
    Ok(true)
}

fn to_color_image(frame: &VideoFrame) -> EguiColorImage {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let data = frame.data(0);
    let mut pixels = Vec::with_capacity(width * height * 4);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + width * 4]);
    }
    EguiColorImage::from_rgba_unmultiplied([width, height], &pixels)
}
