//! The full-screen board.
//!
//! `SharedDisplay` is the scheduler's sink: it stores the latest presentation
//! and wakes the UI. `MenuBoardApp` notices a changed presentation on the next
//! frame, tears down whatever surface was up and loads the new item. Exactly
//! one surface is drawn per frame.

use eframe::egui;
use egui::{pos2, vec2, Color32, ColorImage as EguiColorImage, RichText, Rect, TextureHandle, TextureOptions};
use log::{debug, error, info, trace};
use reqwest::Client as ReqwestClient;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::runtime::Handle;

use super::config::AppConfig;
use super::media_loader::{fetch_image, fetch_video_to_temp_file};
use super::model::Presentation;
use super::runtime::{self, DisplaySink};
use super::scheduler::{EventSender, SchedulerEvent};
use super::video::VideoPlayback;

const VIDEO_REPAINT_INTERVAL: Duration = Duration::from_millis(1000 / 30);
const PLACEHOLDER_TEXT: &str = "Menu coming soon";

type Pending<T> = Arc<Mutex<Option<(u64, T)>>>;

fn lock<T>(slot: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sink handed to the scheduler runtime.
pub struct SharedDisplay {
    current: Arc<Mutex<Presentation>>,
    ctx: egui::Context,
}

impl DisplaySink for SharedDisplay {
    fn present(&self, presentation: Presentation) {
        trace!("Presentation requested: {:?}", presentation);
        *lock(&self.current) = presentation;
        self.ctx.request_repaint();
    }
}

pub struct MenuBoardApp {
    requested: Arc<Mutex<Presentation>>,
    shown: Presentation,
    events: EventSender,
    http_client: ReqwestClient,
    runtime: Handle,
    closed_message: String,
    image_texture: Option<TextureHandle>,
    pending_image: Pending<EguiColorImage>,
    pending_video: Pending<NamedTempFile>,
    video: Option<VideoPlayback>,
    video_texture: Option<TextureHandle>,
}

impl MenuBoardApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: AppConfig, http_client: ReqwestClient) -> Self {
        info!("Initializing MenuBoardApp...");
        let requested = Arc::new(Mutex::new(Presentation::Blank));
        let sink = Arc::new(SharedDisplay { current: requested.clone(), ctx: cc.egui_ctx.clone() });
        let events = runtime::start(&config, http_client.clone(), sink);

        Self {
            requested,
            shown: Presentation::Blank,
            events,
            http_client,
            runtime: Handle::current(),
            closed_message: config.hours.closed_message,
            image_texture: None,
            pending_image: Arc::new(Mutex::new(None)),
            pending_video: Arc::new(Mutex::new(None)),
            video: None,
            video_texture: None,
        }
    }

    fn sync_presentation(&mut self, ctx: &egui::Context) {
        let requested = lock(&self.requested).clone();
        if requested == self.shown {
            return;
        }
        debug!("Switching surface from {:?} to {:?}", self.shown, requested);
        self.reset_surfaces();
        match &requested {
            Presentation::Image { play_id, media } => self.begin_image_load(ctx, *play_id, media.url.clone()),
            Presentation::Video { play_id, media } => self.begin_video_load(ctx, *play_id, media.url.clone()),
            Presentation::Blank | Presentation::Placeholder | Presentation::Dormant => {}
        }
        self.shown = requested;
    }

    fn reset_surfaces(&mut self) {
        self.image_texture = None;
        self.video = None;
        self.video_texture = None;
        *lock(&self.pending_image) = None;
        *lock(&self.pending_video) = None;
    }

    fn begin_image_load(&self, ctx: &egui::Context, play_id: u64, url: String) {
        let client = self.http_client.clone();
        let pending = self.pending_image.clone();
        let events = self.events.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            match fetch_image(&client, &url).await {
                Ok(image) => *lock(&pending) = Some((play_id, image)),
                Err(e) => {
                    error!("Could not load image '{}': {}", url, e);
                    let _ = events.send(SchedulerEvent::PlaybackFailed { play_id, reason: e.to_string() });
                }
            }
            ctx.request_repaint();
        });
    }

    fn begin_video_load(&self, ctx: &egui::Context, play_id: u64, url: String) {
        let client = self.http_client.clone();
        let pending = self.pending_video.clone();
        let events = self.events.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            match fetch_video_to_temp_file(&client, &url).await {
                Ok(file) => *lock(&pending) = Some((play_id, file)),
                Err(e) => {
                    error!("Could not download video '{}': {}", url, e);
                    let _ = events.send(SchedulerEvent::PlaybackFailed { play_id, reason: e.to_string() });
                }
            }
            ctx.request_repaint();
        });
    }

    /// Moves finished downloads and decoded frames onto the GPU.
    fn poll_media(&mut self, ctx: &egui::Context) {
        let current = self.shown.play_id();

        if let Some((play_id, image)) = lock(&self.pending_image).take() {
            if Some(play_id) == current {
                self.image_texture = Some(ctx.load_texture(format!("menu_{}", play_id), image, TextureOptions::LINEAR));
            } else {
                trace!("Dropping image for stale play {}", play_id);
            }
        }

        if let Some((play_id, file)) = lock(&self.pending_video).take() {
            if Some(play_id) == current {
                self.video = Some(VideoPlayback::start(play_id, file, self.events.clone()));
            } else {
                trace!("Dropping video download for stale play {}", play_id);
            }
        }

        if let Some(frame) = self.video.as_ref().and_then(VideoPlayback::latest_frame) {
            if let Some(texture) = &mut self.video_texture {
                texture.set(frame, TextureOptions::LINEAR);
            } else {
                let name = format!("video_{}", current.unwrap_or_default());
                self.video_texture = Some(ctx.load_texture(name, frame, TextureOptions::LINEAR));
            }
        }
    }
}

impl eframe::App for MenuBoardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.sync_presentation(ctx);
        self.poll_media(ctx);

        let frame = egui::Frame::none().fill(Color32::BLACK);
        egui::CentralPanel::default().frame(frame).show(ctx, |ui| {
            let available_rect = ui.max_rect();
            match &self.shown {
                Presentation::Image { .. } => {
                    if let Some(texture) = &self.image_texture {
                        paint_fitted(ui, texture, available_rect);
                    }
                }
                Presentation::Video { .. } => {
                    if let Some(texture) = &self.video_texture {
                        paint_fitted(ui, texture, available_rect);
                    }
                }
                Presentation::Placeholder => {
                    ui.centered_and_justified(|ui| {
                        ui.label(RichText::new(PLACEHOLDER_TEXT).size(48.0).color(Color32::LIGHT_GRAY));
                    });
                }
                Presentation::Dormant => {
                    ui.centered_and_justified(|ui| {
                        ui.label(RichText::new(&self.closed_message).size(48.0).color(Color32::GRAY));
                    });
                }
                Presentation::Blank => {}
            }
        });

        if self.video.is_some() {
            ctx.request_repaint_after(VIDEO_REPAINT_INTERVAL);
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("MenuBoardApp on_exit called. Stopping playback.");
        self.reset_surfaces();
    }
}

fn paint_fitted(ui: &egui::Ui, texture: &TextureHandle, available_rect: Rect) {
    let size = texture.size_vec2();
    let draw_rect = calculate_draw_rect(size.x, size.y, available_rect);
    let uv = Rect::from_min_max(pos2(0.0, 0.0), pos2(1.0, 1.0));
    ui.painter().image(texture.id(), draw_rect, uv, Color32::WHITE);
}

/// Largest rect with the media's aspect ratio that fits, centred.
fn calculate_draw_rect(media_width: f32, media_height: f32, available_rect: Rect) -> Rect {
    if media_width <= 0.0 || media_height <= 0.0 {
        return available_rect;
    }
    let aspect_ratio = media_width / media_height;
    let mut draw_width = available_rect.width();
    let mut draw_height = available_rect.width() / aspect_ratio;
    if draw_height > available_rect.height() {
        draw_height = available_rect.height();
        draw_width = available_rect.height() * aspect_ratio;
    }
    Rect::from_center_size(available_rect.center(), vec2(draw_width, draw_height))
}
