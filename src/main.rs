use eframe::{egui, NativeOptions};
use ffmpeg_next as ffmpeg;
use log::{error, info};

mod cache_store;
mod clock;
mod config;
mod content_fetcher;
mod display;
mod errors;
mod firestore_client;
mod hours_gate;
mod media_loader;
mod model;
mod network;
mod queue_builder;
mod retry;
mod runtime;
mod scheduler;
mod video;

use display::MenuBoardApp;
use errors::{AppError, FetchError, PlaybackError};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting menuboard_rs application...");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let app_config = config::load_config(&config_path).map_err(|e| {
        error!("Failed to load configuration from {}: {}", config_path, e);
        e
    })?;
    info!("Configuration loaded for project {}", app_config.firestore.project_id);

    ffmpeg::init().map_err(PlaybackError::from)?;
    let http_client = network::build_http_client(&app_config.network).map_err(FetchError::from)?;

    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default().with_title("Menu Board").with_fullscreen(true),
        ..Default::default()
    };
    eframe::run_native("Menu Board", options, Box::new(move |cc| Box::new(MenuBoardApp::new(cc, app_config, http_client))))?;
    info!("Menu board window closed.");
    Ok(())
}
