use anyhow::Result;
use eframe::egui;
use log::info;
use std::sync::Arc;

mod camera;
mod compositor;
mod config;
mod crop;
mod editor;
mod filters;
mod pipeline;
mod segmentation;
mod store;
mod texture;
mod ui;

use crate::camera::{CameraController, TestPatternSource, VideoSource};
use crate::config::Config;
use crate::pipeline::{RenderParams, RenderPipeline};
use crate::segmentation::{ExternalProcessEngine, Segmenter};
use crate::store::{BackgroundLibrary, PhotoStore};
use crate::ui::PhotoboothApp;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("📸 Starting Photobooth");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;
    config.create_directories()?;
    info!(
        "Configuration loaded: {}x{} display, {}x{} camera",
        config.display.width, config.display.height, config.camera.width, config.camera.height
    );

    let photo_store = PhotoStore::new(&config.storage.photo_dir)?;
    let background_library = BackgroundLibrary::new(&config.storage.background_dir)?;

    // Probe the segmentation helper; background replacement silently
    // degrades to a plain viewfinder when it is missing.
    let segmenter = match ExternalProcessEngine::probe(
        &config.pipeline.segment_command,
        config.segment_timeout(),
    ) {
        Some(engine) => Segmenter::new(Some(Arc::new(engine))),
        None => {
            log::warn!(
                "Segmentation helper '{}' not found, background replacement disabled",
                config.pipeline.segment_command
            );
            Segmenter::new(None)
        }
    };

    // Acquire a video source. An absent camera keeps the app usable:
    // either the animated test pattern or a retryable error screen.
    let mut camera_available = false;
    let mut using_test_pattern = false;
    let video: Box<dyn VideoSource> = {
        let mut controller = CameraController::new(
            config.camera.width,
            config.camera.height,
            config.camera.quality,
        )?;
        if controller.is_available() {
            controller.start_preview()?;
            camera_available = true;
            Box::new(controller)
        } else if config.camera.allow_test_pattern {
            log::warn!("No camera detected, using the animated test pattern");
            using_test_pattern = true;
            Box::new(TestPatternSource::new(
                config.camera.width,
                config.camera.height,
            ))
        } else {
            log::warn!("No camera detected");
            Box::new(controller)
        }
    };

    let pipeline = RenderPipeline::start(video, segmenter, RenderParams::default());

    // Setup eframe options for the configured display
    let width = config.display.width as f32;
    let height = config.display.height as f32;
    let mut viewport = egui::ViewportBuilder::default()
        .with_inner_size([width, height])
        .with_min_inner_size([width, height])
        .with_resizable(false);
    if config.display.fullscreen {
        viewport = viewport
            .with_decorations(false)
            .with_fullscreen(true)
            .with_always_on_top();
    }
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };

    info!("Launching GUI application...");

    eframe::run_native(
        "Photobooth",
        options,
        Box::new(move |cc| {
            // Setup egui style for touch interface
            setup_touch_style(&cc.egui_ctx);

            Box::new(PhotoboothApp::new(
                config,
                photo_store,
                background_library,
                pipeline,
                camera_available,
                using_test_pattern,
            ))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e))?;

    info!("Application shut down gracefully");
    Ok(())
}

fn setup_touch_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    // Larger UI elements for touch interaction
    style.spacing.button_padding = egui::vec2(16.0, 12.0);
    style.spacing.item_spacing = egui::vec2(12.0, 8.0);
    style.spacing.window_margin = egui::Margin::same(16.0);
    style.spacing.menu_margin = egui::Margin::same(8.0);

    // Larger text for better readability
    style.text_styles.insert(
        egui::TextStyle::Button,
        egui::FontId::new(20.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Body,
        egui::FontId::new(16.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Heading,
        egui::FontId::new(26.0, egui::FontFamily::Proportional),
    );

    // Touch-friendly sliders and controls
    style.spacing.slider_width = 300.0;
    style.spacing.combo_width = 200.0;

    ctx.set_style(style);
}
