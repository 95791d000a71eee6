use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use image::RgbaImage;
use log::{info, warn};
use tokio::sync::mpsc;

use crate::camera::CameraController;
use crate::compositor::BackgroundSource;
use crate::config::Config;
use crate::editor::{encode_png, EditSession, EditorState};
use crate::filters::FilterKind;
use crate::pipeline::RenderPipeline;
use crate::store::{BackgroundLibrary, PhotoStore};

// ============================================================================
// CONSTANTS FOR UI STYLING - Easy to modify
// ============================================================================
pub const HANDLE_SIZE: f32 = 28.0; // Crop handle diameter
const UI_PADDING: f32 = 20.0; // Padding from screen edges
const CHIP_RADIUS: f32 = 46.0; // Background and filter selector chips
const CAPTURE_RADIUS: f32 = 90.0; // The shutter button
const ACTION_RADIUS: f32 = 70.0; // Review and editor action buttons

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Live,
    Review,
    Edit,
}

/// What the guest picked in the background strip. `Library` holds the
/// record id; the decoded image lives in `loaded_backgrounds`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundChoice {
    None,
    Blur,
    Library(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragState {
    None,
    DraggingHandle(HandlePosition),
    MovingCrop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandlePosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

// ============================================================================
// MAIN APP STRUCT
// ============================================================================

pub struct PhotoboothApp {
    // Phase management
    pub current_phase: Phase,

    // Configuration and storage
    pub config: Config,
    pub photo_store: PhotoStore,
    pub background_library: BackgroundLibrary,

    // Live pipeline
    pub pipeline: RenderPipeline,
    pub camera_available: bool,
    pub using_test_pattern: bool,
    pub live_texture: Option<egui::TextureHandle>,
    pub last_tick: Option<Instant>,

    // Background selection
    pub background_choice: BackgroundChoice,
    pub loaded_backgrounds: HashMap<String, Arc<RgbaImage>>,
    pub loading_background: Option<String>,
    pub background_tx: mpsc::UnboundedSender<(String, Option<Arc<RgbaImage>>)>,
    pub background_rx: mpsc::UnboundedReceiver<(String, Option<Arc<RgbaImage>>)>,

    // Captured photo under review
    pub captured: Option<RgbaImage>,
    pub review_texture: Option<egui::TextureHandle>,

    // Editor
    pub editor: Option<EditSession>,
    pub editor_texture: Option<egui::TextureHandle>,
    pub editor_dirty: bool,
    pub draft: EditorState,

    // Crop state
    pub show_crop: bool,
    pub crop_rect: Option<egui::Rect>, // In rendered-view coordinates
    pub drag_state: DragState,

    // Status toast
    pub status_message: Option<String>,
    pub status_message_time: Option<Instant>,

    // Exit mechanism for kiosk mode
    pub exit_tap_count: u32,
    pub exit_tap_last_time: Option<Instant>,
}

// ============================================================================
// INITIALIZATION
// ============================================================================

impl PhotoboothApp {
    pub fn new(
        config: Config,
        photo_store: PhotoStore,
        background_library: BackgroundLibrary,
        pipeline: RenderPipeline,
        camera_available: bool,
        using_test_pattern: bool,
    ) -> Self {
        let (background_tx, background_rx) = mpsc::unbounded_channel();

        Self {
            current_phase: Phase::Live,
            config,
            photo_store,
            background_library,
            pipeline,
            camera_available,
            using_test_pattern,
            live_texture: None,
            last_tick: None,
            background_choice: BackgroundChoice::None,
            loaded_backgrounds: HashMap::new(),
            loading_background: None,
            background_tx,
            background_rx,
            captured: None,
            review_texture: None,
            editor: None,
            editor_texture: None,
            editor_dirty: false,
            draft: EditorState::default(),
            show_crop: false,
            crop_rect: None,
            drag_state: DragState::None,
            status_message: None,
            status_message_time: None,
            exit_tap_count: 0,
            exit_tap_last_time: None,
        }
    }

    pub fn set_status(&mut self, message: String) {
        self.status_message = Some(message);
        self.status_message_time = Some(Instant::now());
    }
}

// ============================================================================
// MAIN UPDATE LOOP
// ============================================================================

impl eframe::App for PhotoboothApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ESC key to exit (for debugging in kiosk mode with keyboard)
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        // Hidden exit area for touchscreen (top-left corner, tap 5 times within 3 seconds)
        egui::Area::new("exit_area")
            .fixed_pos(egui::pos2(0.0, 0.0))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                let exit_button_size = egui::vec2(50.0, 50.0);
                let (_rect, response) = ui.allocate_exact_size(exit_button_size, egui::Sense::click());

                if response.clicked() {
                    let now = Instant::now();

                    // Reset count if more than 3 seconds passed since last tap
                    if let Some(last_time) = self.exit_tap_last_time {
                        if now.duration_since(last_time).as_secs() > 3 {
                            self.exit_tap_count = 0;
                        }
                    }

                    self.exit_tap_count += 1;
                    self.exit_tap_last_time = Some(now);

                    // Exit after 5 taps
                    if self.exit_tap_count >= 5 {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                }
            });

        self.drain_background_loads();

        match self.current_phase {
            Phase::Live => {
                self.tick_live(ctx);
                // Request continuous repaints for a smooth preview
                ctx.request_repaint();
            }
            Phase::Edit => self.refresh_editor_texture(ctx),
            Phase::Review => {}
        }

        if self.status_message.is_some() {
            // Keep repainting so the toast hides itself on quiet screens
            ctx.request_repaint_after(Duration::from_millis(250));
        }

        self.render_ui(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        // Kill the capture process before the window goes away
        self.pipeline.stop();
    }
}

impl PhotoboothApp {
    fn tick_live(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        let due = match self.last_tick {
            None => true,
            Some(last) => now.duration_since(last) >= Duration::from_millis(33),
        };
        if !due {
            return;
        }
        self.last_tick = Some(now);

        if let Some(frame) = self.pipeline.tick().cloned() {
            self.update_live_texture(ctx, &frame);
        }
    }

    /// Picks up backgrounds decoded on the runtime and applies the one
    /// the guest is still waiting for.
    fn drain_background_loads(&mut self) {
        while let Ok((id, loaded)) = self.background_rx.try_recv() {
            if self.loading_background.as_deref() == Some(id.as_str()) {
                self.loading_background = None;
            }
            match loaded {
                Some(image) => {
                    self.loaded_backgrounds.insert(id.clone(), Arc::clone(&image));
                    if self.background_choice == BackgroundChoice::Library(id) {
                        let mut params = self.pipeline.params().clone();
                        params.background = BackgroundSource::Image(Some(image));
                        self.pipeline.update_params(params);
                    }
                }
                None => {
                    if self.background_choice == BackgroundChoice::Library(id) {
                        self.select_background(BackgroundChoice::None);
                    }
                    self.set_status("✗ Could not load that background".to_string());
                }
            }
        }
    }

    fn render_ui(&mut self, ctx: &egui::Context) {
        // Fullscreen viewport with NO panels - use CentralPanel for everything
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let full_rect = ui.max_rect();

                self.render_viewport(ui, full_rect);

                // Overlay controls float on top of the viewport
                self.render_button_overlay(ctx, full_rect);

                self.render_status_message(ctx, full_rect);
            });
    }

    fn render_status_message(&mut self, ctx: &egui::Context, _screen_rect: egui::Rect) {
        // Auto-hide message after 3 seconds
        if let Some(message_time) = self.status_message_time {
            if message_time.elapsed().as_secs() > 3 {
                self.status_message = None;
                self.status_message_time = None;
            }
        }

        if let Some(ref message) = self.status_message {
            let is_success = message.starts_with('✓');

            egui::Area::new("status_message")
                .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, UI_PADDING * 3.0))
                .order(egui::Order::Tooltip)
                .show(ctx, |ui| {
                    egui::Frame::none()
                        .fill(if is_success {
                            egui::Color32::from_rgb(40, 120, 40) // Green for success
                        } else {
                            egui::Color32::from_rgb(180, 40, 40) // Red for error
                        })
                        .rounding(8.0)
                        .inner_margin(egui::Margin::symmetric(20.0, 15.0))
                        .show(ui, |ui| {
                            ui.label(
                                egui::RichText::new(message)
                                    .color(egui::Color32::WHITE)
                                    .size(20.0),
                            );
                        });
                });
        }
    }
}

// ============================================================================
// VIEWPORT RENDERING
// ============================================================================

impl PhotoboothApp {
    fn render_viewport(&mut self, ui: &mut egui::Ui, rect: egui::Rect) {
        match self.current_phase {
            Phase::Live => self.render_live_viewport(ui, rect),
            Phase::Review => self.render_review_viewport(ui, rect),
            Phase::Edit => self.render_edit_viewport(ui, rect),
        }
    }

    fn render_live_viewport(&mut self, ui: &mut egui::Ui, rect: egui::Rect) {
        ui.painter()
            .rect_filled(rect, 0.0, egui::Color32::from_rgb(40, 40, 40));

        if let Some(texture) = &self.live_texture {
            let image_size = texture.size_vec2();
            let display_size = fit_image_in_rect(image_size, rect.size());
            let centered_rect = center_rect_in_rect(display_size, rect);

            ui.allocate_ui_at_rect(centered_rect, |ui| {
                ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
            });
        } else {
            let message = if self.camera_available || self.using_test_pattern {
                "Starting camera..."
            } else {
                "No camera available"
            };
            ui.allocate_ui_at_rect(rect, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.label(egui::RichText::new(message).size(28.0));
                });
            });
        }

        self.render_segmentation_badge(ui, rect);

        if self.using_test_pattern {
            ui.painter().text(
                egui::pos2(rect.min.x + UI_PADDING, rect.min.y + UI_PADDING),
                egui::Align2::LEFT_TOP,
                "test pattern",
                egui::FontId::proportional(14.0),
                egui::Color32::from_gray(150),
            );
        }
    }

    fn render_segmentation_badge(&self, ui: &mut egui::Ui, rect: egui::Rect) {
        let (dot, label) = if self.pipeline.segmentation_ready() {
            (egui::Color32::from_rgb(80, 200, 120), "AI background ready")
        } else {
            (egui::Color32::from_gray(110), "AI background off")
        };

        let font = egui::FontId::proportional(16.0);
        let galley = ui
            .painter()
            .layout_no_wrap(label.to_string(), font, egui::Color32::WHITE);

        let badge_size = galley.size() + egui::vec2(36.0, 14.0);
        let badge_rect = egui::Rect::from_min_size(
            egui::pos2(
                rect.max.x - badge_size.x - UI_PADDING,
                rect.min.y + UI_PADDING,
            ),
            badge_size,
        );

        ui.painter().rect(
            badge_rect,
            badge_size.y / 2.0,
            egui::Color32::from_black_alpha(160),
            egui::Stroke::new(1.0, egui::Color32::from_gray(90)),
        );
        ui.painter().circle_filled(
            egui::pos2(badge_rect.min.x + 14.0, badge_rect.center().y),
            5.0,
            dot,
        );
        ui.painter().galley(
            egui::pos2(badge_rect.min.x + 26.0, badge_rect.center().y - galley.size().y / 2.0),
            galley,
        );
    }

    fn render_review_viewport(&mut self, ui: &mut egui::Ui, rect: egui::Rect) {
        ui.painter()
            .rect_filled(rect, 0.0, egui::Color32::from_rgb(40, 40, 40));

        if let Some(texture) = &self.review_texture {
            let image_size = texture.size_vec2();
            let display_size = fit_image_in_rect(image_size, rect.size());
            let centered_rect = center_rect_in_rect(display_size, rect);

            ui.allocate_ui_at_rect(centered_rect, |ui| {
                ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
            });
        } else {
            ui.allocate_ui_at_rect(rect, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.label("No photo");
                });
            });
        }
    }

    fn render_edit_viewport(&mut self, ui: &mut egui::Ui, rect: egui::Rect) {
        ui.painter()
            .rect_filled(rect, 0.0, egui::Color32::from_rgb(40, 40, 40));

        if let Some(texture) = &self.editor_texture {
            let image_size = texture.size_vec2();
            let display_size = fit_image_in_rect(image_size, rect.size());
            let centered_rect = center_rect_in_rect(display_size, rect);

            ui.allocate_ui_at_rect(centered_rect, |ui| {
                ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
            });

            if self.show_crop {
                self.render_crop_overlay(ui, centered_rect, image_size);
            }
        }
    }
}

// ============================================================================
// BUTTON ZONE RENDERING (OVERLAY)
// ============================================================================

impl PhotoboothApp {
    fn render_button_overlay(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        match self.current_phase {
            Phase::Live => self.render_live_buttons(ctx, screen_rect),
            Phase::Review => self.render_review_buttons(ctx, screen_rect),
            Phase::Edit => self.render_edit_buttons(ctx, screen_rect),
        }
    }

    // ============================================================================
    // PHASE 1: LIVE - Shutter bottom right, background and filter strips left
    // ============================================================================
    fn render_live_buttons(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        if !self.camera_available && !self.using_test_pattern {
            let center = egui::pos2(
                screen_rect.center().x,
                screen_rect.max.y - ACTION_RADIUS - UI_PADDING,
            );
            egui::Area::new("camera_retry_btn")
                .fixed_pos(center - egui::vec2(ACTION_RADIUS, ACTION_RADIUS))
                .order(egui::Order::Foreground)
                .show(ctx, |ui| {
                    if self.circular_button(ui, ACTION_RADIUS, "Try Again", "retry") {
                        self.retry_camera();
                    }
                });
            return;
        }

        // Shutter button in the bottom right corner
        let shutter_center = egui::pos2(
            screen_rect.max.x - CAPTURE_RADIUS - UI_PADDING,
            screen_rect.max.y - CAPTURE_RADIUS - UI_PADDING,
        );
        egui::Area::new("shutter_btn")
            .fixed_pos(shutter_center - egui::vec2(CAPTURE_RADIUS, CAPTURE_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                if self.circular_button_styled(
                    ui,
                    CAPTURE_RADIUS,
                    "",
                    "shutter",
                    egui::Color32::from_rgba_unmultiplied(230, 230, 235, 200),
                ) {
                    self.capture_photo(ctx);
                }
            });

        self.render_background_strip(ctx, screen_rect);
        self.render_filter_strip(ctx, screen_rect);
    }

    fn render_background_strip(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        let row_y = screen_rect.max.y - UI_PADDING - CHIP_RADIUS;
        let step = CHIP_RADIUS * 2.0 + UI_PADDING * 0.75;
        let mut chip_x = UI_PADDING + CHIP_RADIUS;

        let mut pending: Option<BackgroundChoice> = None;
        let mut add_requested = false;

        let builtin = [
            (BackgroundChoice::None, "None".to_string()),
            (BackgroundChoice::Blur, "Blur".to_string()),
        ];
        let library: Vec<(BackgroundChoice, String)> = self
            .background_library
            .active()
            .iter()
            .map(|r| (BackgroundChoice::Library(r.id.clone()), r.name.clone()))
            .collect();

        for (choice, name) in builtin.into_iter().chain(library) {
            let selected = self.background_choice == choice;
            let loading = matches!(&choice, BackgroundChoice::Library(id)
                if self.loading_background.as_deref() == Some(id.as_str()));
            let label = if loading {
                "...".to_string()
            } else {
                truncate_label(&name, 9)
            };
            let fill = if selected {
                egui::Color32::from_rgb(80, 120, 200)
            } else {
                egui::Color32::from_rgb(60, 60, 70)
            };

            // Chip ids key on the record id, names are not unique
            let key = match &choice {
                BackgroundChoice::None => "none",
                BackgroundChoice::Blur => "blur",
                BackgroundChoice::Library(id) => id.as_str(),
            };
            let area_id = egui::Id::new(format!("bg_chip_{}", key));
            let clicked = egui::Area::new(area_id)
                .fixed_pos(egui::pos2(chip_x - CHIP_RADIUS, row_y - CHIP_RADIUS))
                .order(egui::Order::Foreground)
                .show(ctx, |ui| self.circular_button_styled(ui, CHIP_RADIUS, &label, "bg", fill))
                .inner;
            if clicked && !selected {
                pending = Some(choice);
            }
            chip_x += step;
        }

        // Trailing chip lets the operator register a new backdrop image
        let clicked = egui::Area::new("bg_chip_add")
            .fixed_pos(egui::pos2(chip_x - CHIP_RADIUS, row_y - CHIP_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                self.circular_button_styled(
                    ui,
                    CHIP_RADIUS,
                    "+",
                    "bg_add",
                    egui::Color32::from_rgb(50, 70, 50),
                )
            })
            .inner;
        if clicked {
            add_requested = true;
        }

        if let Some(choice) = pending {
            self.select_background(choice);
        }
        if add_requested {
            self.add_background_from_file();
        }
    }

    fn render_filter_strip(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        let row_y = screen_rect.max.y - UI_PADDING * 2.0 - CHIP_RADIUS * 3.0;
        let step = CHIP_RADIUS * 2.0 + UI_PADDING * 0.75;
        let current = self.pipeline.params().filter;
        let mut pending: Option<FilterKind> = None;

        for (i, filter) in FilterKind::all().iter().enumerate() {
            let selected = *filter == current;
            let fill = if selected {
                egui::Color32::from_rgb(80, 120, 200)
            } else {
                egui::Color32::from_rgb(60, 60, 70)
            };
            let chip_x = UI_PADDING + CHIP_RADIUS + step * i as f32;

            let area_id = egui::Id::new(format!("filter_chip_{}", filter.name()));
            let clicked = egui::Area::new(area_id)
                .fixed_pos(egui::pos2(chip_x - CHIP_RADIUS, row_y - CHIP_RADIUS))
                .order(egui::Order::Foreground)
                .show(ctx, |ui| {
                    self.circular_button_styled(ui, CHIP_RADIUS, filter.name(), "filter", fill)
                })
                .inner;
            if clicked {
                pending = Some(*filter);
            }
        }

        if let Some(filter) = pending {
            let mut params = self.pipeline.params().clone();
            params.filter = filter;
            self.pipeline.update_params(params);
        }
    }

    // ============================================================================
    // PHASE 2: REVIEW - Retake / Edit / Download / Save in a centered row
    // ============================================================================
    fn render_review_buttons(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        let actions: [(&str, egui::Color32); 4] = [
            ("Retake", egui::Color32::from_rgb(80, 40, 40)),
            ("Edit", egui::Color32::from_rgb(60, 60, 70)),
            ("Download", egui::Color32::from_rgb(60, 60, 70)),
            ("Save", egui::Color32::from_rgb(40, 80, 40)),
        ];

        let step = ACTION_RADIUS * 2.0 + UI_PADDING;
        let total = step * actions.len() as f32 - UI_PADDING;
        let start_x = screen_rect.center().x - total / 2.0 + ACTION_RADIUS;
        let row_y = screen_rect.max.y - ACTION_RADIUS - UI_PADDING;

        let mut pending: Option<&str> = None;
        for (i, (label, fill)) in actions.into_iter().enumerate() {
            let center = egui::pos2(start_x + step * i as f32, row_y);
            let area_id = egui::Id::new(format!("review_btn_{}", label));
            let clicked = egui::Area::new(area_id)
                .fixed_pos(center - egui::vec2(ACTION_RADIUS, ACTION_RADIUS))
                .order(egui::Order::Foreground)
                .show(ctx, |ui| {
                    self.circular_button_styled(ui, ACTION_RADIUS, label, "review", fill)
                })
                .inner;
            if clicked {
                pending = Some(label);
            }
        }

        match pending {
            Some("Retake") => self.retake_photo(),
            Some("Edit") => self.open_editor(ctx),
            Some("Download") => self.download_photo(),
            Some("Save") => self.save_review_photo(),
            _ => {}
        }
    }

    // ============================================================================
    // PHASE 3: EDIT - Sliders on the right, actions on the left
    // ============================================================================
    fn render_edit_buttons(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        if self.show_crop {
            self.render_crop_action_buttons(ctx, screen_rect);
            return;
        }

        self.render_editor_sliders(ctx, screen_rect);

        let can_undo = self.editor.as_ref().map(|s| s.can_undo()).unwrap_or(false);
        let can_redo = self.editor.as_ref().map(|s| s.can_redo()).unwrap_or(false);

        // Row 1: Rotate, Crop, Undo, Redo
        let row1_y = screen_rect.max.y - ACTION_RADIUS * 4.0 - UI_PADDING * 3.0;
        let step = ACTION_RADIUS * 2.0 + UI_PADDING;
        let row1: [(&str, bool); 4] = [
            ("Rotate", true),
            ("Crop", true),
            ("Undo", can_undo),
            ("Redo", can_redo),
        ];

        let mut pending: Option<&str> = None;
        for (i, (label, enabled)) in row1.into_iter().enumerate() {
            let fill = if enabled {
                egui::Color32::from_rgb(60, 60, 70)
            } else {
                egui::Color32::from_rgb(45, 45, 50)
            };
            let x = UI_PADDING + ACTION_RADIUS + step * i as f32;
            let area_id = egui::Id::new(format!("edit_btn_{}", label));
            let clicked = egui::Area::new(area_id)
                .fixed_pos(egui::pos2(x - ACTION_RADIUS, row1_y))
                .order(egui::Order::Foreground)
                .show(ctx, |ui| {
                    self.circular_button_styled(ui, ACTION_RADIUS, label, "edit", fill)
                })
                .inner;
            if clicked && enabled {
                pending = Some(label);
            }
        }

        // Row 2: Save, Cancel
        let row2_y = screen_rect.max.y - ACTION_RADIUS * 2.0 - UI_PADDING;
        let row2: [(&str, egui::Color32); 2] = [
            ("Save", egui::Color32::from_rgb(40, 80, 40)),
            ("Cancel", egui::Color32::from_rgb(80, 40, 40)),
        ];
        for (i, (label, fill)) in row2.into_iter().enumerate() {
            let x = UI_PADDING + ACTION_RADIUS + step * i as f32;
            let area_id = egui::Id::new(format!("edit_btn_{}", label));
            let clicked = egui::Area::new(area_id)
                .fixed_pos(egui::pos2(x - ACTION_RADIUS, row2_y))
                .order(egui::Order::Foreground)
                .show(ctx, |ui| {
                    self.circular_button_styled(ui, ACTION_RADIUS, label, "edit", fill)
                })
                .inner;
            if clicked {
                pending = Some(label);
            }
        }

        match pending {
            Some("Rotate") => self.rotate_editor_photo(),
            Some("Crop") => {
                self.show_crop = true;
                self.crop_rect = None;
                self.drag_state = DragState::None;
            }
            Some("Undo") => self.undo_edit(),
            Some("Redo") => self.redo_edit(),
            Some("Save") => self.save_edited_photo(ctx),
            Some("Cancel") => self.close_editor(),
            _ => {}
        }
    }

    fn render_crop_action_buttons(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        let left_x = UI_PADDING + ACTION_RADIUS;
        let button_vertical_spacing = UI_PADDING * 2.0;

        // Center the two buttons vertically
        let total_height = ACTION_RADIUS * 4.0 + button_vertical_spacing;
        let start_y = (screen_rect.height() - total_height) / 2.0 + screen_rect.min.y;

        let mut cancel = false;
        let mut apply = false;

        egui::Area::new("cancel_crop_btn")
            .fixed_pos(
                egui::pos2(left_x, start_y + ACTION_RADIUS)
                    - egui::vec2(ACTION_RADIUS, ACTION_RADIUS),
            )
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                if self.circular_button_styled(
                    ui,
                    ACTION_RADIUS,
                    "Cancel",
                    "cancel",
                    egui::Color32::from_rgb(80, 40, 40),
                ) {
                    cancel = true;
                }
            });

        egui::Area::new("apply_crop_btn")
            .fixed_pos(
                egui::pos2(left_x, start_y + ACTION_RADIUS * 3.0 + button_vertical_spacing)
                    - egui::vec2(ACTION_RADIUS, ACTION_RADIUS),
            )
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                if self.circular_button_styled(
                    ui,
                    ACTION_RADIUS,
                    "Apply",
                    "apply",
                    egui::Color32::from_rgb(40, 80, 40),
                ) {
                    apply = true;
                }
            });

        if cancel {
            self.show_crop = false;
            self.crop_rect = None;
            self.drag_state = DragState::None;
        }
        if apply {
            self.apply_crop_selection();
        }
    }

    // ============================================================================
    // EDITOR SLIDERS - Brightness / Contrast / Saturation, commit on release
    // ============================================================================
    fn render_editor_sliders(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        let committed = match self.editor.as_ref() {
            Some(session) => *session.state(),
            None => return,
        };

        let slider_width = 60.0;
        let spacing = UI_PADDING;
        let knob_radius = slider_width * 0.6;
        let top_padding = spacing * 3.0 + knob_radius;
        let bottom_padding = spacing * 5.0;
        let full_slider_height = screen_rect.height() - top_padding - bottom_padding;
        let start_y = screen_rect.min.y + top_padding;

        let slider3_x = screen_rect.max.x - slider_width - spacing;
        let slider2_x = slider3_x - slider_width - spacing;
        let slider1_x = slider2_x - slider_width - spacing;

        let mut brightness = self.draft.brightness as f32;
        let changed = egui::Area::new("brightness_slider")
            .fixed_pos(egui::pos2(slider1_x, start_y))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                ui.vertical(|ui| {
                    vertical_slider(
                        ui,
                        &mut brightness,
                        20.0..=200.0,
                        slider_width,
                        full_slider_height,
                        "Brightness",
                    )
                })
                .inner
            })
            .inner;
        if changed {
            self.draft.brightness = brightness.round() as i32;
            self.editor_dirty = true;
        }

        let mut contrast = self.draft.contrast as f32;
        let changed = egui::Area::new("contrast_slider")
            .fixed_pos(egui::pos2(slider2_x, start_y))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                ui.vertical(|ui| {
                    vertical_slider(
                        ui,
                        &mut contrast,
                        20.0..=200.0,
                        slider_width,
                        full_slider_height,
                        "Contrast",
                    )
                })
                .inner
            })
            .inner;
        if changed {
            self.draft.contrast = contrast.round() as i32;
            self.editor_dirty = true;
        }

        let mut saturation = self.draft.saturation as f32;
        let changed = egui::Area::new("saturation_slider")
            .fixed_pos(egui::pos2(slider3_x, start_y))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                ui.vertical(|ui| {
                    vertical_slider(
                        ui,
                        &mut saturation,
                        0.0..=200.0,
                        slider_width,
                        full_slider_height,
                        "Saturation",
                    )
                })
                .inner
            })
            .inner;
        if changed {
            self.draft.saturation = saturation.round() as i32;
            self.editor_dirty = true;
        }

        // One history snapshot per slider gesture: values preview live
        // while dragging and commit when the pointer lifts.
        let released = ctx.input(|i| i.pointer.any_released());
        if released
            && (self.draft.brightness != committed.brightness
                || self.draft.contrast != committed.contrast
                || self.draft.saturation != committed.saturation)
        {
            if let Some(session) = self.editor.as_mut() {
                session.commit(self.draft);
                self.draft = *session.state();
                self.editor_dirty = true;
            }
        }
    }
}

// ============================================================================
// PHASE ACTIONS
// ============================================================================

impl PhotoboothApp {
    fn capture_photo(&mut self, ctx: &egui::Context) {
        match self.pipeline.capture() {
            Some(photo) => {
                info!("Captured {}x{} photo", photo.width(), photo.height());
                self.update_review_texture(ctx, &photo);
                self.captured = Some(photo);
                self.current_phase = Phase::Review;
            }
            None => self.set_status("✗ No frame to capture yet".to_string()),
        }
    }

    fn retake_photo(&mut self) {
        self.captured = None;
        self.review_texture = None;
        self.current_phase = Phase::Live;
    }

    fn open_editor(&mut self, ctx: &egui::Context) {
        let Some(photo) = self.captured.clone() else {
            return;
        };
        let session = EditSession::new(photo);
        self.draft = *session.state();
        self.editor = Some(session);
        self.editor_dirty = true;
        self.show_crop = false;
        self.crop_rect = None;
        self.drag_state = DragState::None;
        self.current_phase = Phase::Edit;
        self.refresh_editor_texture(ctx);
    }

    fn download_photo(&mut self) {
        let Some(photo) = self.captured.clone() else {
            return;
        };
        let default_name = format!(
            "photobooth_{}.png",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("PNG Image", &["png"])
            .set_file_name(&default_name)
            .save_file()
        {
            // Encode explicitly so a typed name without .png still works
            let written = encode_png(&photo).and_then(|bytes| Ok(std::fs::write(&path, bytes)?));
            match written {
                Ok(()) => self.set_status(format!("✓ Downloaded to {}", path.display())),
                Err(e) => self.set_status(format!("✗ Download failed: {}", e)),
            }
        }
    }

    fn save_review_photo(&mut self) {
        let Some(photo) = self.captured.clone() else {
            return;
        };
        let user = self.config.storage.default_user.clone();
        match self.photo_store.save(&photo, &user) {
            Ok(record) => self.set_status(format!("✓ Saved photo {}", record.id)),
            Err(e) => self.set_status(format!("✗ Save failed: {}", e)),
        }
    }

    fn rotate_editor_photo(&mut self) {
        if let Some(session) = self.editor.as_mut() {
            session.rotate_clockwise();
            self.draft = *session.state();
            self.editor_dirty = true;
            // The view just changed shape; any crop selection is stale
            self.crop_rect = None;
        }
    }

    fn undo_edit(&mut self) {
        if let Some(session) = self.editor.as_mut() {
            if session.undo() {
                self.draft = *session.state();
                self.editor_dirty = true;
                self.crop_rect = None;
            }
        }
    }

    fn redo_edit(&mut self) {
        if let Some(session) = self.editor.as_mut() {
            if session.redo() {
                self.draft = *session.state();
                self.editor_dirty = true;
                self.crop_rect = None;
            }
        }
    }

    fn save_edited_photo(&mut self, ctx: &egui::Context) {
        let rendered = match self.editor.as_ref() {
            Some(session) => session.render(),
            None => return,
        };
        let user = self.config.storage.default_user.clone();
        match self.photo_store.save(&rendered, &user) {
            Ok(record) => {
                self.set_status(format!("✓ Saved photo {}", record.id));
                self.update_review_texture(ctx, &rendered);
                self.captured = Some(rendered);
                self.close_editor();
            }
            Err(e) => self.set_status(format!("✗ Save failed: {}", e)),
        }
    }

    fn close_editor(&mut self) {
        self.editor = None;
        self.editor_texture = None;
        self.editor_dirty = false;
        self.show_crop = false;
        self.crop_rect = None;
        self.drag_state = DragState::None;
        self.current_phase = Phase::Review;
    }

    fn refresh_editor_texture(&mut self, ctx: &egui::Context) {
        if !self.editor_dirty {
            return;
        }
        let rendered = match self.editor.as_ref() {
            Some(session) => session.render_with(&self.draft),
            None => return,
        };
        self.update_editor_texture(ctx, &rendered);
        self.editor_dirty = false;
    }

    fn select_background(&mut self, choice: BackgroundChoice) {
        let background = match &choice {
            BackgroundChoice::None => BackgroundSource::None,
            BackgroundChoice::Blur => BackgroundSource::Blur {
                radius: self.config.pipeline.blur_radius,
            },
            BackgroundChoice::Library(id) => match self.loaded_backgrounds.get(id) {
                Some(image) => BackgroundSource::Image(Some(Arc::clone(image))),
                None => {
                    // Fallback fill shows until the decode lands
                    self.spawn_background_load(id.clone());
                    BackgroundSource::Image(None)
                }
            },
        };
        self.background_choice = choice;
        let mut params = self.pipeline.params().clone();
        params.background = background;
        self.pipeline.update_params(params);
    }

    fn spawn_background_load(&mut self, id: String) {
        if self.loading_background.as_deref() == Some(id.as_str()) {
            return;
        }
        let Some(record) = self
            .background_library
            .active()
            .into_iter()
            .find(|r| r.id == id)
            .cloned()
        else {
            return;
        };
        let path = self.background_library.background_path(&record);
        let tx = self.background_tx.clone();
        self.loading_background = Some(id.clone());

        tokio::spawn(async move {
            let loaded = match image::open(&path) {
                Ok(decoded) => Some(Arc::new(decoded.to_rgba8())),
                Err(e) => {
                    warn!("Failed to load background {}: {}", path.display(), e);
                    None
                }
            };
            let _ = tx.send((id, loaded));
        });
    }

    fn add_background_from_file(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Image Files", &["png", "jpg", "jpeg"])
            .pick_file()
        else {
            return;
        };
        match self.background_library.add_from_file(&path) {
            Ok(record) => {
                self.set_status(format!("✓ Added background {}", record.name));
                self.select_background(BackgroundChoice::Library(record.id));
            }
            Err(e) => self.set_status(format!("✗ Could not add background: {}", e)),
        }
    }

    fn retry_camera(&mut self) {
        let camera = &self.config.camera;
        match CameraController::new(camera.width, camera.height, camera.quality) {
            Ok(mut controller) if controller.is_available() => {
                match controller.start_preview() {
                    Ok(()) => {
                        self.pipeline.set_video(Box::new(controller));
                        self.camera_available = true;
                        self.live_texture = None;
                        self.set_status("✓ Camera connected".to_string());
                    }
                    Err(e) => self.set_status(format!("✗ Camera start failed: {}", e)),
                }
            }
            Ok(_) => self.set_status("✗ Still no camera detected".to_string()),
            Err(e) => self.set_status(format!("✗ Camera probe failed: {}", e)),
        }
    }
}

// ============================================================================
// CIRCULAR BUTTON HELPERS
// ============================================================================

impl PhotoboothApp {
    /// Basic circular button with default styling
    pub fn circular_button(&self, ui: &mut egui::Ui, radius: f32, text: &str, id: &str) -> bool {
        self.circular_button_styled(
            ui,
            radius,
            text,
            id,
            egui::Color32::from_rgba_unmultiplied(70, 70, 80, 180),
        )
    }

    /// Circular button with custom fill color
    pub fn circular_button_styled(
        &self,
        ui: &mut egui::Ui,
        radius: f32,
        text: &str,
        _id: &str,
        base_fill: egui::Color32,
    ) -> bool {
        let size = egui::vec2(radius * 2.0, radius * 2.0);
        let (rect, response) = ui.allocate_exact_size(size, egui::Sense::click());

        if ui.is_rect_visible(rect) {
            let painter = ui.painter();
            let center = rect.center();

            let (fill_color, stroke_color) = if response.is_pointer_button_down_on() {
                // Pressed state - darker
                let r = base_fill.r().saturating_sub(30);
                let g = base_fill.g().saturating_sub(30);
                let b = base_fill.b().saturating_sub(30);
                (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(120, 120, 130))
            } else if response.hovered() {
                // Hovered state - lighter
                let r = base_fill.r().saturating_add(20);
                let g = base_fill.g().saturating_add(20);
                let b = base_fill.b().saturating_add(20);
                (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(150, 150, 160))
            } else {
                (base_fill, egui::Color32::from_rgb(100, 100, 110))
            };

            // Shadow for depth
            painter.circle(
                center + egui::vec2(3.0, 3.0),
                radius,
                egui::Color32::from_black_alpha(80),
                egui::Stroke::NONE,
            );

            painter.circle(center, radius, fill_color, egui::Stroke::new(3.0, stroke_color));

            // Text scales with the button
            let font_id = egui::FontId::proportional(radius / 3.0);
            let galley = painter.layout_no_wrap(text.to_string(), font_id, egui::Color32::WHITE);
            let text_pos = center - galley.size() / 2.0;
            painter.galley(text_pos, galley);

            if response.hovered() {
                ui.ctx().set_cursor_icon(egui::CursorIcon::PointingHand);
            }
        }

        response.clicked()
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Vertical slider helper function
fn vertical_slider(
    ui: &mut egui::Ui,
    value: &mut f32,
    range: std::ops::RangeInclusive<f32>,
    width: f32,
    height: f32,
    label: &str,
) -> bool {
    let desired_size = egui::vec2(width, height);
    let (rect, mut response) = ui.allocate_exact_size(desired_size, egui::Sense::click_and_drag());

    let mut changed = false;

    if ui.is_rect_visible(rect) {
        let painter = ui.painter();

        // Background rail
        let rail_rect = rect.shrink2(egui::vec2(width * 0.3, 0.0));
        painter.rect(
            rail_rect,
            rail_rect.width() / 2.0,
            egui::Color32::from_rgb(40, 40, 45),
            egui::Stroke::new(2.0, egui::Color32::from_rgb(80, 80, 90)),
        );

        let min = *range.start();
        let max = *range.end();

        // Handle dragging (inverted y-axis, top = max)
        if response.dragged() || response.clicked() {
            if let Some(mouse_pos) = ui.ctx().pointer_interact_pos() {
                let new_normalized =
                    1.0 - ((mouse_pos.y - rect.top()) / rect.height()).clamp(0.0, 1.0);
                *value = min + new_normalized * (max - min);
                changed = true;
                response.mark_changed();
            }
        }

        let normalized = (*value - min) / (max - min);

        // Filled portion (from bottom up)
        let filled_height = rect.height() * normalized;
        if filled_height > 0.0 {
            let filled_rect = egui::Rect::from_min_max(
                egui::pos2(rail_rect.min.x, rail_rect.max.y - filled_height),
                rail_rect.max,
            );
            painter.rect(
                filled_rect,
                rail_rect.width() / 2.0,
                egui::Color32::from_rgb(80, 120, 200),
                egui::Stroke::NONE,
            );
        }

        // Knob
        let knob_y = rect.bottom() - rect.height() * normalized;
        let knob_center = egui::pos2(rect.center().x, knob_y);
        let knob_radius = width * 0.6;

        painter.circle(
            knob_center + egui::vec2(2.0, 2.0),
            knob_radius,
            egui::Color32::from_black_alpha(60),
            egui::Stroke::NONE,
        );
        painter.circle(
            knob_center,
            knob_radius,
            egui::Color32::from_rgb(200, 200, 210),
            egui::Stroke::new(2.0, egui::Color32::from_rgb(100, 100, 110)),
        );

        // Value bubble while dragging, on its own layer to avoid clipping
        if response.dragged() {
            let text = format!("{:.0}%", value);
            let font_id = egui::FontId::proportional(18.0);

            let layer_id = egui::LayerId::new(egui::Order::Tooltip, ui.id().with("value_bubble"));
            let layer_painter = ui.ctx().layer_painter(layer_id);

            let galley = layer_painter.layout_no_wrap(text, font_id, egui::Color32::WHITE);

            let bubble_size = galley.size() + egui::vec2(20.0, 12.0);
            let bubble_pos =
                egui::pos2(rect.left() - bubble_size.x - 12.0, knob_y - bubble_size.y / 2.0);
            let bubble_rect = egui::Rect::from_min_size(bubble_pos, bubble_size);

            layer_painter.rect(
                bubble_rect,
                6.0,
                egui::Color32::from_rgb(50, 50, 55),
                egui::Stroke::new(2.0, egui::Color32::from_rgb(120, 120, 130)),
            );

            let text_pos = bubble_rect.center() - galley.size() / 2.0;
            layer_painter.galley(text_pos, galley);
        }

        // Label below the slider, clear of the bottom handle
        let label_font = egui::FontId::proportional(14.0);
        let label_galley = painter.layout_no_wrap(label.to_string(), label_font, egui::Color32::WHITE);
        let label_pos = egui::pos2(
            rect.center().x - label_galley.size().x / 2.0,
            rect.bottom() + 40.0,
        );

        let label_bg_rect = egui::Rect::from_min_size(
            label_pos - egui::vec2(4.0, 2.0),
            label_galley.size() + egui::vec2(8.0, 4.0),
        );
        painter.rect(
            label_bg_rect,
            3.0,
            egui::Color32::from_black_alpha(180),
            egui::Stroke::NONE,
        );
        painter.galley(label_pos, label_galley);
    }

    changed
}

fn truncate_label(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        name.to_string()
    } else {
        let kept: String = name.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

// Helper functions for image centering
pub fn fit_image_in_rect(image_size: egui::Vec2, container_size: egui::Vec2) -> egui::Vec2 {
    let scale = (container_size.x / image_size.x).min(container_size.y / image_size.y);
    image_size * scale
}

pub fn center_rect_in_rect(content_size: egui::Vec2, container: egui::Rect) -> egui::Rect {
    let offset = (container.size() - content_size) * 0.5;
    egui::Rect::from_min_size(container.min + offset, content_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_image_preserves_aspect_ratio() {
        let fitted = fit_image_in_rect(egui::vec2(1280.0, 720.0), egui::vec2(640.0, 640.0));
        assert_eq!(fitted, egui::vec2(640.0, 360.0));

        let fitted = fit_image_in_rect(egui::vec2(720.0, 1280.0), egui::vec2(640.0, 640.0));
        assert_eq!(fitted, egui::vec2(360.0, 640.0));
    }

    #[test]
    fn test_center_rect_in_rect() {
        let container =
            egui::Rect::from_min_size(egui::pos2(100.0, 50.0), egui::vec2(800.0, 600.0));
        let centered = center_rect_in_rect(egui::vec2(400.0, 300.0), container);
        assert_eq!(centered.min, egui::pos2(300.0, 200.0));
        assert_eq!(centered.size(), egui::vec2(400.0, 300.0));
    }

    #[test]
    fn test_truncate_label() {
        assert_eq!(truncate_label("Blur", 9), "Blur");
        assert_eq!(truncate_label("Northern Lights", 9), "Northern…");
    }
}
