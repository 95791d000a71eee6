use eframe::egui;

use crate::editor::{CropOutcome, CropRect, MIN_CROP_SIZE};
use crate::ui::{DragState, HandlePosition, PhotoboothApp, HANDLE_SIZE};

impl PhotoboothApp {
    /// Draws the crop selection over the editor view and runs its
    /// interactions. `image_size` is the rendered view in buffer pixels;
    /// `self.crop_rect` stays in that coordinate space so the selection
    /// maps 1:1 onto what `apply_crop` extracts.
    pub fn render_crop_overlay(
        &mut self,
        ui: &mut egui::Ui,
        display_rect: egui::Rect,
        image_size: egui::Vec2,
    ) {
        // Uniform scale, the displayed image keeps its aspect ratio
        let scale_x = display_rect.width() / image_size.x;
        let scale_y = display_rect.height() / image_size.y;
        let scale = scale_x.min(scale_y);

        if self.crop_rect.is_none() {
            let margin = (image_size.min_elem() * 0.15).min(50.0);
            self.crop_rect = Some(egui::Rect::from_min_max(
                egui::pos2(margin, margin),
                egui::pos2(image_size.x - margin, image_size.y - margin),
            ));
        }

        let Some(crop_rect) = self.crop_rect else {
            return;
        };

        let crop_display = egui::Rect::from_min_max(
            display_rect.min + egui::vec2(crop_rect.min.x * scale, crop_rect.min.y * scale),
            display_rect.min + egui::vec2(crop_rect.max.x * scale, crop_rect.max.y * scale),
        );

        // Interactions first, the painter borrow comes after
        self.handle_crop_interactions(ui, crop_display, display_rect, image_size, scale);

        let painter = ui.painter();

        // Dim everything outside the selection
        let shade = egui::Color32::from_black_alpha(180);
        painter.rect_filled(
            egui::Rect::from_min_max(
                display_rect.min,
                egui::pos2(display_rect.max.x, crop_display.min.y),
            ),
            0.0,
            shade,
        );
        painter.rect_filled(
            egui::Rect::from_min_max(
                egui::pos2(display_rect.min.x, crop_display.max.y),
                display_rect.max,
            ),
            0.0,
            shade,
        );
        painter.rect_filled(
            egui::Rect::from_min_max(
                egui::pos2(display_rect.min.x, crop_display.min.y),
                egui::pos2(crop_display.min.x, crop_display.max.y),
            ),
            0.0,
            shade,
        );
        painter.rect_filled(
            egui::Rect::from_min_max(
                egui::pos2(crop_display.max.x, crop_display.min.y),
                egui::pos2(display_rect.max.x, crop_display.max.y),
            ),
            0.0,
            shade,
        );

        painter.rect_stroke(crop_display, 0.0, egui::Stroke::new(3.0, egui::Color32::WHITE));

        self.draw_crop_handles(painter, crop_display);
    }

    fn handle_crop_interactions(
        &mut self,
        ui: &mut egui::Ui,
        crop_display: egui::Rect,
        display_rect: egui::Rect,
        image_size: egui::Vec2,
        scale: f32,
    ) {
        let handles = [
            (HandlePosition::TopLeft, crop_display.left_top()),
            (HandlePosition::TopRight, crop_display.right_top()),
            (HandlePosition::BottomLeft, crop_display.left_bottom()),
            (HandlePosition::BottomRight, crop_display.right_bottom()),
        ];

        for (handle_pos, handle_center) in handles {
            let handle_rect =
                egui::Rect::from_center_size(handle_center, egui::vec2(HANDLE_SIZE, HANDLE_SIZE));
            let response = ui.interact(
                handle_rect,
                ui.id().with(format!("{:?}", handle_pos)),
                egui::Sense::drag(),
            );

            if response.drag_started() {
                self.drag_state = DragState::DraggingHandle(handle_pos);
            }

            if response.dragged() && self.drag_state == DragState::DraggingHandle(handle_pos) {
                if let Some(pos) = response.interact_pointer_pos() {
                    self.update_crop_rect_from_handle(handle_pos, pos, display_rect, image_size, scale);
                }
            }
        }

        // Dragging inside the selection moves it whole
        let crop_response = ui.interact(
            crop_display,
            ui.id().with("crop_move"),
            egui::Sense::drag(),
        );

        if crop_response.drag_started() && self.drag_state == DragState::None {
            self.drag_state = DragState::MovingCrop;
        }

        if crop_response.dragged() && self.drag_state == DragState::MovingCrop {
            let delta = crop_response.drag_delta() / scale;
            if let Some(rect) = self.crop_rect {
                let mut moved = rect.translate(delta);
                // Keep the selection inside the image
                if moved.min.x < 0.0 {
                    moved = moved.translate(egui::vec2(-moved.min.x, 0.0));
                }
                if moved.min.y < 0.0 {
                    moved = moved.translate(egui::vec2(0.0, -moved.min.y));
                }
                if moved.max.x > image_size.x {
                    moved = moved.translate(egui::vec2(image_size.x - moved.max.x, 0.0));
                }
                if moved.max.y > image_size.y {
                    moved = moved.translate(egui::vec2(0.0, image_size.y - moved.max.y));
                }
                self.crop_rect = Some(moved);
            }
        }

        if ui.input(|i| i.pointer.any_released()) {
            self.drag_state = DragState::None;
        }
    }

    fn update_crop_rect_from_handle(
        &mut self,
        handle: HandlePosition,
        screen_pos: egui::Pos2,
        display_rect: egui::Rect,
        image_size: egui::Vec2,
        scale: f32,
    ) {
        let min_size = MIN_CROP_SIZE as f32;
        if let Some(mut rect) = self.crop_rect {
            // Pointer position back in image coordinates
            let image_pos = (screen_pos - display_rect.min) / scale;

            match handle {
                HandlePosition::TopLeft => {
                    rect.min = egui::pos2(
                        image_pos.x.max(0.0).min(rect.max.x - min_size),
                        image_pos.y.max(0.0).min(rect.max.y - min_size),
                    );
                }
                HandlePosition::TopRight => {
                    rect.min.y = image_pos.y.max(0.0).min(rect.max.y - min_size);
                    rect.max.x = image_pos.x.min(image_size.x).max(rect.min.x + min_size);
                }
                HandlePosition::BottomLeft => {
                    rect.min.x = image_pos.x.max(0.0).min(rect.max.x - min_size);
                    rect.max.y = image_pos.y.min(image_size.y).max(rect.min.y + min_size);
                }
                HandlePosition::BottomRight => {
                    rect.max = egui::pos2(
                        image_pos.x.min(image_size.x).max(rect.min.x + min_size),
                        image_pos.y.min(image_size.y).max(rect.min.y + min_size),
                    );
                }
            }

            self.crop_rect = Some(rect);
        }
    }

    fn draw_crop_handles(&self, painter: &egui::Painter, crop_display: egui::Rect) {
        let handles = [
            crop_display.left_top(),
            crop_display.right_top(),
            crop_display.left_bottom(),
            crop_display.right_bottom(),
        ];

        for center in handles {
            painter.circle_filled(center, HANDLE_SIZE / 2.0, egui::Color32::WHITE);
            painter.circle_stroke(
                center,
                HANDLE_SIZE / 2.0,
                egui::Stroke::new(2.0, egui::Color32::BLACK),
            );
        }
    }

    /// Hands the selection to the edit session. Coordinates are already
    /// in rendered-view pixels, so this only quantizes to whole pixels.
    pub fn apply_crop_selection(&mut self) {
        let Some(rect) = self.crop_rect else {
            self.show_crop = false;
            return;
        };
        let Some(session) = self.editor.as_mut() else {
            return;
        };

        let crop = CropRect {
            x: rect.min.x.max(0.0).floor() as u32,
            y: rect.min.y.max(0.0).floor() as u32,
            width: rect.width().round() as u32,
            height: rect.height().round() as u32,
        };

        match session.apply_crop(crop) {
            CropOutcome::Applied => {
                self.draft = *session.state();
                self.editor_dirty = true;
                self.show_crop = false;
                self.crop_rect = None;
                self.drag_state = DragState::None;
            }
            CropOutcome::TooSmall => {
                self.set_status("✗ Crop area is too small".to_string());
            }
        }
    }
}
