use crate::ui::PhotoboothApp;
use egui::{Context, TextureHandle, TextureOptions};
use image::RgbaImage;

impl PhotoboothApp {
    /// Streams viewfinder frames into one reused texture.
    pub fn update_live_texture(&mut self, ctx: &Context, image: &RgbaImage) {
        set_texture(&mut self.live_texture, ctx, "live_view", image);
    }

    pub fn update_review_texture(&mut self, ctx: &Context, image: &RgbaImage) {
        set_texture(&mut self.review_texture, ctx, "review_photo", image);
    }

    /// Editor view. Rotation and crop change its size, which forces a
    /// texture recreate instead of an in-place set.
    pub fn update_editor_texture(&mut self, ctx: &Context, image: &RgbaImage) {
        set_texture(&mut self.editor_texture, ctx, "editor_view", image);
    }
}

fn set_texture(slot: &mut Option<TextureHandle>, ctx: &Context, name: &str, image: &RgbaImage) {
    // Skip invalid frames to prevent a white flash
    if image.width() == 0 || image.height() == 0 {
        return;
    }

    let size = [image.width() as usize, image.height() as usize];
    let pixels = image.as_flat_samples();
    let color_image = egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice());

    match slot {
        // Only update in place while the size matches; a stale-sized
        // texture would stretch for one frame
        Some(texture) if texture.size() == size => {
            texture.set(color_image, TextureOptions::NEAREST);
        }
        _ => {
            *slot = Some(ctx.load_texture(name, color_image, TextureOptions::NEAREST));
        }
    }
}
