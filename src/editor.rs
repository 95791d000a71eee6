use crate::filters::{ColorMatrix, FilterOp};
use anyhow::{Context, Result};
use image::{imageops, RgbaImage};

/// Crops narrower or shorter than this (in buffer pixels) are treated as
/// accidental clicks and dropped.
pub const MIN_CROP_SIZE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn next_clockwise(&self) -> Rotation {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// One immutable editing snapshot. Sliders are percentages; 100 means
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditorState {
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub rotation: Rotation,
    pub crop_area: Option<CropRect>,
}

impl Default for EditorState {
    fn default() -> Self {
        Self {
            brightness: 100,
            contrast: 100,
            saturation: 100,
            rotation: Rotation::Deg0,
            crop_area: None,
        }
    }
}

impl EditorState {
    pub fn clamped(mut self) -> Self {
        self.brightness = self.brightness.clamp(20, 200);
        self.contrast = self.contrast.clamp(20, 200);
        self.saturation = self.saturation.clamp(0, 200);
        self
    }
}

/// Snapshot log with a cursor. The first entry is always the identity
/// state, so the cursor never leaves valid range and `current` never
/// fails.
pub struct EditHistory {
    snapshots: Vec<EditorState>,
    cursor: usize,
}

impl EditHistory {
    pub fn new() -> Self {
        Self {
            snapshots: vec![EditorState::default()],
            cursor: 0,
        }
    }

    pub fn current(&self) -> &EditorState {
        &self.snapshots[self.cursor]
    }

    /// Appends a snapshot, discarding any redo branch beyond the cursor.
    pub fn push(&mut self, state: EditorState) {
        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push(state);
        self.cursor = self.snapshots.len() - 1;
    }

    pub fn undo(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.cursor + 1 < self.snapshots.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropOutcome {
    Applied,
    TooSmall,
}

/// Owns the captured still and its edit history. The displayed image is
/// always re-derived from the current snapshot against the working
/// buffer; sliders and rotation never bake into it. Crop is the one
/// destructive edit: it swaps the working buffer for the cropped region
/// of the rendered view, so undo restores earlier slider values but not
/// the pixels cropped away.
pub struct EditSession {
    source: RgbaImage,
    history: EditHistory,
}

impl EditSession {
    pub fn new(still: RgbaImage) -> Self {
        Self {
            source: still,
            history: EditHistory::new(),
        }
    }

    pub fn state(&self) -> &EditorState {
        self.history.current()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> bool {
        self.history.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.history.redo()
    }

    /// Commits a slider change as one history snapshot.
    pub fn commit(&mut self, state: EditorState) {
        self.history.push(state.clamped());
    }

    pub fn rotate_clockwise(&mut self) {
        let mut state = *self.history.current();
        state.rotation = state.rotation.next_clockwise();
        self.history.push(state);
    }

    /// Dimensions of the rendered view (axes swap at 90 and 270).
    pub fn rendered_dimensions(&self) -> (u32, u32) {
        let (w, h) = self.source.dimensions();
        if self.history.current().rotation.swaps_axes() {
            (h, w)
        } else {
            (w, h)
        }
    }

    /// Derives the displayed image: color adjustments compiled to one
    /// matrix, then rotation.
    pub fn render(&self) -> RgbaImage {
        self.render_with(self.history.current())
    }

    /// Same derivation for a state that is not committed yet, used to
    /// preview slider values mid drag.
    pub fn render_with(&self, state: &EditorState) -> RgbaImage {
        let mut out = self.source.clone();
        let ops = [
            FilterOp::Brightness(state.brightness as f32 / 100.0),
            FilterOp::Contrast(state.contrast as f32 / 100.0),
            FilterOp::Saturate(state.saturation as f32 / 100.0),
        ];
        ColorMatrix::from_ops(&ops).apply(&mut out);
        match state.rotation {
            Rotation::Deg0 => out,
            Rotation::Deg90 => imageops::rotate90(&out),
            Rotation::Deg180 => imageops::rotate180(&out),
            Rotation::Deg270 => imageops::rotate270(&out),
        }
    }

    /// Applies a crop given in rendered-view pixel coordinates. The
    /// extracted region (adjustments and rotation as displayed) becomes
    /// the new working buffer; rotation resets in the same snapshot.
    pub fn apply_crop(&mut self, rect: CropRect) -> CropOutcome {
        let (view_w, view_h) = self.rendered_dimensions();
        if rect.x >= view_w || rect.y >= view_h {
            return CropOutcome::TooSmall;
        }
        let width = rect.width.min(view_w - rect.x);
        let height = rect.height.min(view_h - rect.y);
        if width < MIN_CROP_SIZE || height < MIN_CROP_SIZE {
            return CropOutcome::TooSmall;
        }

        let rendered = self.render();
        self.source = imageops::crop_imm(&rendered, rect.x, rect.y, width, height).to_image();

        let mut state = *self.history.current();
        state.rotation = Rotation::Deg0;
        state.crop_area = Some(CropRect {
            x: rect.x,
            y: rect.y,
            width,
            height,
        });
        self.history.push(state);
        CropOutcome::Applied
    }

    /// Current rendered view, losslessly encoded for saving or download.
    pub fn export_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.render())
    }
}

/// Encodes a buffer as lossless PNG, independent of any file extension.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )
        .context("Failed to encode photo as PNG")?;
    Ok(bytes)
}
