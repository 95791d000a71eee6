use crate::segmentation::SegmentationMask;
use image::{imageops, Rgba, RgbaImage};
use std::sync::Arc;
use thiserror::Error;

/// Solid stand-in while an image background is still loading (#1a1a2e).
pub const FALLBACK_COLOR: Rgba<u8> = Rgba([26, 26, 46, 255]);

/// What goes behind the person in the viewfinder.
#[derive(Debug, Clone)]
pub enum BackgroundSource {
    /// Raw camera feed, no mask needed.
    None,
    /// The live frame itself, box-blurred.
    Blur { radius: u32 },
    /// A chosen backdrop image; `None` inside means the load has not
    /// finished yet and the solid fallback is drawn instead.
    Image(Option<Arc<RgbaImage>>),
}

impl BackgroundSource {
    pub fn needs_mask(&self) -> bool {
        !matches!(self, BackgroundSource::None)
    }
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("mask {mask_width}x{mask_height} does not match frame {frame_width}x{frame_height}")]
    MaskSizeMismatch {
        mask_width: u32,
        mask_height: u32,
        frame_width: u32,
        frame_height: u32,
    },
}

struct ScaledBackground {
    source: Arc<RgbaImage>,
    image: RgbaImage,
}

/// Blends live frame and background through the person mask. Holds the
/// stretched copy of the current backdrop so it is not resized every
/// tick.
pub struct Compositor {
    scaled: Option<ScaledBackground>,
}

impl Compositor {
    pub fn new() -> Self {
        Self { scaled: None }
    }

    /// Person pixels come from the live frame at full opacity, the rest
    /// from the background layer. The mask must match the frame exactly;
    /// the caller falls back to the raw feed when it does not.
    pub fn composite(
        &mut self,
        live: &RgbaImage,
        mask: &SegmentationMask,
        background: &BackgroundSource,
    ) -> Result<RgbaImage, CompositeError> {
        let (width, height) = live.dimensions();
        if mask.width() != width || mask.height() != height {
            return Err(CompositeError::MaskSizeMismatch {
                mask_width: mask.width(),
                mask_height: mask.height(),
                frame_width: width,
                frame_height: height,
            });
        }

        let mut output = match background {
            BackgroundSource::None => return Ok(live.clone()),
            BackgroundSource::Blur { radius } => box_blur(live, *radius),
            BackgroundSource::Image(Some(source)) => self.scaled_to(source, width, height),
            BackgroundSource::Image(None) => RgbaImage::from_pixel(width, height, FALLBACK_COLOR),
        };

        for (x, y, pixel) in output.enumerate_pixels_mut() {
            if mask.is_person(x, y) {
                let mut live_pixel = *live.get_pixel(x, y);
                live_pixel[3] = 255;
                *pixel = live_pixel;
            }
        }
        Ok(output)
    }

    /// Backdrop stretched (not cropped) to the frame size, cached per
    /// source image and target dimensions.
    fn scaled_to(&mut self, source: &Arc<RgbaImage>, width: u32, height: u32) -> RgbaImage {
        if let Some(cached) = &self.scaled {
            if Arc::ptr_eq(&cached.source, source) && cached.image.dimensions() == (width, height)
            {
                return cached.image.clone();
            }
        }
        let image = imageops::resize(
            source.as_ref(),
            width,
            height,
            imageops::FilterType::Triangle,
        );
        self.scaled = Some(ScaledBackground {
            source: Arc::clone(source),
            image: image.clone(),
        });
        image
    }
}

/// Two-pass box blur with edge extension so borders keep their
/// brightness. Alpha passes through untouched.
pub fn box_blur(src: &RgbaImage, radius: u32) -> RgbaImage {
    if radius == 0 {
        return src.clone();
    }
    let (width, height) = src.dimensions();
    let mut tmp = src.clone();
    let mut out = src.clone();
    let w = width as i64;
    let h = height as i64;
    let r = radius as i64;
    let win = (2 * r + 1) as u64;

    // Horizontal pass: src rows into tmp.
    {
        let src_raw: &[u8] = src.as_raw();
        let tmp_raw: &mut [u8] = &mut tmp;
        for y in 0..h {
            let row = (y * w * 4) as usize;
            for c in 0..3 {
                let sample = |x: i64| src_raw[row + (x.clamp(0, w - 1) * 4) as usize + c] as u64;
                let mut sum = sample(0) * (r as u64 + 1);
                for x in 1..=r {
                    sum += sample(x);
                }
                for x in 0..w {
                    tmp_raw[row + (x * 4) as usize + c] = (sum / win) as u8;
                    sum += sample(x + r + 1);
                    sum -= sample(x - r);
                }
            }
        }
    }

    // Vertical pass: tmp columns into out.
    {
        let tmp_raw: &[u8] = &tmp;
        let out_raw: &mut [u8] = &mut out;
        for x in 0..w {
            let col = (x * 4) as usize;
            for c in 0..3 {
                let sample =
                    |y: i64| tmp_raw[(y.clamp(0, h - 1) * w * 4) as usize + col + c] as u64;
                let mut sum = sample(0) * (r as u64 + 1);
                for y in 1..=r {
                    sum += sample(y);
                }
                for y in 0..h {
                    out_raw[(y * w * 4) as usize + col + c] = (sum / win) as u8;
                    sum += sample(y + r + 1);
                    sum -= sample(y - r);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_person_mask(width: u32, height: u32) -> SegmentationMask {
        let mut data = Vec::new();
        for _ in 0..height {
            for x in 0..width {
                data.push((x < width / 2) as u8);
            }
        }
        SegmentationMask::new(width, height, data).unwrap()
    }

    #[test]
    fn test_needs_mask() {
        assert!(!BackgroundSource::None.needs_mask());
        assert!(BackgroundSource::Blur { radius: 14 }.needs_mask());
        assert!(BackgroundSource::Image(None).needs_mask());
    }

    #[test]
    fn test_mismatched_mask_is_an_error() {
        let mut compositor = Compositor::new();
        let live = RgbaImage::new(8, 8);
        let mask = SegmentationMask::new(4, 4, vec![0; 16]).unwrap();
        let err = compositor
            .composite(&live, &mask, &BackgroundSource::Image(None))
            .unwrap_err();
        assert!(matches!(
            err,
            CompositeError::MaskSizeMismatch {
                mask_width: 4,
                frame_width: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_person_pixels_come_from_live_frame() {
        let mut compositor = Compositor::new();
        let live = RgbaImage::from_pixel(4, 4, Rgba([200, 10, 10, 255]));
        let mask = half_person_mask(4, 4);
        let out = compositor
            .composite(&live, &mask, &BackgroundSource::Image(None))
            .unwrap();
        assert_eq!(*out.get_pixel(0, 0), Rgba([200, 10, 10, 255]));
        assert_eq!(*out.get_pixel(1, 3), Rgba([200, 10, 10, 255]));
        assert_eq!(*out.get_pixel(2, 0), FALLBACK_COLOR);
        assert_eq!(*out.get_pixel(3, 3), FALLBACK_COLOR);
    }

    #[test]
    fn test_image_background_is_stretched_to_frame() {
        let mut compositor = Compositor::new();
        let live = RgbaImage::from_pixel(6, 4, Rgba([0, 255, 0, 255]));
        let backdrop = Arc::new(RgbaImage::from_pixel(2, 2, Rgba([5, 6, 7, 255])));
        let mask = SegmentationMask::new(6, 4, vec![0; 24]).unwrap();
        let out = compositor
            .composite(&live, &mask, &BackgroundSource::Image(Some(backdrop)))
            .unwrap();
        assert_eq!(out.dimensions(), (6, 4));
        for pixel in out.pixels() {
            assert_eq!(*pixel, Rgba([5, 6, 7, 255]));
        }
    }

    #[test]
    fn test_blur_background_keeps_person_sharp() {
        let mut compositor = Compositor::new();
        // Checkerboard so blurring changes background pixels visibly.
        let live = RgbaImage::from_fn(8, 8, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        let mask = half_person_mask(8, 8);
        let out = compositor
            .composite(&live, &mask, &BackgroundSource::Blur { radius: 2 })
            .unwrap();
        // Person half is the untouched checkerboard.
        assert_eq!(*out.get_pixel(0, 0), *live.get_pixel(0, 0));
        assert_eq!(*out.get_pixel(3, 5), *live.get_pixel(3, 5));
        // Background half is averaged toward gray.
        let bg = out.get_pixel(6, 4);
        assert!(bg[0] > 60 && bg[0] < 200);
    }

    #[test]
    fn test_all_person_mask_reproduces_live_frame_exactly() {
        let mut compositor = Compositor::new();
        let live = RgbaImage::from_fn(6, 6, |x, y| Rgba([(x * 40) as u8, (y * 40) as u8, 7, 255]));
        let mask = SegmentationMask::new(6, 6, vec![1; 36]).unwrap();
        let backdrop = Arc::new(RgbaImage::from_pixel(3, 3, Rgba([250, 0, 0, 255])));
        let out = compositor
            .composite(&live, &mask, &BackgroundSource::Image(Some(backdrop)))
            .unwrap();
        assert_eq!(out.as_raw(), live.as_raw());
    }

    #[test]
    fn test_all_background_mask_reproduces_background_exactly() {
        let mut compositor = Compositor::new();
        let live = RgbaImage::from_fn(8, 8, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        let mask = SegmentationMask::new(8, 8, vec![0; 64]).unwrap();

        let blurred = compositor
            .composite(&live, &mask, &BackgroundSource::Blur { radius: 2 })
            .unwrap();
        assert_eq!(blurred.as_raw(), box_blur(&live, 2).as_raw());

        let solid = compositor
            .composite(&live, &mask, &BackgroundSource::Image(None))
            .unwrap();
        for pixel in solid.pixels() {
            assert_eq!(*pixel, FALLBACK_COLOR);
        }
    }

    #[test]
    fn test_none_background_returns_live_frame() {
        let mut compositor = Compositor::new();
        let live = RgbaImage::from_pixel(4, 4, Rgba([9, 8, 7, 255]));
        let mask = half_person_mask(4, 4);
        let out = compositor
            .composite(&live, &mask, &BackgroundSource::None)
            .unwrap();
        assert_eq!(out.as_raw(), live.as_raw());
    }

    #[test]
    fn test_box_blur_zero_radius_is_identity() {
        let src = RgbaImage::from_fn(5, 5, |x, y| Rgba([(x * 40) as u8, (y * 40) as u8, 0, 255]));
        let out = box_blur(&src, 0);
        assert_eq!(out.as_raw(), src.as_raw());
    }

    #[test]
    fn test_box_blur_preserves_constant_image() {
        let src = RgbaImage::from_pixel(10, 10, Rgba([100, 150, 200, 255]));
        let out = box_blur(&src, 14);
        for pixel in out.pixels() {
            assert_eq!(*pixel, Rgba([100, 150, 200, 255]));
        }
    }

    #[test]
    fn test_box_blur_spreads_a_point() {
        let mut src = RgbaImage::from_pixel(5, 5, Rgba([0, 0, 0, 255]));
        src.put_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let out = box_blur(&src, 1);
        // 255 averaged over a 3x3 window in two integer passes.
        assert_eq!(out.get_pixel(2, 2)[0], 28);
        assert_eq!(out.get_pixel(1, 1)[0], 28);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(2, 2)[3], 255);
    }

    #[test]
    fn test_box_blur_radius_larger_than_image() {
        let src = RgbaImage::from_fn(2, 2, |x, _| Rgba([(x * 200) as u8, 0, 0, 255]));
        let out = box_blur(&src, 5);
        assert_eq!(out.dimensions(), (2, 2));
        for pixel in out.pixels() {
            assert!(pixel[0] <= 200);
            assert_eq!(pixel[3], 255);
        }
    }
}
