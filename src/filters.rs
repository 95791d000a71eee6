use image::RgbaImage;
use nalgebra::{Matrix3, Vector3};

/// A single color operation, matching the CSS filter-function semantics
/// the original web UI exposed. Amounts are fractions (1.0 = 100%),
/// angles are degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOp {
    Brightness(f32),
    Contrast(f32),
    Saturate(f32),
    Grayscale(f32),
    Sepia(f32),
    HueRotate(f32),
}

/// The fixed catalog of viewfinder filters. Every entry is a named,
/// ordered list of operations; the list compiles to one affine color
/// transform so a full frame costs a single matrix-vector per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    None,
    Sepia,
    BlackWhite,
    Warm,
    Cool,
    Vintage,
    Bright,
    Dramatic,
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FilterKind {
    pub fn all() -> &'static [FilterKind] {
        &[
            FilterKind::None,
            FilterKind::Sepia,
            FilterKind::BlackWhite,
            FilterKind::Warm,
            FilterKind::Cool,
            FilterKind::Vintage,
            FilterKind::Bright,
            FilterKind::Dramatic,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::None => "None",
            FilterKind::Sepia => "Sepia",
            FilterKind::BlackWhite => "B&W",
            FilterKind::Warm => "Warm",
            FilterKind::Cool => "Cool",
            FilterKind::Vintage => "Vintage",
            FilterKind::Bright => "Bright",
            FilterKind::Dramatic => "Dramatic",
        }
    }

    /// Operations in application order (first listed is applied first).
    pub fn ops(&self) -> &'static [FilterOp] {
        match self {
            FilterKind::None => &[],
            FilterKind::Sepia => &[FilterOp::Sepia(1.0)],
            FilterKind::BlackWhite => &[FilterOp::Grayscale(1.0)],
            FilterKind::Warm => &[FilterOp::Sepia(0.4), FilterOp::Saturate(1.5)],
            FilterKind::Cool => &[FilterOp::Saturate(0.8), FilterOp::HueRotate(20.0)],
            FilterKind::Vintage => &[
                FilterOp::Sepia(0.5),
                FilterOp::Contrast(1.2),
                FilterOp::Brightness(0.9),
            ],
            FilterKind::Bright => &[FilterOp::Brightness(1.3), FilterOp::Contrast(1.1)],
            FilterKind::Dramatic => &[FilterOp::Contrast(1.5), FilterOp::Brightness(0.85)],
        }
    }

    /// Applies this filter to the image in place. `None` leaves the
    /// buffer untouched.
    pub fn apply(&self, image: &mut RgbaImage) {
        let ops = self.ops();
        if ops.is_empty() {
            return;
        }
        ColorMatrix::from_ops(ops).apply(image);
    }
}

/// Affine color transform in 0-255 sRGB space: v' = m * v + offset.
/// Alpha is never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorMatrix {
    m: Matrix3<f32>,
    offset: Vector3<f32>,
}

impl ColorMatrix {
    pub fn identity() -> Self {
        Self {
            m: Matrix3::identity(),
            offset: Vector3::zeros(),
        }
    }

    pub fn from_op(op: FilterOp) -> Self {
        match op {
            FilterOp::Brightness(a) => Self {
                m: Matrix3::identity() * a,
                offset: Vector3::zeros(),
            },
            FilterOp::Contrast(a) => Self {
                m: Matrix3::identity() * a,
                offset: Vector3::from_element((0.5 - a / 2.0) * 255.0),
            },
            FilterOp::Saturate(s) => Self {
                m: Matrix3::new(
                    0.213 + 0.787 * s,
                    0.715 - 0.715 * s,
                    0.072 - 0.072 * s,
                    0.213 - 0.213 * s,
                    0.715 + 0.285 * s,
                    0.072 - 0.072 * s,
                    0.213 - 0.213 * s,
                    0.715 - 0.715 * s,
                    0.072 + 0.928 * s,
                ),
                offset: Vector3::zeros(),
            },
            FilterOp::Grayscale(a) => {
                // Remaining color fraction; full grayscale keeps none.
                let k = 1.0 - a;
                Self {
                    m: Matrix3::new(
                        0.2126 + 0.7874 * k,
                        0.7152 - 0.7152 * k,
                        0.0722 - 0.0722 * k,
                        0.2126 - 0.2126 * k,
                        0.7152 + 0.2848 * k,
                        0.0722 - 0.0722 * k,
                        0.2126 - 0.2126 * k,
                        0.7152 - 0.7152 * k,
                        0.0722 + 0.9278 * k,
                    ),
                    offset: Vector3::zeros(),
                }
            }
            FilterOp::Sepia(a) => {
                let k = 1.0 - a;
                Self {
                    m: Matrix3::new(
                        0.393 + 0.607 * k,
                        0.769 - 0.769 * k,
                        0.189 - 0.189 * k,
                        0.349 - 0.349 * k,
                        0.686 + 0.314 * k,
                        0.168 - 0.168 * k,
                        0.272 - 0.272 * k,
                        0.534 - 0.534 * k,
                        0.131 + 0.869 * k,
                    ),
                    offset: Vector3::zeros(),
                }
            }
            FilterOp::HueRotate(deg) => {
                let (sin, cos) = deg.to_radians().sin_cos();
                Self {
                    m: Matrix3::new(
                        0.213 + cos * 0.787 - sin * 0.213,
                        0.715 - cos * 0.715 - sin * 0.715,
                        0.072 - cos * 0.072 + sin * 0.928,
                        0.213 - cos * 0.213 + sin * 0.143,
                        0.715 + cos * 0.285 + sin * 0.140,
                        0.072 - cos * 0.072 - sin * 0.283,
                        0.213 - cos * 0.213 - sin * 0.787,
                        0.715 - cos * 0.715 + sin * 0.715,
                        0.072 + cos * 0.928 + sin * 0.072,
                    ),
                    offset: Vector3::zeros(),
                }
            }
        }
    }

    /// Composes `next` after `self`: the result applies `self` first.
    pub fn then(&self, next: &ColorMatrix) -> ColorMatrix {
        ColorMatrix {
            m: next.m * self.m,
            offset: next.m * self.offset + next.offset,
        }
    }

    /// Folds an ordered op list into one transform.
    pub fn from_ops(ops: &[FilterOp]) -> Self {
        ops.iter()
            .fold(Self::identity(), |acc, &op| acc.then(&Self::from_op(op)))
    }

    pub fn transform(&self, r: f32, g: f32, b: f32) -> (f32, f32, f32) {
        let v = self.m * Vector3::new(r, g, b) + self.offset;
        (
            v.x.clamp(0.0, 255.0),
            v.y.clamp(0.0, 255.0),
            v.z.clamp(0.0, 255.0),
        )
    }

    pub fn apply(&self, image: &mut RgbaImage) {
        for pixel in image.pixels_mut() {
            let (r, g, b) = self.transform(pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);
            pixel[0] = r.round() as u8;
            pixel[1] = g.round() as u8;
            pixel[2] = b.round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn test_image() -> RgbaImage {
        RgbaImage::from_fn(4, 4, |x, y| {
            Rgba([(x * 60) as u8, (y * 60) as u8, ((x + y) * 30) as u8, 255])
        })
    }

    #[test]
    fn test_catalog_has_eight_named_filters() {
        let all = FilterKind::all();
        assert_eq!(all.len(), 8);
        let names: Vec<_> = all.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            ["None", "Sepia", "B&W", "Warm", "Cool", "Vintage", "Bright", "Dramatic"]
        );
    }

    #[test]
    fn test_none_is_bitwise_identity() {
        let original = test_image();
        let mut filtered = original.clone();
        FilterKind::None.apply(&mut filtered);
        assert_eq!(original.as_raw(), filtered.as_raw());
    }

    #[test]
    fn test_filters_are_deterministic() {
        for &kind in FilterKind::all() {
            let mut a = test_image();
            let mut b = test_image();
            kind.apply(&mut a);
            kind.apply(&mut b);
            assert_eq!(a.as_raw(), b.as_raw(), "{} not deterministic", kind);
        }
    }

    #[test]
    fn test_black_white_equalizes_channels() {
        let mut image = test_image();
        FilterKind::BlackWhite.apply(&mut image);
        for pixel in image.pixels() {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }

    #[test]
    fn test_alpha_is_never_touched() {
        let mut image = RgbaImage::from_pixel(2, 2, Rgba([120, 40, 200, 77]));
        for &kind in FilterKind::all() {
            kind.apply(&mut image);
            for pixel in image.pixels() {
                assert_eq!(pixel[3], 77);
            }
        }
    }

    #[test]
    fn test_brightness_scales_and_clamps() {
        let m = ColorMatrix::from_op(FilterOp::Brightness(1.3));
        let (r, _, _) = m.transform(100.0, 0.0, 0.0);
        assert_eq!(r, 130.0);
        let (r, g, b) = m.transform(255.0, 255.0, 255.0);
        assert_eq!((r, g, b), (255.0, 255.0, 255.0));
    }

    #[test]
    fn test_contrast_fixes_mid_gray() {
        let m = ColorMatrix::from_op(FilterOp::Contrast(1.5));
        let (r, g, b) = m.transform(127.5, 127.5, 127.5);
        assert!((r - 127.5).abs() < 0.01);
        assert!((g - 127.5).abs() < 0.01);
        assert!((b - 127.5).abs() < 0.01);
    }

    #[test]
    fn test_full_sepia_on_white() {
        let m = ColorMatrix::from_op(FilterOp::Sepia(1.0));
        let (r, g, b) = m.transform(255.0, 255.0, 255.0);
        assert_eq!(r, 255.0);
        assert_eq!(g, 255.0);
        assert_eq!(b.round(), 239.0);
    }

    #[test]
    fn test_zero_hue_rotate_is_identity() {
        let m = ColorMatrix::from_op(FilterOp::HueRotate(0.0));
        for v in [0.0_f32, 64.0, 127.0, 200.0, 255.0] {
            let (r, g, b) = m.transform(v, v, v);
            assert_eq!(r.round(), v);
            assert_eq!(g.round(), v);
            assert_eq!(b.round(), v);
        }
    }

    #[test]
    fn test_op_order_matters_in_composition() {
        let bright_then_contrast =
            ColorMatrix::from_ops(&[FilterOp::Brightness(1.3), FilterOp::Contrast(1.5)]);
        let contrast_then_bright =
            ColorMatrix::from_ops(&[FilterOp::Contrast(1.5), FilterOp::Brightness(1.3)]);
        // Contrast pivots around mid-gray, so ordering shifts the offset.
        let a = bright_then_contrast.transform(60.0, 60.0, 60.0);
        let b = contrast_then_bright.transform(60.0, 60.0, 60.0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_compiled_matrix_matches_sequential_ops() {
        let ops = FilterKind::Vintage.ops();
        let mut sequential = test_image();
        for &op in ops {
            ColorMatrix::from_op(op).apply(&mut sequential);
        }
        let mut compiled = test_image();
        FilterKind::Vintage.apply(&mut compiled);
        // Compiled output may differ by one step of intermediate rounding.
        for (a, b) in sequential.as_raw().iter().zip(compiled.as_raw().iter()) {
            assert!((*a as i16 - *b as i16).abs() <= 2);
        }
    }
}
