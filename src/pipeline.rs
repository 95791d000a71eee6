use crate::camera::VideoSource;
use crate::compositor::{BackgroundSource, Compositor};
use crate::filters::FilterKind;
use crate::segmentation::Segmenter;
use image::RgbaImage;
use log::{info, warn};

/// Hot-swappable render settings, observed on the next tick.
#[derive(Debug, Clone)]
pub struct RenderParams {
    pub background: BackgroundSource,
    pub filter: FilterKind,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            background: BackgroundSource::None,
            filter: FilterKind::None,
        }
    }
}

/// The live viewfinder loop: camera to segmenter to compositor to
/// filter, one pass per display repaint. Owns the video source until
/// stopped, so stopping the pipeline is what releases the camera.
pub struct RenderPipeline {
    video: Option<Box<dyn VideoSource>>,
    segmenter: Segmenter,
    compositor: Compositor,
    params: RenderParams,
    presented: Option<RgbaImage>,
}

impl RenderPipeline {
    pub fn start(video: Box<dyn VideoSource>, segmenter: Segmenter, params: RenderParams) -> Self {
        info!("Render pipeline started");
        Self {
            video: Some(video),
            segmenter,
            compositor: Compositor::new(),
            params,
            presented: None,
        }
    }

    pub fn update_params(&mut self, params: RenderParams) {
        self.params = params;
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    /// Swaps the video source in place, e.g. after a camera retry
    /// succeeds. The old source drops here and releases its device.
    pub fn set_video(&mut self, video: Box<dyn VideoSource>) {
        info!("Render pipeline switched video source");
        self.video = Some(video);
        self.presented = None;
    }

    /// Whether background replacement is actually possible on this
    /// machine (the segmentation helper probed successfully).
    pub fn segmentation_ready(&self) -> bool {
        self.segmenter.has_engine()
    }

    /// Runs one pass of the loop. Returns the newly presented buffer,
    /// or `None` when there is nothing new to show (no fresh camera
    /// frame, or the first mask is still in flight and the previous
    /// output should stay on screen). Never blocks.
    pub fn tick(&mut self) -> Option<&RgbaImage> {
        self.segmenter.poll();
        let frame = self.video.as_mut()?.poll_frame()?;
        let (width, height) = frame.dimensions();

        let needs_mask = self.params.background.needs_mask() && self.segmenter.has_engine();
        let mut buffer = if needs_mask {
            // Keep a request in flight so the mask tracks the scene;
            // request() is a no-op while one is outstanding.
            self.segmenter.request(&frame);
            match self.segmenter.mask_for(width, height) {
                Some(mask) => {
                    match self
                        .compositor
                        .composite(&frame, mask, &self.params.background)
                    {
                        Ok(composited) => composited,
                        Err(e) => {
                            warn!("Compositing failed, presenting raw frame: {}", e);
                            frame
                        }
                    }
                }
                None if self.segmenter.is_busy() && self.presented.is_some() => {
                    return None;
                }
                None => frame,
            }
        } else {
            // No mask wanted, or segmentation silently unavailable.
            frame
        };

        // Filter is the last pixel operation so it affects the whole
        // composited scene, not just the subject.
        self.params.filter.apply(&mut buffer);
        self.presented = Some(buffer);
        self.presented.as_ref()
    }

    /// What the viewfinder currently shows, as the captured still.
    pub fn capture(&self) -> Option<RgbaImage> {
        self.presented.clone()
    }

    /// Releases the video source; dropping it kills the preview process
    /// and frees the camera. Every later tick is a no-op.
    pub fn stop(&mut self) {
        if self.video.take().is_some() {
            info!("Render pipeline stopped");
        }
        self.presented = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{box_blur, FALLBACK_COLOR};
    use crate::segmentation::{SegmentationEngine, SegmentationMask};
    use anyhow::Result;
    use async_trait::async_trait;
    use image::Rgba;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct ScriptedSource {
        frames: VecDeque<RgbaImage>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<RgbaImage>) -> Self {
            Self {
                frames: frames.into(),
            }
        }
    }

    impl VideoSource for ScriptedSource {
        fn poll_frame(&mut self) -> Option<RgbaImage> {
            self.frames.pop_front()
        }
    }

    struct TestEngine {
        delay: Duration,
        person_left_half: bool,
    }

    #[async_trait]
    impl SegmentationEngine for TestEngine {
        async fn segment(&self, frame: &RgbaImage) -> Result<SegmentationMask> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let (w, h) = frame.dimensions();
            let mut data = vec![0u8; (w * h) as usize];
            if self.person_left_half {
                for y in 0..h {
                    for x in 0..w / 2 {
                        data[(y * w + x) as usize] = 1;
                    }
                }
            }
            Ok(SegmentationMask::new(w, h, data)?)
        }
    }

    fn checkerboard(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    fn gray(size: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(size, size, Rgba([value, value, value, 255]))
    }

    fn pipeline_without_engine(
        frames: Vec<RgbaImage>,
        params: RenderParams,
    ) -> RenderPipeline {
        RenderPipeline::start(
            Box::new(ScriptedSource::new(frames)),
            Segmenter::new(None),
            params,
        )
    }

    #[test]
    fn test_no_frame_means_noop_tick() {
        let mut pipeline = pipeline_without_engine(vec![], RenderParams::default());
        assert!(pipeline.tick().is_none());
        assert!(pipeline.capture().is_none());
    }

    struct DropProbe {
        frames: VecDeque<RgbaImage>,
        released: Arc<AtomicBool>,
    }

    impl VideoSource for DropProbe {
        fn poll_frame(&mut self) -> Option<RgbaImage> {
            self.frames.pop_front()
        }
    }

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stop_releases_the_video_source() {
        let released = Arc::new(AtomicBool::new(false));
        let mut pipeline = RenderPipeline::start(
            Box::new(DropProbe {
                frames: vec![gray(8, 100), gray(8, 100)].into(),
                released: Arc::clone(&released),
            }),
            Segmenter::new(None),
            RenderParams::default(),
        );
        assert!(pipeline.tick().is_some());

        pipeline.stop();
        assert!(released.load(Ordering::SeqCst));

        // A frame was still queued, but the source is gone.
        assert!(pipeline.tick().is_none());
        assert!(pipeline.capture().is_none());
    }

    #[test]
    fn test_raw_passthrough_is_bitwise_exact() {
        let frame = checkerboard(8);
        let mut pipeline =
            pipeline_without_engine(vec![frame.clone()], RenderParams::default());
        let shown = pipeline.tick().unwrap();
        assert_eq!(shown.as_raw(), frame.as_raw());
        assert_eq!(pipeline.capture().unwrap().as_raw(), frame.as_raw());
    }

    #[test]
    fn test_blur_background_without_engine_degrades_to_raw() {
        let frame = checkerboard(8);
        let params = RenderParams {
            background: BackgroundSource::Blur { radius: 2 },
            filter: FilterKind::None,
        };
        let mut pipeline = pipeline_without_engine(vec![frame.clone()], params);
        let shown = pipeline.tick().unwrap();
        assert_eq!(shown.as_raw(), frame.as_raw());
    }

    #[test]
    fn test_black_white_output_has_equal_channels() {
        let frame = checkerboard(8);
        let params = RenderParams {
            background: BackgroundSource::None,
            filter: FilterKind::BlackWhite,
        };
        let mut pipeline = pipeline_without_engine(vec![frame], params);
        let shown = pipeline.tick().unwrap();
        for pixel in shown.pixels() {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }

    #[test]
    fn test_param_update_observed_on_next_tick() {
        let mut pipeline = pipeline_without_engine(
            vec![gray(8, 100), gray(8, 100)],
            RenderParams::default(),
        );
        assert_eq!(pipeline.tick().unwrap().get_pixel(0, 0)[0], 100);

        pipeline.update_params(RenderParams {
            background: BackgroundSource::None,
            filter: FilterKind::Bright,
        });
        // brightness 1.3 then contrast 1.1 on 100 lands on 130.
        assert_eq!(pipeline.tick().unwrap().get_pixel(0, 0)[0], 130);
    }

    #[test]
    fn test_filter_runs_after_compositing_not_before() {
        let frame = checkerboard(8);
        let mut mask_data = vec![0u8; 64];
        for y in 0..8 {
            for x in 0..4 {
                mask_data[y * 8 + x] = 1;
            }
        }
        let mask = SegmentationMask::new(8, 8, mask_data).unwrap();
        let background = BackgroundSource::Blur { radius: 2 };
        let mut compositor = Compositor::new();

        let mut composite_then_filter = compositor.composite(&frame, &mask, &background).unwrap();
        FilterKind::Bright.apply(&mut composite_then_filter);

        let mut filtered_frame = frame.clone();
        FilterKind::Bright.apply(&mut filtered_frame);
        let filter_then_composite = compositor
            .composite(&filtered_frame, &mask, &background)
            .unwrap();

        // Brightening pure black and white is a fixed point, so the wrong
        // order leaves the blurred background dim while the right order
        // brightens it.
        assert_ne!(
            composite_then_filter.as_raw(),
            filter_then_composite.as_raw()
        );
        let bright_bg = composite_then_filter.get_pixel(6, 4)[0];
        let dim_bg = filter_then_composite.get_pixel(6, 4)[0];
        assert!(bright_bg > dim_bg);
    }

    #[tokio::test]
    async fn test_first_mask_in_flight_keeps_previous_output() {
        let frame = gray(8, 80);
        let engine = Arc::new(TestEngine {
            delay: Duration::from_millis(50),
            person_left_half: true,
        });
        let mut pipeline = RenderPipeline::start(
            Box::new(ScriptedSource::new(vec![
                frame.clone(),
                frame.clone(),
                frame.clone(),
            ])),
            Segmenter::new(Some(engine)),
            RenderParams {
                background: BackgroundSource::Image(None),
                filter: FilterKind::None,
            },
        );

        // First tick has no mask yet: raw frame goes up, request departs.
        let first = pipeline.tick().unwrap().clone();
        assert_eq!(first.as_raw(), frame.as_raw());

        // Second tick: still in flight, previous output stays.
        assert!(pipeline.tick().is_none());
        assert_eq!(pipeline.capture().unwrap().as_raw(), frame.as_raw());

        // Once the mask lands, compositing kicks in.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let composited = pipeline.tick().unwrap();
        assert_eq!(*composited.get_pixel(1, 4), Rgba([80, 80, 80, 255]));
        assert_eq!(*composited.get_pixel(6, 4), FALLBACK_COLOR);
    }

    #[tokio::test]
    async fn test_all_background_mask_blurs_whole_frame() {
        let frame = checkerboard(8);
        let engine = Arc::new(TestEngine {
            delay: Duration::ZERO,
            person_left_half: false,
        });
        let mut pipeline = RenderPipeline::start(
            Box::new(ScriptedSource::new(vec![frame.clone(), frame.clone()])),
            Segmenter::new(Some(engine)),
            RenderParams {
                background: BackgroundSource::Blur { radius: 2 },
                filter: FilterKind::None,
            },
        );

        let _ = pipeline.tick();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let shown = pipeline.tick().unwrap();
        assert_eq!(shown.as_raw(), box_blur(&frame, 2).as_raw());
    }
}
