use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use image::RgbaImage;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("mask has {len} bytes but {width}x{height} needs {expected}")]
    LengthMismatch {
        len: usize,
        width: u32,
        height: u32,
        expected: usize,
    },
}

/// Person/background mask for one frame. One byte per pixel, row-major;
/// 1 marks a person pixel. Input bytes are normalized so any nonzero
/// value counts as person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl SegmentationMask {
    pub fn new(width: u32, height: u32, mut data: Vec<u8>) -> Result<Self, MaskError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(MaskError::LengthMismatch {
                len: data.len(),
                width,
                height,
                expected,
            });
        }
        for byte in &mut data {
            *byte = (*byte != 0) as u8;
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_person(&self, x: u32, y: u32) -> bool {
        self.data[(y * self.width + x) as usize] == 1
    }
}

/// External capability that turns a frame into a person mask.
#[async_trait]
pub trait SegmentationEngine: Send + Sync {
    async fn segment(&self, frame: &RgbaImage) -> Result<SegmentationMask>;
}

/// Engine backed by an external helper process. The helper reads a PNG
/// frame and writes a grayscale PNG mask (nonzero = person).
pub struct ExternalProcessEngine {
    command: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl ExternalProcessEngine {
    /// Probes for the helper once at startup. Returns `None` when the
    /// command is not runnable; the app then operates without
    /// segmentation.
    pub fn probe(command: &str, timeout: Duration) -> Option<Self> {
        match Command::new(command).arg("--help").output() {
            Ok(_) => {
                info!("Segmentation helper available: {}", command);
                let work_dir = std::env::temp_dir().join("photobooth_segmentation");
                if let Err(e) = std::fs::create_dir_all(&work_dir) {
                    warn!("Could not create segmentation work dir: {}", e);
                    return None;
                }
                Some(Self {
                    command: command.to_string(),
                    work_dir,
                    timeout,
                })
            }
            Err(e) => {
                warn!(
                    "Segmentation helper '{}' not available ({}), backgrounds limited to raw feed",
                    command, e
                );
                None
            }
        }
    }
}

#[async_trait]
impl SegmentationEngine for ExternalProcessEngine {
    async fn segment(&self, frame: &RgbaImage) -> Result<SegmentationMask> {
        // At most one request is in flight, so fixed file names are safe.
        let input_path = self.work_dir.join("frame.png");
        let output_path = self.work_dir.join("mask.png");

        frame
            .save(&input_path)
            .context("Failed to write frame for segmentation")?;

        let run = tokio::process::Command::new(&self.command)
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .context("Segmentation helper timed out")?
            .context("Failed to run segmentation helper")?;

        if !output.status.success() {
            bail!(
                "Segmentation helper failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let mask_image = image::open(&output_path)
            .context("Failed to read segmentation output")?
            .to_luma8();
        let (width, height) = mask_image.dimensions();

        let _ = std::fs::remove_file(&input_path);
        let _ = std::fs::remove_file(&output_path);

        Ok(SegmentationMask::new(
            width,
            height,
            mask_image.into_raw(),
        )?)
    }
}

/// Render-loop adapter around an optional engine. Owns the busy flag and
/// the latest mask; results come back over a channel and are drained by
/// `poll` on the UI thread, so the render loop never blocks.
pub struct Segmenter {
    engine: Option<Arc<dyn SegmentationEngine>>,
    busy: bool,
    mask: Option<SegmentationMask>,
    result_tx: mpsc::UnboundedSender<Option<SegmentationMask>>,
    result_rx: mpsc::UnboundedReceiver<Option<SegmentationMask>>,
}

impl Segmenter {
    pub fn new(engine: Option<Arc<dyn SegmentationEngine>>) -> Self {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            busy: false,
            mask: None,
            result_tx,
            result_rx,
        }
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Kicks off segmentation of `frame` unless one is already running.
    /// Without an engine this is a no-op.
    pub fn request(&mut self, frame: &RgbaImage) {
        let Some(engine) = &self.engine else {
            return;
        };
        if self.busy {
            return;
        }
        self.busy = true;

        let engine = Arc::clone(engine);
        let tx = self.result_tx.clone();
        let frame = frame.clone();
        tokio::spawn(async move {
            let result = match engine.segment(&frame).await {
                Ok(mask) => Some(mask),
                Err(e) => {
                    debug!("Segmentation request failed: {:#}", e);
                    None
                }
            };
            let _ = tx.send(result);
        });
    }

    /// Drains finished requests. A failed request clears the busy flag
    /// and keeps whatever mask was already stored.
    pub fn poll(&mut self) {
        while let Ok(result) = self.result_rx.try_recv() {
            self.busy = false;
            if let Some(mask) = result {
                self.mask = Some(mask);
            }
        }
    }

    /// Latest mask, only if it matches the given frame dimensions.
    /// A stale mask from before a resolution change is never served.
    pub fn mask_for(&self, width: u32, height: u32) -> Option<&SegmentationMask> {
        self.mask
            .as_ref()
            .filter(|m| m.width == width && m.height == height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingEngine {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SegmentationEngine for CountingEngine {
        async fn segment(&self, frame: &RgbaImage) -> Result<SegmentationMask> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let (w, h) = frame.dimensions();
            Ok(SegmentationMask::new(w, h, vec![1; (w * h) as usize])?)
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl SegmentationEngine for FailingEngine {
        async fn segment(&self, _frame: &RgbaImage) -> Result<SegmentationMask> {
            bail!("model exploded")
        }
    }

    #[test]
    fn test_mask_rejects_wrong_length() {
        let err = SegmentationMask::new(4, 4, vec![0; 15]).unwrap_err();
        assert!(matches!(err, MaskError::LengthMismatch { expected: 16, .. }));
    }

    #[test]
    fn test_mask_normalizes_nonzero_bytes() {
        let mask = SegmentationMask::new(2, 2, vec![0, 1, 128, 255]).unwrap();
        assert!(!mask.is_person(0, 0));
        assert!(mask.is_person(1, 0));
        assert!(mask.is_person(0, 1));
        assert!(mask.is_person(1, 1));
    }

    #[test]
    fn test_request_without_engine_is_noop() {
        let mut segmenter = Segmenter::new(None);
        assert!(!segmenter.has_engine());
        segmenter.request(&RgbaImage::new(4, 4));
        assert!(!segmenter.is_busy());
        assert!(segmenter.mask_for(4, 4).is_none());
    }

    #[tokio::test]
    async fn test_at_most_one_request_in_flight() {
        let engine = Arc::new(CountingEngine::new(Duration::from_millis(30)));
        let mut segmenter =
            Segmenter::new(Some(Arc::clone(&engine) as Arc<dyn SegmentationEngine>));
        let frame = RgbaImage::new(4, 4);

        segmenter.request(&frame);
        segmenter.request(&frame);
        segmenter.request(&frame);
        assert!(segmenter.is_busy());

        tokio::time::sleep(Duration::from_millis(120)).await;
        segmenter.poll();

        assert!(!segmenter.is_busy());
        assert_eq!(engine.calls(), 1);
        assert!(segmenter.mask_for(4, 4).is_some());
    }

    #[tokio::test]
    async fn test_failed_request_clears_busy_and_keeps_old_mask() {
        let mut segmenter = Segmenter::new(Some(Arc::new(FailingEngine)));
        segmenter.mask = Some(SegmentationMask::new(4, 4, vec![1; 16]).unwrap());

        segmenter.request(&RgbaImage::new(4, 4));
        assert!(segmenter.is_busy());

        tokio::time::sleep(Duration::from_millis(50)).await;
        segmenter.poll();

        assert!(!segmenter.is_busy());
        assert!(segmenter.mask_for(4, 4).is_some());
    }

    #[test]
    fn test_stale_dimensions_are_not_served() {
        let mut segmenter = Segmenter::new(None);
        segmenter.mask = Some(SegmentationMask::new(4, 4, vec![1; 16]).unwrap());
        assert!(segmenter.mask_for(4, 4).is_some());
        assert!(segmenter.mask_for(8, 8).is_none());
    }
}
