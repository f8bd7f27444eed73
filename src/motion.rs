//! Motion gate.
//!
//! Compares each frame against the previous one and decides whether it is
//! worth analysing. The gate owns exactly one previous-frame reference and
//! replaces it on every call, whatever the outcome.

use image::{imageops, GrayImage};

use crate::error::PipelineError;
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct MotionSettings {
    /// Per-pixel intensity delta (0..=255) a pixel must exceed to count as changed.
    pub sensitivity: u8,
    /// Changed-pixel count that must be exceeded to report motion.
    pub min_area: u64,
    /// Gaussian blur sigma applied before differencing. 0 disables it.
    pub blur_sigma: f32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            sensitivity: 25,
            min_area: 500,
            blur_sigma: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionReport {
    pub changed: bool,
    pub changed_area: u64,
}

impl MotionReport {
    fn unchanged() -> Self {
        Self {
            changed: false,
            changed_area: 0,
        }
    }
}

/// Frame-differencing motion gate. Single owner, never shared across threads.
pub struct MotionGate {
    settings: MotionSettings,
    previous: Option<GrayImage>,
}

impl MotionGate {
    pub fn new(settings: MotionSettings) -> Self {
        Self {
            settings,
            previous: None,
        }
    }

    /// Evaluate one frame against the stored previous frame.
    ///
    /// The first frame (and the first frame after a resolution change) only
    /// primes the gate and reports no change.
    pub fn evaluate(&mut self, frame: &Frame) -> Result<MotionReport, PipelineError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(PipelineError::InvalidFrame(
                "motion gate received an empty frame".to_string(),
            ));
        }

        let current = self.prepare(frame);
        let report = match self.previous.as_ref() {
            Some(prev) if prev.dimensions() == current.dimensions() => {
                let changed_area = count_changed(prev, &current, self.settings.sensitivity);
                MotionReport {
                    changed: changed_area > self.settings.min_area,
                    changed_area,
                }
            }
            Some(prev) => {
                log::debug!(
                    "motion gate: resolution changed {:?} -> {:?}, re-priming",
                    prev.dimensions(),
                    current.dimensions()
                );
                MotionReport::unchanged()
            }
            None => MotionReport::unchanged(),
        };

        self.previous = Some(current);
        Ok(report)
    }

    fn prepare(&self, frame: &Frame) -> GrayImage {
        let gray = imageops::grayscale(frame.image());
        if self.settings.blur_sigma > 0.0 {
            imageops::blur(&gray, self.settings.blur_sigma)
        } else {
            gray
        }
    }
}

fn count_changed(prev: &GrayImage, current: &GrayImage, sensitivity: u8) -> u64 {
    prev.as_raw()
        .iter()
        .zip(current.as_raw().iter())
        .filter(|(a, b)| a.abs_diff(**b) > sensitivity)
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::solid_frame;
    use chrono::Utc;
    use image::{Rgb, RgbImage};

    fn frame_with_block(value: u8, block: u8, size: u32, sequence: u64) -> Frame {
        let mut image = RgbImage::from_pixel(320, 240, Rgb([value, value, value]));
        for y in 60..60 + size {
            for x in 80..80 + size {
                image.put_pixel(x, y, Rgb([block, block, block]));
            }
        }
        Frame::new(image, sequence, Utc::now()).unwrap()
    }

    #[test]
    fn first_frame_only_primes() {
        let mut gate = MotionGate::new(MotionSettings::default());
        let report = gate.evaluate(&solid_frame(320, 240, 40, 1)).unwrap();
        assert_eq!(report, MotionReport::unchanged());
    }

    #[test]
    fn static_scene_never_reports_motion() {
        let mut gate = MotionGate::new(MotionSettings::default());
        for seq in 0..20 {
            let report = gate.evaluate(&solid_frame(320, 240, 90, seq)).unwrap();
            assert!(!report.changed);
            assert_eq!(report.changed_area, 0);
        }
    }

    #[test]
    fn large_region_change_reports_motion() {
        let mut gate = MotionGate::new(MotionSettings::default());
        gate.evaluate(&frame_with_block(20, 20, 100, 1)).unwrap();
        let report = gate.evaluate(&frame_with_block(20, 230, 100, 2)).unwrap();
        assert!(report.changed);
        assert!(report.changed_area > 500);
    }

    #[test]
    fn small_region_change_stays_below_area() {
        let mut gate = MotionGate::new(MotionSettings::default());
        gate.evaluate(&frame_with_block(20, 20, 10, 1)).unwrap();
        let report = gate.evaluate(&frame_with_block(20, 230, 10, 2)).unwrap();
        assert!(!report.changed);
    }

    #[test]
    fn subtle_change_below_sensitivity_is_ignored() {
        let mut gate = MotionGate::new(MotionSettings::default());
        gate.evaluate(&solid_frame(320, 240, 100, 1)).unwrap();
        let report = gate.evaluate(&solid_frame(320, 240, 110, 2)).unwrap();
        assert!(!report.changed);
    }

    #[test]
    fn previous_frame_replaced_every_call() {
        let mut gate = MotionGate::new(MotionSettings::default());
        gate.evaluate(&frame_with_block(20, 20, 100, 1)).unwrap();
        let report = gate.evaluate(&frame_with_block(20, 230, 100, 2)).unwrap();
        assert!(report.changed);
        // Same as the frame just seen: no change any more.
        let report = gate.evaluate(&frame_with_block(20, 230, 100, 3)).unwrap();
        assert!(!report.changed);
    }

    #[test]
    fn resolution_change_reprimes() {
        let mut gate = MotionGate::new(MotionSettings::default());
        gate.evaluate(&solid_frame(320, 240, 0, 1)).unwrap();
        let report = gate.evaluate(&solid_frame(160, 120, 255, 2)).unwrap();
        assert!(!report.changed);
        let report = gate.evaluate(&solid_frame(160, 120, 0, 3)).unwrap();
        assert!(report.changed);
    }
}
