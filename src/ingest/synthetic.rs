//! Synthetic scene (`stub://`).
//!
//! Static gradient background. Every other window of `period` frames a bright
//! block sweeps across the scene, which gives the motion gate something to
//! admit and long quiet stretches to skip.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use url::Url;

use super::FrameSource;
use crate::error::PipelineError;
use crate::frame::{Frame, MAX_FRAME_DIMENSION};

#[derive(Clone, Debug)]
pub struct SyntheticSettings {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// End of stream after this many frames; `None` runs forever.
    pub frame_limit: Option<u64>,
    pub period: u64,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        Self {
            name: "stub".to_string(),
            width: 320,
            height: 240,
            frame_limit: None,
            period: 25,
        }
    }
}

impl SyntheticSettings {
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut settings = Self {
            name: url.host_str().unwrap_or("stub").to_string(),
            ..Self::default()
        };
        for (key, value) in url.query_pairs() {
            let parsed = value
                .parse::<u64>()
                .map_err(|_| anyhow!("stub source: {}={:?} is not a number", key, value))?;
            match key.as_ref() {
                "frames" => settings.frame_limit = Some(parsed),
                "width" => settings.width = dimension(&key, parsed)?,
                "height" => settings.height = dimension(&key, parsed)?,
                "period" => settings.period = parsed.max(1),
                other => return Err(anyhow!("stub source: unknown parameter {:?}", other)),
            }
        }
        Ok(settings)
    }
}

fn dimension(key: &str, value: u64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0 && *v <= MAX_FRAME_DIMENSION)
        .ok_or_else(|| {
            anyhow!(
                "stub source: {}={} must be within 1..={}",
                key,
                value,
                MAX_FRAME_DIMENSION
            )
        })
}

pub struct SyntheticSource {
    settings: SyntheticSettings,
    background: RgbImage,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(settings: SyntheticSettings) -> Self {
        let (w, h) = (settings.width.max(1), settings.height.max(1));
        let background = RgbImage::from_fn(w, h, |x, y| {
            let v = ((x * 255 / w + y * 255 / h) / 2) as u8;
            Rgb([v / 2, v / 2, v / 2])
        });
        Self {
            settings,
            background,
            frame_count: 0,
        }
    }

    fn render(&self) -> RgbImage {
        let mut image = self.background.clone();
        let period = self.settings.period.max(1);
        let window = self.frame_count / period;
        if window % 2 == 1 {
            let (w, h) = image.dimensions();
            let block = (w.min(h) / 3).max(1);
            let step = self.frame_count % period;
            let travel = w.saturating_sub(block);
            let x0 = (travel as u64 * step / period) as u32;
            let y0 = (h - block.min(h)) / 2;
            for y in y0..(y0 + block).min(h) {
                for x in x0..(x0 + block).min(w) {
                    image.put_pixel(x, y, Rgb([230, 230, 230]));
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> String {
        format!("stub://{}", self.settings.name)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if let Some(limit) = self.settings.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let frame = Frame::new(self.render(), self.frame_count, chrono::Utc::now())?;
        Ok(Some(frame))
    }
}
