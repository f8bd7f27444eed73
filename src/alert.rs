//! Alert records and evidence persistence.
//!
//! - `AlertStore::record` turns an admitted verdict into one alert: original
//!   JPEG, annotated JPEG, then one index record. Images are written before
//!   the record, so an indexed alert always points at files that exist.
//! - Annotation is best-effort: a frame that cannot be annotated is still
//!   recorded with the original image only.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::frame::{encode_jpeg, Frame};
use crate::inference::LocalizedRegion;
use crate::storage::{write_atomic, AlertIndex, JsonAlertIndex, SqliteAlertIndex};
use crate::verify::Verdict;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const TAB_HEIGHT: u32 = 10;
const TAB_WIDTH: u32 = 24;

/// Normalized box as stored in the index.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl From<&LocalizedRegion> for BoundingBox {
    fn from(region: &LocalizedRegion) -> Self {
        Self {
            x_min: region.x_min,
            y_min: region.y_min,
            x_max: region.x_max,
            y_max: region.y_max,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_image_path: Option<String>,
    pub persons_detected: bool,
    pub detected_objects: Vec<BoundingBox>,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Json,
    Sqlite,
}

impl std::str::FromStr for IndexBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(IndexBackend::Json),
            "sqlite" => Ok(IndexBackend::Sqlite),
            other => Err(anyhow!(
                "unknown index backend {:?} (expected json or sqlite)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub alerts_dir: PathBuf,
    pub detections_dir: PathBuf,
    pub index_backend: IndexBackend,
    pub index_path: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            alerts_dir: PathBuf::from("alerts"),
            detections_dir: PathBuf::from("detections"),
            index_backend: IndexBackend::Json,
            index_path: PathBuf::from("alerts/alerts.json"),
            jpeg_quality: 90,
        }
    }
}

/// Open the configured index backend.
pub fn open_index(backend: IndexBackend, path: &Path) -> Result<Box<dyn AlertIndex>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create index directory {}", parent.display()))?;
        }
    }
    Ok(match backend {
        IndexBackend::Json => Box::new(JsonAlertIndex::open(path)?),
        IndexBackend::Sqlite => {
            let db_path = path
                .to_str()
                .ok_or_else(|| anyhow!("index path is not valid UTF-8: {}", path.display()))?;
            Box::new(SqliteAlertIndex::open(db_path)?)
        }
    })
}

pub struct AlertStore {
    alerts_dir: PathBuf,
    detections_dir: PathBuf,
    jpeg_quality: u8,
    index: Box<dyn AlertIndex>,
}

impl AlertStore {
    pub fn open(settings: &StorageSettings) -> Result<Self> {
        let index = open_index(settings.index_backend, &settings.index_path)?;
        Self::with_index(settings, index)
    }

    /// Store over an already-open index. Creates the image directories.
    pub fn with_index(settings: &StorageSettings, index: Box<dyn AlertIndex>) -> Result<Self> {
        for dir in [&settings.alerts_dir, &settings.detections_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(Self {
            alerts_dir: settings.alerts_dir.clone(),
            detections_dir: settings.detections_dir.clone(),
            jpeg_quality: settings.jpeg_quality,
            index,
        })
    }

    /// Persist an admitted verdict. On any failure nothing is indexed and
    /// images written so far are removed.
    pub fn record(&mut self, verdict: &Verdict, frame: &Frame) -> Result<Alert, PipelineError> {
        if !verdict.is_admitted() {
            return Err(PipelineError::PersistenceFailed(
                "refusing to record a rejected verdict".to_string(),
            ));
        }

        let id = self
            .index
            .next_id()
            .map_err(|e| PipelineError::persistence("allocate alert id", e))?;
        let timestamp = Utc::now();
        let stem = format!("{}_{}", timestamp.format("%Y%m%d_%H%M%S_%6f"), id);

        let original = encode_jpeg(frame.image(), self.jpeg_quality)
            .map_err(|e| PipelineError::persistence("encode frame", e))?;
        let image_path = self.alerts_dir.join(format!("alert_{}.jpg", stem));
        write_atomic(&image_path, &original).map_err(|e| write_failed(&image_path, e))?;
        let mut written = vec![image_path.clone()];

        let detection_image_path = match self.render_detection(frame, &verdict.regions) {
            Some(annotated) => {
                let path = self.detections_dir.join(format!("detection_{}.jpg", stem));
                if let Err(err) = write_atomic(&path, &annotated) {
                    remove_all(&written);
                    return Err(write_failed(&path, err));
                }
                written.push(path.clone());
                Some(path)
            }
            None => None,
        };

        let alert = Alert {
            id,
            timestamp,
            description: verdict.description.clone(),
            image_path: image_path.display().to_string(),
            detection_image_path: detection_image_path.map(|p| p.display().to_string()),
            persons_detected: !verdict.regions.is_empty(),
            detected_objects: verdict.regions.iter().map(BoundingBox::from).collect(),
            matched_keywords: verdict.matched_keywords.iter().cloned().collect(),
        };

        if let Err(err) = self.index.append(&alert) {
            remove_all(&written);
            return Err(PipelineError::persistence("append alert index", err));
        }
        Ok(alert)
    }

    pub fn recent(&mut self, limit: usize) -> Result<Vec<Alert>> {
        self.index.recent(limit)
    }

    pub fn len(&mut self) -> Result<usize> {
        self.index.len()
    }

    fn render_detection(&self, frame: &Frame, regions: &[LocalizedRegion]) -> Option<Vec<u8>> {
        let rendered = annotate(frame.image(), regions).and_then(|annotated| {
            encode_jpeg(&annotated, self.jpeg_quality)
                .map_err(|e| anyhow!("encode annotated frame: {}", e))
        });
        match rendered {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                log::warn!("frame #{}: annotation skipped: {}", frame.sequence, err);
                None
            }
        }
    }
}

/// Copy of `image` with each region outlined and tagged with a filled tab at
/// its top-left corner.
pub fn annotate(image: &RgbImage, regions: &[LocalizedRegion]) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if width < BOX_THICKNESS * 2 || height < BOX_THICKNESS * 2 {
        return Err(anyhow!("frame {}x{} too small to annotate", width, height));
    }
    let mut out = image.clone();
    for region in regions {
        let region = region
            .clone()
            .normalized()
            .ok_or_else(|| anyhow!("non-finite region coordinates"))?;
        let (x1, y1, x2, y2) = region.to_pixels(width, height);
        draw_outline(&mut out, x1, y1, x2, y2);

        let tab_bottom = y1;
        let tab_top = tab_bottom.saturating_sub(TAB_HEIGHT);
        let tab_right = (x1 + TAB_WIDTH).min(width - 1);
        fill_rect(&mut out, x1, tab_top, tab_right, tab_bottom);
    }
    Ok(out)
}

fn draw_outline(img: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32) {
    for t in 0..BOX_THICKNESS {
        let top = (y1 + t).min(y2);
        let bottom = y2.saturating_sub(t).max(y1);
        let left = (x1 + t).min(x2);
        let right = x2.saturating_sub(t).max(x1);
        for x in x1..=x2 {
            img.put_pixel(x, top, BOX_COLOR);
            img.put_pixel(x, bottom, BOX_COLOR);
        }
        for y in y1..=y2 {
            img.put_pixel(left, y, BOX_COLOR);
            img.put_pixel(right, y, BOX_COLOR);
        }
    }
}

fn fill_rect(img: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32) {
    for y in y1..=y2 {
        for x in x1..=x2 {
            img.put_pixel(x, y, BOX_COLOR);
        }
    }
}

fn write_failed(path: &Path, err: anyhow::Error) -> PipelineError {
    PipelineError::persistence(&format!("write {}", path.display()), err)
}

fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            log::warn!("cleanup of {} failed: {}", path.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::solid_frame;
    use crate::storage::InMemoryAlertIndex;
    use crate::verify::{Outcome, RejectReason};
    use std::collections::BTreeSet;

    fn admitted(regions: Vec<LocalizedRegion>) -> Verdict {
        Verdict {
            outcome: Outcome::Admitted,
            matched_keywords: ["intruder".to_string()].into_iter().collect(),
            regions,
            description: "an intruder by the fence".to_string(),
        }
    }

    fn settings(root: &Path) -> StorageSettings {
        StorageSettings {
            alerts_dir: root.join("alerts"),
            detections_dir: root.join("detections"),
            index_backend: IndexBackend::Json,
            index_path: root.join("alerts").join("alerts.json"),
            jpeg_quality: 80,
        }
    }

    struct FailingIndex;

    impl AlertIndex for FailingIndex {
        fn next_id(&mut self) -> Result<u64> {
            Ok(1)
        }
        fn append(&mut self, _alert: &Alert) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        fn recent(&mut self, _limit: usize) -> Result<Vec<Alert>> {
            Ok(Vec::new())
        }
        fn len(&mut self) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn records_alert_with_both_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AlertStore::open(&settings(dir.path())).unwrap();
        let region = LocalizedRegion::new("person", 0.1, 0.2, 0.4, 0.6);
        let alert = store
            .record(&admitted(vec![region]), &solid_frame(100, 50, 30, 1))
            .unwrap();

        assert_eq!(alert.id, 1);
        assert!(alert.persons_detected);
        assert_eq!(
            alert.detected_objects,
            vec![BoundingBox {
                x_min: 0.1,
                y_min: 0.2,
                x_max: 0.4,
                y_max: 0.6,
            }]
        );
        assert!(Path::new(&alert.image_path).exists());
        let detection = alert.detection_image_path.clone().unwrap();
        assert!(Path::new(&detection).exists());
        assert!(alert.image_path.contains("alert_"));
        assert!(detection.contains("detection_"));

        let reopened = JsonAlertIndex::open(&dir.path().join("alerts").join("alerts.json"))
            .unwrap()
            .recent(10)
            .unwrap();
        assert_eq!(reopened, vec![alert]);
    }

    #[test]
    fn ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AlertStore::open(&settings(dir.path())).unwrap();
        let region = LocalizedRegion::new("person", 0.0, 0.0, 0.5, 0.5);
        let a = store
            .record(&admitted(vec![region.clone()]), &solid_frame(20, 20, 0, 1))
            .unwrap();
        let b = store
            .record(&admitted(vec![region]), &solid_frame(20, 20, 0, 2))
            .unwrap();
        assert!(b.id > a.id);
        assert_ne!(a.image_path, b.image_path);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn sqlite_backend_records_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StorageSettings {
            index_backend: IndexBackend::Sqlite,
            index_path: dir.path().join("db").join("alerts.db"),
            ..settings(dir.path())
        };
        let region = LocalizedRegion::new("person", 0.2, 0.2, 0.3, 0.3);
        let recorded = {
            let mut store = AlertStore::open(&settings).unwrap();
            store
                .record(&admitted(vec![region]), &solid_frame(30, 30, 0, 1))
                .unwrap()
        };
        let mut index = open_index(IndexBackend::Sqlite, &settings.index_path).unwrap();
        assert_eq!(index.recent(5).unwrap(), vec![recorded]);
        assert_eq!(
            "SQLite".parse::<IndexBackend>().unwrap(),
            IndexBackend::Sqlite
        );
        assert!("csv".parse::<IndexBackend>().is_err());
    }

    #[test]
    fn rejected_verdict_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AlertStore::open(&settings(dir.path())).unwrap();
        let verdict = Verdict {
            outcome: Outcome::Rejected(RejectReason::NoKeywordMatch),
            matched_keywords: BTreeSet::new(),
            regions: Vec::new(),
            description: "quiet".to_string(),
        };
        let err = store
            .record(&verdict, &solid_frame(20, 20, 0, 1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::PersistenceFailed(_)));
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn index_failure_removes_written_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            AlertStore::with_index(&settings(dir.path()), Box::new(FailingIndex)).unwrap();
        let region = LocalizedRegion::new("person", 0.1, 0.1, 0.9, 0.9);
        let err = store
            .record(&admitted(vec![region]), &solid_frame(40, 40, 0, 1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::PersistenceFailed(_)));
        assert_eq!(fs::read_dir(dir.path().join("alerts")).unwrap().count(), 0);
        assert_eq!(
            fs::read_dir(dir.path().join("detections")).unwrap().count(),
            0
        );
    }

    #[test]
    fn image_write_failure_indexes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let mut store =
            AlertStore::with_index(&settings, Box::new(InMemoryAlertIndex::default())).unwrap();
        fs::remove_dir_all(&settings.alerts_dir).unwrap();
        let region = LocalizedRegion::new("person", 0.1, 0.1, 0.9, 0.9);
        assert!(store
            .record(&admitted(vec![region]), &solid_frame(40, 40, 0, 1))
            .is_err());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn tiny_frame_is_recorded_without_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AlertStore::open(&settings(dir.path())).unwrap();
        let region = LocalizedRegion::new("person", 0.0, 0.0, 1.0, 1.0);
        let alert = store
            .record(&admitted(vec![region]), &solid_frame(2, 2, 0, 1))
            .unwrap();
        assert!(alert.detection_image_path.is_none());
        assert!(Path::new(&alert.image_path).exists());
    }

    #[test]
    fn annotation_outlines_region() {
        let frame = solid_frame(100, 100, 0, 1);
        let region = LocalizedRegion::new("person", 0.2, 0.3, 0.6, 0.8);
        let out = annotate(frame.image(), &[region]).unwrap();
        assert_eq!(*out.get_pixel(20, 50), BOX_COLOR);
        assert_eq!(*out.get_pixel(21, 50), BOX_COLOR);
        assert_eq!(*out.get_pixel(40, 80), BOX_COLOR);
        assert_eq!(*out.get_pixel(40, 55), Rgb([0, 0, 0]));
        assert_eq!(*frame.image().get_pixel(20, 50), Rgb([0, 0, 0]));
    }
}
