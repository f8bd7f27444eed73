use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{IndexBackend, StorageSettings};
use crate::inference::{InferenceSettings, MoondreamSettings, MAX_TIMEOUT_RETRIES};
use crate::motion::MotionSettings;
use crate::pipeline::PipelineSettings;
use crate::verify::VerificationSettings;

const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_ANALYSIS_INTERVAL_SECS: f64 = 2.0;
const DEFAULT_QUEUE_CAPACITY: usize = 10;
const DEFAULT_MAX_SOURCE_FAILURES: u32 = 50;
const DEFAULT_SOURCE_RETRY_MS: u64 = 100;
const DEFAULT_INFERENCE_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VigilConfigFile {
    source: Option<SourceConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    motion: Option<MotionConfigFile>,
    verification: Option<VerificationConfigFile>,
    inference: Option<InferenceConfigFile>,
    storage: Option<StorageConfigFile>,
    notify: Option<NotifyConfigFile>,
    headless: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    max_consecutive_failures: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnalysisConfigFile {
    interval_secs: Option<f64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MotionConfigFile {
    sensitivity: Option<u8>,
    min_area: Option<u64>,
    blur_sigma: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VerificationConfigFile {
    keywords: Option<Vec<String>>,
    localize_label: Option<String>,
    min_region_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InferenceConfigFile {
    endpoint: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<f64>,
    timeout_retries: Option<u32>,
    prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StorageConfigFile {
    alerts_dir: Option<PathBuf>,
    detections_dir: Option<PathBuf>,
    index_backend: Option<IndexBackend>,
    index_path: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NotifyConfigFile {
    webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VigilConfig {
    pub source_url: String,
    pub pipeline: PipelineSettings,
    pub motion: MotionSettings,
    pub verification: VerificationSettings,
    pub inference: InferenceConfig,
    pub storage: StorageSettings,
    pub webhook_url: Option<String>,
    pub headless: bool,
    index_path_explicit: bool,
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub timeout_retries: u32,
    pub prompt: String,
}

impl InferenceConfig {
    pub fn adapter_settings(&self) -> InferenceSettings {
        InferenceSettings {
            timeout: self.timeout,
            timeout_retries: self.timeout_retries,
            prompt: self.prompt.clone(),
        }
    }

    pub fn moondream_settings(&self) -> Result<MoondreamSettings> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            anyhow!("no inference API key; set VIGIL_INFERENCE_API_KEY or MOONDREAM_API_KEY")
        })?;
        Ok(MoondreamSettings {
            endpoint: self.endpoint.clone(),
            api_key,
            // The adapter bounds each call; the transport gets a little more
            // so the adapter's timeout is the one that fires.
            timeout: self.timeout + Duration::from_secs(5),
            ..MoondreamSettings::default()
        })
    }
}

/// Flag overrides applied on top of file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub source_url: Option<String>,
    pub interval_secs: Option<f64>,
    pub headless: bool,
    pub index_backend: Option<IndexBackend>,
}

impl VigilConfig {
    /// File named by `VIGIL_CONFIG` (if any), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = env_nonempty("VIGIL_CONFIG").map(PathBuf::from);
        Self::load_with(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file taking the place of
    /// `VIGIL_CONFIG`.
    pub fn load_with(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.resolve_index_path();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults only; no file, no environment.
    pub fn defaults() -> Result<Self> {
        let mut cfg = Self::from_file(VigilConfigFile::default())?;
        cfg.resolve_index_path();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) -> Result<()> {
        if let Some(url) = &overrides.source_url {
            self.source_url = url.clone();
        }
        if let Some(secs) = overrides.interval_secs {
            self.pipeline.analysis_interval = secs_to_duration("--interval", secs)?;
        }
        if overrides.headless {
            self.headless = true;
        }
        if let Some(backend) = overrides.index_backend {
            self.storage.index_backend = backend;
        }
        self.resolve_index_path();
        self.validate()
    }

    fn from_file(file: VigilConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let analysis = file.analysis.unwrap_or_default();
        let motion_file = file.motion.unwrap_or_default();
        let verification_file = file.verification.unwrap_or_default();
        let inference_file = file.inference.unwrap_or_default();
        let storage_file = file.storage.unwrap_or_default();

        let pipeline = PipelineSettings {
            analysis_interval: secs_to_duration(
                "analysis.interval_secs",
                analysis
                    .interval_secs
                    .unwrap_or(DEFAULT_ANALYSIS_INTERVAL_SECS),
            )?,
            queue_capacity: analysis.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            max_source_failures: source
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_SOURCE_FAILURES),
            source_retry_backoff: Duration::from_millis(
                source.retry_backoff_ms.unwrap_or(DEFAULT_SOURCE_RETRY_MS),
            ),
            ..PipelineSettings::default()
        };

        let motion_defaults = MotionSettings::default();
        let motion = MotionSettings {
            sensitivity: motion_file
                .sensitivity
                .unwrap_or(motion_defaults.sensitivity),
            min_area: motion_file.min_area.unwrap_or(motion_defaults.min_area),
            blur_sigma: motion_file.blur_sigma.unwrap_or(motion_defaults.blur_sigma),
        };

        let verification_defaults = VerificationSettings::default();
        let verification = VerificationSettings {
            keywords: verification_file
                .keywords
                .unwrap_or(verification_defaults.keywords),
            localize_label: verification_file
                .localize_label
                .unwrap_or(verification_defaults.localize_label),
            min_region_confidence: verification_file.min_region_confidence,
        };

        let adapter_defaults = InferenceSettings::default();
        let inference = InferenceConfig {
            endpoint: inference_file
                .endpoint
                .unwrap_or_else(|| MoondreamSettings::default().endpoint),
            api_key: inference_file.api_key.filter(|key| !key.trim().is_empty()),
            timeout: secs_to_duration(
                "inference.timeout_secs",
                inference_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_INFERENCE_TIMEOUT_SECS),
            )?,
            timeout_retries: inference_file
                .timeout_retries
                .unwrap_or(adapter_defaults.timeout_retries),
            prompt: inference_file.prompt.unwrap_or(adapter_defaults.prompt),
        };

        let storage_defaults = StorageSettings::default();
        let index_path_explicit = storage_file.index_path.is_some();
        let storage = StorageSettings {
            alerts_dir: storage_file
                .alerts_dir
                .unwrap_or(storage_defaults.alerts_dir),
            detections_dir: storage_file
                .detections_dir
                .unwrap_or(storage_defaults.detections_dir),
            index_backend: storage_file
                .index_backend
                .unwrap_or(storage_defaults.index_backend),
            index_path: storage_file
                .index_path
                .unwrap_or(storage_defaults.index_path),
            jpeg_quality: storage_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        Ok(Self {
            source_url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            pipeline,
            motion,
            verification,
            inference,
            storage,
            webhook_url: file.notify.and_then(|notify| notify.webhook_url),
            headless: file.headless.unwrap_or(false),
            index_path_explicit,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("VIGIL_SOURCE_URL") {
            self.source_url = url;
        }
        if let Some(interval) = env_nonempty("VIGIL_INTERVAL_SECS") {
            let secs: f64 = interval
                .parse()
                .map_err(|_| anyhow!("VIGIL_INTERVAL_SECS must be a number of seconds"))?;
            self.pipeline.analysis_interval = secs_to_duration("VIGIL_INTERVAL_SECS", secs)?;
        }
        if let Some(capacity) = env_nonempty("VIGIL_QUEUE_CAPACITY") {
            self.pipeline.queue_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("VIGIL_QUEUE_CAPACITY must be an integer"))?;
        }
        if let Some(sensitivity) = env_nonempty("VIGIL_MOTION_SENSITIVITY") {
            self.motion.sensitivity = sensitivity
                .parse()
                .map_err(|_| anyhow!("VIGIL_MOTION_SENSITIVITY must be an integer in 0..=255"))?;
        }
        if let Some(area) = env_nonempty("VIGIL_MOTION_MIN_AREA") {
            self.motion.min_area = area
                .parse()
                .map_err(|_| anyhow!("VIGIL_MOTION_MIN_AREA must be an integer pixel count"))?;
        }
        if let Some(keywords) = env_nonempty("VIGIL_KEYWORDS") {
            self.verification.keywords = split_csv(&keywords);
        }
        if let Some(confidence) = env_nonempty("VIGIL_MIN_CONFIDENCE") {
            let value: f32 = confidence
                .parse()
                .map_err(|_| anyhow!("VIGIL_MIN_CONFIDENCE must be a number in [0, 1]"))?;
            self.verification.min_region_confidence = Some(value);
        }
        if let Some(endpoint) = env_nonempty("VIGIL_INFERENCE_ENDPOINT") {
            self.inference.endpoint = endpoint;
        }
        if let Some(key) =
            env_nonempty("VIGIL_INFERENCE_API_KEY").or_else(|| env_nonempty("MOONDREAM_API_KEY"))
        {
            self.inference.api_key = Some(key);
        }
        if let Some(timeout) = env_nonempty("VIGIL_INFERENCE_TIMEOUT_SECS") {
            let secs: f64 = timeout
                .parse()
                .map_err(|_| anyhow!("VIGIL_INFERENCE_TIMEOUT_SECS must be a number of seconds"))?;
            self.inference.timeout = secs_to_duration("VIGIL_INFERENCE_TIMEOUT_SECS", secs)?;
        }
        if let Some(backend) = env_nonempty("VIGIL_INDEX_BACKEND") {
            self.storage.index_backend = backend.parse()?;
        }
        if let Some(path) = env_nonempty("VIGIL_INDEX_PATH") {
            self.storage.index_path = PathBuf::from(path);
            self.index_path_explicit = true;
        }
        if let Some(dir) = env_nonempty("VIGIL_ALERTS_DIR") {
            self.storage.alerts_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_nonempty("VIGIL_DETECTIONS_DIR") {
            self.storage.detections_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_nonempty("VIGIL_WEBHOOK_URL") {
            self.webhook_url = Some(url);
        }
        if let Some(headless) = env_nonempty("VIGIL_HEADLESS") {
            self.headless = parse_bool(&headless)
                .ok_or_else(|| anyhow!("VIGIL_HEADLESS must be true/false/1/0"))?;
        }
        Ok(())
    }

    /// Index file follows the alerts directory and backend unless set explicitly.
    fn resolve_index_path(&mut self) {
        if self.index_path_explicit {
            return;
        }
        let file_name = match self.storage.index_backend {
            IndexBackend::Json => "alerts.json",
            IndexBackend::Sqlite => "alerts.db",
        };
        self.storage.index_path = self.storage.alerts_dir.join(file_name);
    }

    fn validate(&mut self) -> Result<()> {
        if self.source_url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be greater than zero"));
        }
        if self.pipeline.max_source_failures == 0 {
            return Err(anyhow!(
                "max consecutive source failures must be greater than zero"
            ));
        }
        if self.inference.timeout.is_zero() {
            return Err(anyhow!("inference timeout must be greater than zero"));
        }
        if self.inference.timeout_retries > MAX_TIMEOUT_RETRIES {
            return Err(anyhow!(
                "inference timeout retries must be at most {}",
                MAX_TIMEOUT_RETRIES
            ));
        }
        if !self.motion.blur_sigma.is_finite() || self.motion.blur_sigma < 0.0 {
            return Err(anyhow!("motion blur sigma must be a non-negative number"));
        }
        if let Some(confidence) = self.verification.min_region_confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(anyhow!("minimum region confidence must be within [0, 1]"));
            }
        }
        self.verification.keywords = self
            .verification
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if self.verification.keywords.is_empty() {
            return Err(anyhow!("keyword set must not be empty"));
        }
        if self.verification.localize_label.trim().is_empty() {
            return Err(anyhow!("localize label must not be empty"));
        }
        if !(1..=100).contains(&self.storage.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if let Some(url) = &self.webhook_url {
            url::Url::parse(url).map_err(|e| anyhow!("invalid webhook url {:?}: {}", url, e))?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<VigilConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn secs_to_duration(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow!("{} must be a non-negative number of seconds", name));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("{}: {}", name, e))
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
