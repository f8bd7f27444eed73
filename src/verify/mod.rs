//! Two-stage verification of an admitted frame.
//!
//! 1. Describe the frame and scan the description for configured keywords.
//!    No match (or an explicit all-clear) rejects without any localization
//!    call.
//! 2. Localize the configured label. Keywords without a corroborating region
//!    are not trusted and reject.
//!
//! Only a frame that passes both stages yields an admitted verdict.

mod keywords;

pub use keywords::{KeywordMatcher, KeywordScan, BENIGN_PHRASES, DEFAULT_KEYWORDS, SYNONYMS};

use anyhow::Result;
use std::collections::BTreeSet;

use crate::frame::Frame;
use crate::inference::{InferenceClient, InferenceError, LocalizedRegion};

#[derive(Clone, Debug)]
pub struct VerificationSettings {
    pub keywords: Vec<String>,
    /// Label requested from the localization stage.
    pub localize_label: String,
    /// When set, regions reporting a lower confidence are discarded before
    /// the non-empty check. Regions without a confidence always count.
    pub min_region_confidence: Option<f32>,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            localize_label: "person".to_string(),
            min_region_confidence: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RejectReason {
    /// Describe or localize failed after the adapter's retry policy.
    InferenceUnavailable(InferenceError),
    /// The description explicitly states nothing is wrong.
    BenignScene,
    NoKeywordMatch,
    KeywordWithoutLocalization,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InferenceUnavailable(err) => write!(f, "inference-unavailable ({})", err),
            RejectReason::BenignScene => write!(f, "benign-scene"),
            RejectReason::NoKeywordMatch => write!(f, "no-keyword-match"),
            RejectReason::KeywordWithoutLocalization => write!(f, "keyword-without-localization"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Admitted,
    Rejected(RejectReason),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub matched_keywords: BTreeSet<String>,
    pub regions: Vec<LocalizedRegion>,
    pub description: String,
}

impl Verdict {
    fn rejected(
        reason: RejectReason,
        description: String,
        matched_keywords: BTreeSet<String>,
    ) -> Self {
        Self {
            outcome: Outcome::Rejected(reason),
            matched_keywords,
            regions: Vec::new(),
            description,
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.outcome == Outcome::Admitted
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match &self.outcome {
            Outcome::Rejected(reason) => Some(reason),
            Outcome::Admitted => None,
        }
    }
}

pub struct Verifier {
    client: InferenceClient,
    matcher: KeywordMatcher,
    settings: VerificationSettings,
}

impl Verifier {
    pub fn new(client: InferenceClient, settings: VerificationSettings) -> Result<Self> {
        let matcher = KeywordMatcher::new(settings.keywords.as_slice())?;
        Ok(Self {
            client,
            matcher,
            settings,
        })
    }

    pub fn verify(&self, frame: &Frame) -> Verdict {
        let description = match self.client.describe(frame) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("frame #{}: describe failed: {}", frame.sequence, err);
                return Verdict::rejected(
                    RejectReason::InferenceUnavailable(err),
                    String::new(),
                    BTreeSet::new(),
                );
            }
        };

        let matched = match self.matcher.scan(&description) {
            KeywordScan::Benign => {
                return Verdict::rejected(RejectReason::BenignScene, description, BTreeSet::new())
            }
            KeywordScan::Matched(matched) if matched.is_empty() => {
                return Verdict::rejected(RejectReason::NoKeywordMatch, description, matched)
            }
            KeywordScan::Matched(matched) => matched,
        };
        log::debug!(
            "frame #{}: keywords {:?}, localizing",
            frame.sequence,
            matched
        );

        let regions = match self.client.localize(frame, &self.settings.localize_label) {
            Ok(regions) => self.filter_confident(regions),
            Err(err) => {
                log::warn!("frame #{}: localize failed: {}", frame.sequence, err);
                return Verdict::rejected(
                    RejectReason::InferenceUnavailable(err),
                    description,
                    matched,
                );
            }
        };
        if regions.is_empty() {
            return Verdict::rejected(
                RejectReason::KeywordWithoutLocalization,
                description,
                matched,
            );
        }

        Verdict {
            outcome: Outcome::Admitted,
            matched_keywords: matched,
            regions,
            description,
        }
    }

    fn filter_confident(&self, regions: Vec<LocalizedRegion>) -> Vec<LocalizedRegion> {
        let Some(threshold) = self.settings.min_region_confidence else {
            return regions;
        };
        regions
            .into_iter()
            .filter(|region| region.confidence.map_or(true, |c| c >= threshold))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::tests::solid_frame;
    use crate::inference::{InferenceSettings, VisionService};
    use image::RgbImage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Scripted service with call counters.
    pub(crate) struct ScriptedService {
        pub description: Result<String, InferenceError>,
        pub regions: Result<Vec<LocalizedRegion>, InferenceError>,
        pub describe_calls: AtomicU32,
        pub localize_calls: AtomicU32,
    }

    impl ScriptedService {
        pub(crate) fn new(description: &str, regions: Vec<LocalizedRegion>) -> Self {
            Self {
                description: Ok(description.to_string()),
                regions: Ok(regions),
                describe_calls: AtomicU32::new(0),
                localize_calls: AtomicU32::new(0),
            }
        }
    }

    impl VisionService for ScriptedService {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn describe(&self, _image: &RgbImage, _prompt: &str) -> Result<String, InferenceError> {
            self.describe_calls.fetch_add(1, Ordering::SeqCst);
            self.description.clone()
        }

        fn localize(
            &self,
            _image: &RgbImage,
            _label: &str,
        ) -> Result<Vec<LocalizedRegion>, InferenceError> {
            self.localize_calls.fetch_add(1, Ordering::SeqCst);
            self.regions.clone()
        }
    }

    fn verifier(service: Arc<ScriptedService>, settings: VerificationSettings) -> Verifier {
        let client = InferenceClient::new(
            service,
            InferenceSettings {
                timeout: Duration::from_secs(2),
                ..InferenceSettings::default()
            },
        );
        Verifier::new(client, settings).unwrap()
    }

    fn run(service: &Arc<ScriptedService>) -> Verdict {
        verifier(service.clone(), VerificationSettings::default())
            .verify(&solid_frame(16, 16, 0, 1))
    }

    #[test]
    fn no_keyword_rejects_without_localize() {
        let service = Arc::new(ScriptedService::new("a calm hallway", vec![]));
        let verdict = run(&service);
        assert_eq!(verdict.reject_reason(), Some(&RejectReason::NoKeywordMatch));
        assert_eq!(service.localize_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn benign_scene_rejects_without_localize() {
        let service = Arc::new(ScriptedService::new(
            "A person reading. Everything looks normal.",
            vec![],
        ));
        let verdict = run(&service);
        assert_eq!(verdict.reject_reason(), Some(&RejectReason::BenignScene));
        assert_eq!(service.localize_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn keyword_without_region_rejects() {
        let service = Arc::new(ScriptedService::new(
            "a suspicious intruder near the door",
            vec![],
        ));
        let verdict = run(&service);
        assert_eq!(
            verdict.reject_reason(),
            Some(&RejectReason::KeywordWithoutLocalization)
        );
        assert_eq!(service.localize_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keyword_with_region_admits_with_exact_regions() {
        let regions = vec![
            LocalizedRegion::new("person", 0.1, 0.2, 0.4, 0.6),
            LocalizedRegion::new("person", 0.5, 0.5, 0.9, 0.95),
        ];
        let service = Arc::new(ScriptedService::new(
            "a suspicious intruder near the door",
            regions.clone(),
        ));
        let verdict = run(&service);
        assert!(verdict.is_admitted());
        assert_eq!(verdict.regions, regions);
        assert_eq!(verdict.description, "a suspicious intruder near the door");
        assert!(verdict.matched_keywords.contains("intruder"));
        assert!(verdict.matched_keywords.contains("suspicious"));
    }

    #[test]
    fn describe_failure_rejects() {
        let mut service = ScriptedService::new("", vec![]);
        service.description = Err(InferenceError::Unavailable("http 503".into()));
        let service = Arc::new(service);
        let verdict = run(&service);
        assert!(matches!(
            verdict.reject_reason(),
            Some(RejectReason::InferenceUnavailable(_))
        ));
        assert_eq!(service.localize_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn localize_failure_rejects() {
        let mut service = ScriptedService::new("a man with a weapon", vec![]);
        service.regions = Err(InferenceError::Timeout);
        let verdict = run(&Arc::new(service));
        assert_eq!(
            verdict.reject_reason(),
            Some(&RejectReason::InferenceUnavailable(InferenceError::Timeout))
        );
    }

    #[test]
    fn confidence_threshold_filters_regions() {
        let service = Arc::new(ScriptedService::new(
            "a man at the gate",
            vec![
                LocalizedRegion::new("person", 0.1, 0.1, 0.2, 0.2).with_confidence(0.3),
                LocalizedRegion::new("person", 0.3, 0.3, 0.4, 0.4),
            ],
        ));
        let settings = VerificationSettings {
            min_region_confidence: Some(0.5),
            ..VerificationSettings::default()
        };
        let verdict = verifier(service.clone(), settings).verify(&solid_frame(16, 16, 0, 1));
        assert!(verdict.is_admitted());
        assert_eq!(verdict.regions.len(), 1);
        assert_eq!(verdict.regions[0].confidence, None);

        let service = Arc::new(ScriptedService::new(
            "a man at the gate",
            vec![LocalizedRegion::new("person", 0.1, 0.1, 0.2, 0.2).with_confidence(0.3)],
        ));
        let settings = VerificationSettings {
            min_region_confidence: Some(0.5),
            ..VerificationSettings::default()
        };
        let verdict = verifier(service, settings).verify(&solid_frame(16, 16, 0, 1));
        assert_eq!(
            verdict.reject_reason(),
            Some(&RejectReason::KeywordWithoutLocalization)
        );
    }
}
