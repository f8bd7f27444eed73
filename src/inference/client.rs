use image::RgbImage;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{InferenceError, LocalizedRegion, VisionService};
use crate::frame::Frame;

pub const DEFAULT_DESCRIBE_PROMPT: &str = "Describe what you see in this image and be specific \
     about the objects, people, and the colors of any objects such as cars or clothing.";

/// Upper bound on `InferenceSettings::timeout_retries`.
pub const MAX_TIMEOUT_RETRIES: u32 = 1;

#[derive(Clone, Debug)]
pub struct InferenceSettings {
    /// Upper bound on a single call.
    pub timeout: Duration,
    /// Extra attempts after a timeout, capped at `MAX_TIMEOUT_RETRIES`.
    /// Other failures are never retried.
    pub timeout_retries: u32,
    /// Prompt sent with every describe call.
    pub prompt: String,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            timeout_retries: 1,
            prompt: DEFAULT_DESCRIBE_PROMPT.to_string(),
        }
    }
}

/// Adapter over a `VisionService` with timeout and retry normalization.
///
/// Each attempt runs on a short-lived helper thread and the caller waits on
/// it with `recv_timeout`. A call that outlives its timeout is abandoned: its
/// thread finishes on its own and the result is discarded. No caching.
#[derive(Clone)]
pub struct InferenceClient {
    service: Arc<dyn VisionService>,
    settings: InferenceSettings,
}

impl InferenceClient {
    pub fn new(service: Arc<dyn VisionService>, settings: InferenceSettings) -> Self {
        Self { service, settings }
    }

    pub fn describe(&self, frame: &Frame) -> Result<String, InferenceError> {
        let prompt = self.settings.prompt.clone();
        self.call_with_retry("describe", frame.shared_image(), move |service, image| {
            service.describe(image, &prompt)
        })
    }

    pub fn localize(
        &self,
        frame: &Frame,
        label: &str,
    ) -> Result<Vec<LocalizedRegion>, InferenceError> {
        let label = label.to_string();
        self.call_with_retry("localize", frame.shared_image(), move |service, image| {
            service.localize(image, &label)
        })
    }

    fn call_with_retry<T, F>(
        &self,
        op: &'static str,
        image: Arc<RgbImage>,
        call: F,
    ) -> Result<T, InferenceError>
    where
        T: Send + 'static,
        F: Fn(&dyn VisionService, &RgbImage) -> Result<T, InferenceError> + Send + Sync + 'static,
    {
        let call = Arc::new(call);
        let attempts = 1 + self.settings.timeout_retries.min(MAX_TIMEOUT_RETRIES);
        let mut attempt = 1;
        loop {
            match self.bounded(op, Arc::clone(&image), Arc::clone(&call)) {
                Err(InferenceError::Timeout) if attempt < attempts => {
                    log::warn!(
                        "{} {} timed out after {:?} (attempt {}/{}), retrying",
                        self.service.name(),
                        op,
                        self.settings.timeout,
                        attempt,
                        attempts
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn bounded<T, F>(
        &self,
        op: &'static str,
        image: Arc<RgbImage>,
        call: Arc<F>,
    ) -> Result<T, InferenceError>
    where
        T: Send + 'static,
        F: Fn(&dyn VisionService, &RgbImage) -> Result<T, InferenceError> + Send + Sync + 'static,
    {
        let service = Arc::clone(&self.service);
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(format!("vigil-{}", op))
            .spawn(move || {
                let result = (*call)(service.as_ref(), image.as_ref());
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| InferenceError::Unavailable(format!("spawn {} call: {}", op, e)))?;

        match rx.recv_timeout(self.settings.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(InferenceError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(InferenceError::Unavailable(format!(
                "{} call terminated without a result",
                op
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::solid_frame;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Sleeps for `delays[n]` on the n-th call, then answers.
    struct SlowService {
        delays: Vec<Duration>,
        calls: AtomicU32,
        fail_with: Option<InferenceError>,
    }

    impl SlowService {
        fn new(delays: Vec<Duration>) -> Self {
            Self {
                delays,
                calls: AtomicU32::new(0),
                fail_with: None,
            }
        }

        fn pause(&self) {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            if let Some(delay) = self.delays.get(n) {
                thread::sleep(*delay);
            }
        }
    }

    impl VisionService for SlowService {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn describe(&self, _image: &RgbImage, prompt: &str) -> Result<String, InferenceError> {
            self.pause();
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(format!("answer to {}", prompt)),
            }
        }

        fn localize(
            &self,
            _image: &RgbImage,
            label: &str,
        ) -> Result<Vec<LocalizedRegion>, InferenceError> {
            self.pause();
            Ok(vec![LocalizedRegion::new(label, 0.1, 0.1, 0.2, 0.2)])
        }
    }

    fn client(service: Arc<SlowService>, timeout_ms: u64) -> InferenceClient {
        client_with_retries(service, timeout_ms, 1)
    }

    fn client_with_retries(
        service: Arc<SlowService>,
        timeout_ms: u64,
        timeout_retries: u32,
    ) -> InferenceClient {
        InferenceClient::new(
            service,
            InferenceSettings {
                timeout: Duration::from_millis(timeout_ms),
                timeout_retries,
                prompt: "what is here".to_string(),
            },
        )
    }

    #[test]
    fn fast_call_succeeds_once() {
        let service = Arc::new(SlowService::new(vec![]));
        let result = client(service.clone(), 500).describe(&solid_frame(4, 4, 0, 1));
        assert_eq!(result.unwrap(), "answer to what is here");
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_timeout_is_retried() {
        let service = Arc::new(SlowService::new(vec![Duration::from_millis(400)]));
        let regions = client(service.clone(), 100)
            .localize(&solid_frame(4, 4, 0, 1), "person")
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exhausted_retries_propagate_timeout() {
        let service = Arc::new(SlowService::new(vec![
            Duration::from_millis(400),
            Duration::from_millis(400),
        ]));
        let err = client(service.clone(), 100)
            .describe(&solid_frame(4, 4, 0, 1))
            .unwrap_err();
        assert_eq!(err, InferenceError::Timeout);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unavailable_is_not_retried() {
        let mut service = SlowService::new(vec![]);
        service.fail_with = Some(InferenceError::Unavailable("http 401".into()));
        let service = Arc::new(service);
        let err = client(service.clone(), 500)
            .describe(&solid_frame(4, 4, 0, 1))
            .unwrap_err();
        assert_eq!(err, InferenceError::Unavailable("http 401".into()));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_are_capped_at_one() {
        let delays = vec![Duration::from_millis(200); 4];
        for retries in [4, u32::MAX] {
            let service = Arc::new(SlowService::new(delays.clone()));
            let err = client_with_retries(service.clone(), 50, retries)
                .describe(&solid_frame(4, 4, 0, 1))
                .unwrap_err();
            assert_eq!(err, InferenceError::Timeout);
            assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        }
    }

    #[test]
    fn zero_retries_gives_up_after_first_timeout() {
        let service = Arc::new(SlowService::new(vec![Duration::from_millis(200)]));
        let err = client_with_retries(service.clone(), 50, 0)
            .describe(&solid_frame(4, 4, 0, 1))
            .unwrap_err();
        assert_eq!(err, InferenceError::Timeout);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }
}
