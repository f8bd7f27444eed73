//! Alert notification sinks.
//!
//! Notification runs after the alert is indexed. A failing notifier is
//! logged and never affects the recorded alert.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::alert::Alert;

pub trait Notifier: Send {
    fn name(&self) -> &'static str;
    fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Human-readable alert block on the log.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn render(alert: &Alert) -> String {
        let mut out = format!(
            "ALERT #{} at {}\n  {}\n  image: {}",
            alert.id,
            alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
            alert.description,
            alert.image_path
        );
        if let Some(path) = &alert.detection_image_path {
            out.push_str(&format!("\n  annotated: {}", path));
        }
        for (i, b) in alert.detected_objects.iter().enumerate() {
            out.push_str(&format!(
                "\n  person {}: ({:.3}, {:.3}) - ({:.3}, {:.3})",
                i + 1,
                b.x_min,
                b.y_min,
                b.x_max,
                b.y_max
            ));
        }
        out
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&self, alert: &Alert) -> Result<()> {
        log::warn!("{}", Self::render(alert));
        Ok(())
    }
}

/// POSTs the alert record as JSON.
pub struct WebhookNotifier {
    agent: ureq::Agent,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed =
            url::Url::parse(url).map_err(|e| anyhow!("invalid webhook url {:?}: {}", url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            let scheme = parsed.scheme();
            return Err(anyhow!("webhook url must be http(s), got {}", scheme));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Ok(Self {
            agent,
            url: parsed.to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn notify(&self, alert: &Alert) -> Result<()> {
        self.agent
            .post(&self.url)
            .send_json(serde_json::to_value(alert)?)
            .map_err(|e| anyhow!("webhook post failed: {}", e))?;
        Ok(())
    }
}

/// Fan out to every notifier; failures are logged, not propagated.
pub fn notify_all(notifiers: &[Box<dyn Notifier>], alert: &Alert) {
    for notifier in notifiers {
        if let Err(err) = notifier.notify(alert) {
            log::warn!(
                "notifier {} failed for alert #{}: {}",
                notifier.name(),
                alert.id,
                err
            );
        }
    }
}
