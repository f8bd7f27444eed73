use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::pipeline::PipelineStats;

const STATUS_REFRESH: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    headless: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, headless: bool) -> Self {
        Self {
            mode,
            is_tty,
            headless,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, headless: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, headless)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.headless,
                UiMode::Plain => false,
            }
    }

    fn spinner(message: String) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message);
        spinner
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            StageGuard::new(name.to_string(), Some(Self::spinner(format!("{name}…"))))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Live counters while the pipeline runs. Headless or non-tty runs get
    /// nothing here; the capture loop's health log covers them.
    pub fn status(&self, stats: Arc<PipelineStats>) -> StatusGuard {
        if !self.use_pretty() {
            return StatusGuard {
                done: Arc::new(AtomicBool::new(true)),
                updater: None,
                spinner: None,
            };
        }
        let spinner = Self::spinner(stats.snapshot().status_line());
        let done = Arc::new(AtomicBool::new(false));
        let updater = {
            let spinner = spinner.clone();
            let done = Arc::clone(&done);
            thread::Builder::new()
                .name("vigil-status".to_string())
                .spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        spinner.set_message(stats.snapshot().status_line());
                        thread::sleep(STATUS_REFRESH);
                    }
                })
                .ok()
        };
        StatusGuard {
            done,
            updater,
            spinner: Some(spinner),
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct StatusGuard {
    done: Arc<AtomicBool>,
    updater: Option<JoinHandle<()>>,
    spinner: Option<ProgressBar>,
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Relaxed);
        if let Some(updater) = self.updater.take() {
            let _ = updater.join();
        }
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
