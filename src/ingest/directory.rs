//! Replay a directory of still images as a frame stream.

use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use super::{decode_frame, FrameSource};
use crate::error::PipelineError;
use crate::frame::Frame;

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct DirectorySource {
    root: PathBuf,
    pending: VecDeque<PathBuf>,
    frame_count: u64,
}

impl DirectorySource {
    /// List image files under `root` (non-recursive), sorted by name.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow!("source {} is not a directory", root.display()));
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(root).with_context(|| format!("list {}", root.display()))? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        log::info!("{}: {} image(s) to replay", root.display(), files.len());
        Ok(Self {
            root: root.to_path_buf(),
            pending: files.into(),
            frame_count: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for DirectorySource {
    fn name(&self) -> String {
        format!("dir {}", self.root.display())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.frame_count += 1;
        let bytes = fs::read(&path)
            .map_err(|e| PipelineError::InvalidFrame(format!("read {}: {}", path.display(), e)))?;
        decode_frame(&bytes, self.frame_count)
            .map(Some)
            .map_err(|err| match err {
                PipelineError::InvalidFrame(msg) => {
                    PipelineError::InvalidFrame(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })
    }
}
