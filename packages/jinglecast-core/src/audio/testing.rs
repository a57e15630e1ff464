//! In-memory audio collaborators for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{AudioOutput, AudioSource, OutputError, SourceError};
use crate::operation::CancelSignal;

/// Output that "plays" for a fixed time and tracks overlap.
pub(crate) struct FakeOutput {
    duration: Duration,
    fail: bool,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub started: AtomicUsize,
}

impl FakeOutput {
    pub fn with(duration: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            duration,
            fail,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        })
    }

    pub fn new(duration: Duration) -> Arc<Self> {
        Self::with(duration, false)
    }

    pub fn failing() -> Arc<Self> {
        Self::with(Duration::from_millis(10), true)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn play(&self, _pcm: Bytes, cancel: CancelSignal) -> Result<bool, OutputError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let finished = tokio::select! {
            () = tokio::time::sleep(self.duration) => true,
            () = cancel.cancelled() => false,
        };
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(OutputError::Exited("exit status: 1".into()));
        }
        Ok(finished)
    }
}

/// Source serving fixed PCM per URL; unknown URLs fail conversion.
#[derive(Default)]
pub(crate) struct FakeSource {
    files: HashMap<String, Bytes>,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with_file(self, url: &str, pcm: &'static [u8]) -> Self {
        self.with_pcm(url, Bytes::from_static(pcm))
    }

    pub fn with_pcm(mut self, url: &str, pcm: Bytes) -> Self {
        self.files.insert(url.to_string(), pcm);
        self
    }
}

#[async_trait]
impl AudioSource for FakeSource {
    async fn fetch_pcm(&self, url: &str) -> Result<Bytes, SourceError> {
        self.fetched.lock().push(url.to_string());
        self.files.get(url).cloned().ok_or_else(|| SourceError::Converter {
            status: "exit status: 1".into(),
            stderr: format!("{url}: Invalid data found when processing input"),
        })
    }
}
