use super::Adapter;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// An in-memory adapter that records written frames and replays canned replies.
#[derive(Clone, Default)]
pub struct MockAdapter {
    written: Arc<Mutex<Vec<String>>>,
    replies: Arc<Mutex<VecDeque<String>>>,
    fail_writes: bool,
}

impl MockAdapter {
    /// An adapter with no queued replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// An adapter whose every write fails, for exercising error paths.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Queue a reply for a later `read_available`.
    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply.into());
        }
    }

    /// Every frame written so far.
    pub fn written(&self) -> Vec<String> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        if self.fail_writes {
            bail!("mock adapter refused write");
        }
        if let Ok(mut written) = self.written.lock() {
            written.push(frame.to_string());
        }
        Ok(())
    }

    async fn read_available(&mut self) -> Result<String> {
        Ok(self
            .replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_default())
    }
}
