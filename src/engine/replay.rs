//! Replay engine
//!
//! Plays back recorded result documents in a loop. Used by the `live` command
//! when no real engine is linked, and by tests that need a predictable engine.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::{EngineImage, ImageData, MrzEngine};
use crate::errors::{EngineOperation, MrzError, MrzResult};

/// Recorded documents used when no response file is given
pub const DEMO_RESPONSES: &[&str] = &[
    r#"{}"#,
    r#"{"zones":[{"warpedBox":[240,420,1040,420,1040,560,240,560],"lines":[{"text":"P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<","confidence":94.2,"warpedBox":[250,430,1030,430,1030,485,250,485]},{"text":"L898902C36UTO7408122F1204159ZE184226B<<<<<10","confidence":91.7,"warpedBox":[250,495,1030,495,1030,550,250,550]}]}]}"#,
    r#"{"zones":[{"warpedBox":[260,430,1020,440,1018,570,258,560],"lines":[{"text":"P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<","confidence":63.0,"warpedBox":[270,440,1010,450,1009,500,269,490]},{"text":"L898902C36UTO7408122F12041","confidence":18.4,"warpedBox":[270,505,1010,515,1009,-1,-1,-1]}]}]}"#,
];

/// Engine that replays canned result documents
pub struct ReplayEngine {
    responses: Vec<String>,
    cursor: usize,
    latency: Duration,
    fail_every: Option<u64>,
    calls: Arc<AtomicU64>,
    initialized: bool,
}

impl ReplayEngine {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            cursor: 0,
            latency: Duration::ZERO,
            fail_every: None,
            calls: Arc::new(AtomicU64::new(0)),
            initialized: false,
        }
    }

    /// Engine replaying [`DEMO_RESPONSES`]
    pub fn demo() -> Self {
        Self::new(DEMO_RESPONSES.iter().map(|s| s.to_string()).collect())
    }

    /// Load documents from a file holding either a JSON array of documents
    /// or one document per line
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading responses from {}", path.display()))?;
        let trimmed = content.trim();

        let responses: Vec<String> = if trimmed.starts_with('[') {
            let documents: Vec<serde_json::Value> = serde_json::from_str(trimmed)
                .with_context(|| format!("parsing response array in {}", path.display()))?;
            documents.iter().map(|d| d.to_string()).collect()
        } else {
            trimmed
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        };

        if responses.is_empty() {
            bail!("{} contains no responses", path.display());
        }
        Ok(Self::new(responses))
    }

    /// Sleep this long inside every `process` call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every `n`-th `process` call
    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn responses(&self) -> &[String] {
        &self.responses
    }

    /// Shared counter of `process` calls
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl MrzEngine for ReplayEngine {
    fn init(&mut self, config_json: &str) -> MrzResult<()> {
        serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(config_json)
            .map_err(|e| MrzError::engine(EngineOperation::Init, 1, e.to_string()))?;
        self.initialized = true;
        debug!(responses = self.responses.len(), "Replay engine ready");
        Ok(())
    }

    fn process(&mut self, image: &EngineImage<'_>) -> MrzResult<String> {
        if !self.initialized {
            return Err(MrzError::engine(
                EngineOperation::Process,
                -1,
                "engine not initialized",
            ));
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every.is_some_and(|n| call % n == 0) {
            return Err(MrzError::engine(
                EngineOperation::Process,
                2,
                format!("injected failure on call {call}"),
            ));
        }

        let (bytes, row_stride, chroma) = match image.data {
            ImageData::Packed { data, stride } => (data.len(), stride, None),
            ImageData::Planar {
                y,
                u,
                v,
                y_stride,
                uv_stride,
                uv_pixel_stride,
            } => (
                y.len() + u.len() + v.len(),
                y_stride,
                Some((uv_stride, uv_pixel_stride)),
            ),
        };
        debug!(
            call,
            format = ?image.format,
            width = image.width,
            height = image.height,
            bytes,
            row_stride,
            ?chroma,
            orientation = image.orientation.code(),
            "replaying response"
        );
        let response = match self.responses.get(self.cursor % self.responses.len().max(1)) {
            Some(r) => r.clone(),
            None => "{}".to_string(),
        };
        self.cursor += 1;
        Ok(response)
    }

    fn deinit(&mut self) -> MrzResult<()> {
        if !self.initialized {
            return Err(MrzError::engine(
                EngineOperation::DeInit,
                -1,
                "engine not initialized",
            ));
        }
        self.initialized = false;
        debug!(calls = self.calls.load(Ordering::SeqCst), "Replay engine released");
        Ok(())
    }
}
