use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::{DetectionParams, Detector};
use crate::detect::result::{BoundingBox, DetectionResult};
use crate::frame::GrayFrame;

/// Detector that replays a fixed sequence of box counts, one entry per call.
///
/// After the script runs out the last count repeats. Used by `stub://` model
/// paths, the demo binary and tests.
pub struct ScriptedDetector {
    counts: Vec<usize>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(counts: Vec<usize>) -> Self {
        Self {
            counts,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Parse `stub://name?counts=0,2,2,1`. Without `counts` the detector always sees 0.
    pub fn from_model_path(model_path: &str) -> Result<Self> {
        let rest = model_path
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("scripted detector paths start with stub://"))?;
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(Self::new(Vec::new()));
        };
        for pair in query.split('&') {
            if let Some(("counts", value)) = pair.split_once('=') {
                return Ok(Self::new(parse_counts(value)?));
            }
        }
        Ok(Self::new(Vec::new()))
    }

    /// Shared counter of `detect` invocations; clone it before handing the detector to an engine.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn count_for_call(&self, call: usize) -> usize {
        match self.counts.get(call) {
            Some(count) => *count,
            None => self.counts.last().copied().unwrap_or(0),
        }
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &GrayFrame, params: &DetectionParams) -> Result<DetectionResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let count = self.count_for_call(call);
        let side = params.min_size.width.max(params.min_size.height).max(1);
        let boxes = (0..count)
            .map(|i| BoundingBox::new((i as i32).saturating_mul(side as i32 + 10), 0, side, side))
            .collect();
        Ok(DetectionResult::new(boxes))
    }
}

/// Parse a comma-separated list of box counts.
pub fn parse_counts(value: &str) -> Result<Vec<usize>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<usize>()
                .map_err(|_| anyhow!("box count '{}' is not a non-negative integer", entry))
        })
        .collect()
}
