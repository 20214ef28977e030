//! Batch transform.
//!
//! Accumulates pipeline data across invocations and releases it as one
//! batch. Count-triggered batches are released by the call that fills
//! them. Time-triggered batches park the first buffering call as the
//! window leader; later calls buffer and return nothing, and the leader
//! drains whatever arrived when its window closes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use edgeflow_core::{Context, Event};
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::{ConfigurationError, Result};
use crate::params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    ByCount,
    ByTime,
    ByTimeCount,
}

impl BatchMode {
    fn label(self) -> &'static str {
        match self {
            BatchMode::ByCount => "bycount",
            BatchMode::ByTime => "bytime",
            BatchMode::ByTimeCount => "bytimecount",
        }
    }

    fn uses_threshold(self) -> bool {
        matches!(self, BatchMode::ByCount | BatchMode::ByTimeCount)
    }

    fn uses_interval(self) -> bool {
        matches!(self, BatchMode::ByTime | BatchMode::ByTimeCount)
    }
}

#[derive(Default)]
struct BatchState {
    items: Vec<Vec<u8>>,
    leader_parked: bool,
}

/// Buffers messages and emits them as a single batch.
pub struct Batch {
    mode: BatchMode,
    threshold: usize,
    interval: Duration,
    is_event_data: bool,
    merge_on_send: bool,
    state: Mutex<BatchState>,
    released: Notify,
}

impl Batch {
    pub fn by_count(threshold: usize) -> Self {
        Self::new(BatchMode::ByCount, threshold, Duration::ZERO)
    }

    pub fn by_time(interval: Duration) -> Self {
        Self::new(BatchMode::ByTime, 0, interval)
    }

    pub fn by_time_count(interval: Duration, threshold: usize) -> Self {
        Self::new(BatchMode::ByTimeCount, threshold, interval)
    }

    fn new(mode: BatchMode, threshold: usize, interval: Duration) -> Self {
        Self {
            mode,
            threshold,
            interval,
            is_event_data: false,
            merge_on_send: false,
            state: Mutex::new(BatchState::default()),
            released: Notify::new(),
        }
    }

    /// Treat buffered items as Event JSON and emit an Event array.
    pub fn with_event_data(mut self, is_event_data: bool) -> Self {
        self.is_event_data = is_event_data;
        self
    }

    /// Concatenate raw items instead of emitting a JSON array.
    pub fn with_merge_on_send(mut self, merge: bool) -> Self {
        self.merge_on_send = merge;
        self
    }

    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let mode = match params::required(params, "Batch", "mode")?
            .to_lowercase()
            .as_str()
        {
            "bycount" => BatchMode::ByCount,
            "bytime" => BatchMode::ByTime,
            "bytimecount" => BatchMode::ByTimeCount,
            other => {
                return Err(ConfigurationError::InvalidParameter {
                    function: "Batch".to_string(),
                    parameter: "mode".to_string(),
                    message: format!("{other} is not bycount, bytime or bytimecount"),
                })
            }
        };
        let threshold = if mode.uses_threshold() {
            let threshold = params::usize_param(params, "Batch", "batchthreshold", 0)?;
            if threshold == 0 {
                return Err(ConfigurationError::InvalidParameter {
                    function: "Batch".to_string(),
                    parameter: "batchthreshold".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            threshold
        } else {
            0
        };
        let interval = if mode.uses_interval() {
            let interval =
                params::duration_param(params, "Batch", "timeinterval", Duration::ZERO)?;
            if interval.is_zero() {
                return Err(ConfigurationError::InvalidParameter {
                    function: "Batch".to_string(),
                    parameter: "timeinterval".to_string(),
                    message: "must be a positive duration".to_string(),
                });
            }
            interval
        } else {
            Duration::ZERO
        };
        let batch = Self::new(mode, threshold, interval)
            .with_event_data(params::bool_param(params, "Batch", "iseventdata", false)?)
            .with_merge_on_send(params::bool_param(params, "Batch", "mergeonsend", false)?);
        Ok(batch)
    }

    fn emit(&self, items: Vec<Vec<u8>>) -> TransformResult {
        if items.is_empty() {
            return Ok(None);
        }
        debug!(count = items.len(), mode = self.mode.label(), "batch released");
        if self.is_event_data {
            let mut events = Vec::with_capacity(items.len());
            for item in &items {
                let event: Event = serde_json::from_slice(item)
                    .map_err(|e| TransformError::new(format!("batched item is not an Event: {e}")))?;
                events.push(event);
            }
            let value = serde_json::to_value(events)
                .map_err(|e| TransformError::new(e.to_string()))?;
            return Ok(Some(PipelineData::Json(value)));
        }
        if self.merge_on_send {
            return Ok(Some(PipelineData::Bytes(items.concat())));
        }
        let encoded: Vec<Value> = items
            .iter()
            .map(|item| Value::String(BASE64.encode(item)))
            .collect();
        Ok(Some(PipelineData::Json(Value::Array(encoded))))
    }
}

#[async_trait]
impl Transform for Batch {
    fn name(&self) -> &str {
        "Batch"
    }

    fn fingerprint(&self) -> String {
        params::fingerprint(
            self.name(),
            &[
                self.mode.label(),
                &self.threshold.to_string(),
                &self.interval.as_millis().to_string(),
                &self.is_event_data.to_string(),
                &self.merge_on_send.to_string(),
            ],
        )
    }

    async fn run(&self, _ctx: &mut Context, input: PipelineData) -> TransformResult {
        let item = input.to_bytes()?;

        let become_leader = {
            let mut state = self.state.lock().await;
            state.items.push(item);

            if self.mode.uses_threshold() && state.items.len() >= self.threshold {
                let items = std::mem::take(&mut state.items);
                // Wake a parked window leader; it will find the buffer empty.
                self.released.notify_waiters();
                return self.emit(items);
            }

            if self.mode.uses_interval() && !state.leader_parked {
                state.leader_parked = true;
                true
            } else {
                false
            }
        };

        if !become_leader {
            return Ok(None);
        }

        tokio::select! {
            _ = tokio::time::sleep(self.interval) => {}
            _ = self.released.notified() => {}
        }

        let items = {
            let mut state = self.state.lock().await;
            state.leader_parked = false;
            std::mem::take(&mut state.items)
        };
        self.emit(items)
    }
}
