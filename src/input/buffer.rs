//! Native sample buffer - the sequence-numbered ring the native driver bridge
//! publishes into, and the source interface the ingress side drains from.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::config::IngressConfig;
use super::types::InputSource;
use crate::core::contracts::NativeSampleWire;
use crate::core::errors::CoreError;

/// Result of one `drain(cursor_seq)` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainBatch {
    /// Samples with `seq > cursor_seq`, in sequence order.
    pub points: Vec<NativeSampleWire>,
    /// Cursor value the consumer must store, even when `points` is empty.
    pub next_seq: u64,
    /// Ring generation; changes whenever the driver resets the ring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_epoch: Option<u32>,
}

impl DrainBatch {
    /// Decode a batch published as JSON by an out-of-process driver bridge.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let batch: Self = serde_json::from_str(json)?;
        if batch
            .points
            .windows(2)
            .any(|pair| pair[1].seq() <= pair[0].seq())
        {
            return Err(CoreError::InvalidInput(
                "drain batch points are not in sequence order".into(),
            ));
        }
        Ok(batch)
    }
}

/// Tablet state polled by the controller on every event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabletSnapshot {
    /// Configured backend, if any native backend is configured at all.
    pub backend: Option<InputSource>,
    /// Backend currently delivering samples.
    pub active_backend: Option<InputSource>,
    pub is_streaming: bool,
    pub current_point: Option<NativeSampleWire>,
}

impl TabletSnapshot {
    /// Native sequencing applies only while a native backend is streaming.
    pub fn native_active(&self) -> bool {
        self.is_streaming && self.active_backend.is_some_and(InputSource::is_native)
    }
}

/// Producer contract of the native driver bridge.
pub trait NativeSampleSource: Send + Sync {
    fn drain(&self, cursor_seq: u64) -> DrainBatch;

    fn snapshot(&self) -> TabletSnapshot;
}

/// Public ring metrics for status responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NativeBufferMetrics {
    pub pushed: u64,
    pub overwritten: u64,
    pub current_depth: usize,
    pub buffer_epoch: u32,
}

#[derive(Debug)]
struct RingState {
    samples: VecDeque<NativeSampleWire>,
    next_seq: u64,
    epoch: u32,
    backend: Option<InputSource>,
    streaming: bool,
    pushed: u64,
    overwritten: u64,
}

impl RingState {
    fn new(backend: Option<InputSource>) -> Self {
        Self {
            samples: VecDeque::new(),
            next_seq: 1,
            epoch: 0,
            backend,
            streaming: false,
            pushed: 0,
            overwritten: 0,
        }
    }

    fn head_seq(&self) -> u64 {
        self.next_seq.saturating_sub(1)
    }
}

/// Bounded ring of native samples; oldest samples are overwritten when full.
#[derive(Debug)]
pub struct NativeSampleBuffer {
    capacity: usize,
    inner: Mutex<RingState>,
}

impl NativeSampleBuffer {
    pub fn new(backend: Option<InputSource>, capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RingState::new(backend)),
        }
    }

    /// Ring sized by `IngressConfig::buffer_capacity`.
    pub fn from_config(backend: Option<InputSource>, config: &IngressConfig) -> Self {
        Self::new(backend, config.buffer_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_streaming(&self, streaming: bool) {
        let mut state = self.inner.lock();
        if state.streaming != streaming {
            tracing::info!(
                "[NativeBuffer] Streaming {} (epoch {})",
                if streaming { "started" } else { "stopped" },
                state.epoch
            );
        }
        state.streaming = streaming;
    }

    /// Append a sample and return the sequence number assigned to it.
    pub fn push(&self, mut sample: NativeSampleWire) -> u64 {
        let mut state = self.inner.lock();
        while state.samples.len() >= self.capacity {
            if state.samples.pop_front().is_none() {
                break;
            }
            state.overwritten = state.overwritten.saturating_add(1);
        }

        let seq = state.next_seq;
        state.next_seq = state.next_seq.saturating_add(1);
        sample.set_seq(seq);
        state.samples.push_back(sample);
        state.pushed = state.pushed.saturating_add(1);
        seq
    }

    /// Driver reset / reconnect: the ring is emptied and sequencing restarts
    /// under a new epoch.
    pub fn reset(&self) -> u32 {
        let mut state = self.inner.lock();
        state.samples.clear();
        state.next_seq = 1;
        state.epoch = state.epoch.wrapping_add(1);
        tracing::warn!("[NativeBuffer] Ring reset, new epoch {}", state.epoch);
        state.epoch
    }

    pub fn metrics_snapshot(&self) -> NativeBufferMetrics {
        let state = self.inner.lock();
        NativeBufferMetrics {
            pushed: state.pushed,
            overwritten: state.overwritten,
            current_depth: state.samples.len(),
            buffer_epoch: state.epoch,
        }
    }
}

impl NativeSampleSource for NativeSampleBuffer {
    fn drain(&self, cursor_seq: u64) -> DrainBatch {
        let state = self.inner.lock();
        let points = state
            .samples
            .iter()
            .filter(|sample| sample.seq() > cursor_seq)
            .cloned()
            .collect::<Vec<_>>();
        DrainBatch {
            points,
            next_seq: state.head_seq(),
            buffer_epoch: Some(state.epoch),
        }
    }

    fn snapshot(&self) -> TabletSnapshot {
        let state = self.inner.lock();
        TabletSnapshot {
            backend: state.backend,
            active_backend: if state.streaming { state.backend } else { None },
            is_streaming: state.streaming,
            current_point: state.samples.back().cloned(),
        }
    }
}
