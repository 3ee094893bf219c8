use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::services::cancel::CancelToken;

/// Counting admission gate in front of the rendering service.
///
/// The service cannot run several jobs at once without them timing each
/// other out, so every submission first takes a slot here. Waiters are
/// admitted in the order they started waiting.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it frees the slot, on every exit path.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    slots: Arc<Semaphore>,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        metrics::gauge!("render_gate_available_slots").set(capacity as f64);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot, giving up when `cancel` fires.
    ///
    /// A cancelled wait holds nothing.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<AdmissionPermit, AdmissionError> {
        if cancel.is_cancelled() {
            return Err(AdmissionError::Cancelled);
        }
        let started = Instant::now();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AdmissionError::Cancelled),
            permit = self.slots.clone().acquire_owned() => permit.map_err(|_| AdmissionError::Closed)?,
        };

        metrics::histogram!("render_admission_wait_seconds").record(started.elapsed().as_secs_f64());
        metrics::gauge!("render_gate_available_slots").set(self.slots.available_permits() as f64);
        tracing::debug!(
            wait_ms = started.elapsed().as_millis() as u64,
            available = self.slots.available_permits(),
            "Admission slot acquired"
        );

        Ok(AdmissionPermit {
            _permit: permit,
            slots: self.slots.clone(),
        })
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // the inner permit is returned right after this body runs
        metrics::gauge!("render_gate_available_slots")
            .set((self.slots.available_permits() + 1) as f64);
        tracing::debug!("Admission slot released");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Cancelled while waiting for an admission slot")]
    Cancelled,

    #[error("Admission gate closed")]
    Closed,
}
