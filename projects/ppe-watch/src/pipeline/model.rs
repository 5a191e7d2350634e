// Process-wide detector slot: loaded once, shared read-only across pipelines.

use crate::pipeline::detection::Detector;
use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

lazy_static::lazy_static! {
    static ref MODEL_SLOT: ModelSlot = ModelSlot::new();
}

/// The slot shared by every pipeline in this process.
pub fn global() -> &'static ModelSlot {
    &MODEL_SLOT
}

/// Lazily initialised, reference-counted holder of one detector.
///
/// Every `acquire` hands out an `Arc` clone, so the strong count tracks the
/// number of live pipelines. Loading happens under the slot mutex, which keeps
/// concurrent pipeline starts from loading the model twice.
#[derive(Default)]
pub struct ModelSlot {
    inner: Mutex<Option<Arc<dyn Detector>>>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the loaded detector, running `loader` first if the slot is empty.
    pub fn acquire<F>(&self, loader: F) -> Result<Arc<dyn Detector>>
    where
        F: FnOnce() -> Result<Arc<dyn Detector>>,
    {
        let mut slot = self
            .inner
            .lock()
            .map_err(|_| anyhow!("model slot mutex poisoned"))?;
        if let Some(detector) = slot.as_ref() {
            return Ok(detector.clone());
        }

        let detector = loader()?;
        tracing::info!("Model slot initialised with {}", detector.name());
        *slot = Some(detector.clone());
        Ok(detector)
    }

    /// Eagerly loads the detector, e.g. at server start.
    pub fn init<F>(&self, loader: F) -> Result<()>
    where
        F: FnOnce() -> Result<Arc<dyn Detector>>,
    {
        self.acquire(loader).map(|_| ())
    }

    /// Drops the slot's reference. Pipelines still running keep theirs;
    /// the next `acquire` loads a fresh model. Returns false if nothing was loaded.
    pub fn shutdown(&self) -> bool {
        let released = match self.inner.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match released {
            Some(detector) => {
                tracing::info!(
                    "Model slot shut down, {} pipeline(s) still hold the model",
                    Arc::strong_count(&detector) - 1
                );
                true
            }
            None => false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Number of handles held outside the slot.
    pub fn active_users(&self) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|d| Arc::strong_count(d) - 1))
            .unwrap_or(0)
    }
}
