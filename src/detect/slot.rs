use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::detector::Detector;
use crate::error::{MonitorError, MonitorResult};

/// Constructs a backend. Called at most once per successful load.
pub type BackendLoader = Box<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectorStatus {
    NotLoaded,
    Ready,
    Unavailable(String),
}

enum SlotState {
    Empty,
    Ready(Arc<Detector>),
    Failed(String),
}

/// Lazily-initialized shared detector.
///
/// The first `get` constructs the backend; every later call hands out the same
/// `Arc<Detector>`. A failed load is remembered and reported as `ModelUnavailable`
/// until `reload` is called.
pub struct DetectorSlot {
    loader: BackendLoader,
    state: Mutex<SlotState>,
}

impl DetectorSlot {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Slot that is ready immediately with an already constructed backend.
    pub fn preloaded<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self {
            loader: Box::new(|| -> Result<Box<dyn DetectorBackend>> {
                anyhow::bail!("preloaded detector cannot be reloaded")
            }),
            state: Mutex::new(SlotState::Ready(Arc::new(Detector::new(Box::new(backend))))),
        }
    }

    /// Shared detector, loading it on first use.
    pub fn get(&self) -> MonitorResult<Arc<Detector>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| MonitorError::model_unavailable("detector slot lock poisoned"))?;
        if let SlotState::Ready(detector) = &*state {
            return Ok(detector.clone());
        }
        if let SlotState::Failed(reason) = &*state {
            return Err(MonitorError::model_unavailable(reason.clone()));
        }
        match self.load() {
            Ok(detector) => {
                *state = SlotState::Ready(detector.clone());
                Ok(detector)
            }
            Err(reason) => {
                *state = SlotState::Failed(reason.clone());
                Err(MonitorError::model_unavailable(reason))
            }
        }
    }

    /// Drop any loaded or failed state and load again.
    pub fn reload(&self) -> MonitorResult<Arc<Detector>> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| MonitorError::model_unavailable("detector slot lock poisoned"))?;
            *state = SlotState::Empty;
        }
        self.get()
    }

    pub fn status(&self) -> DetectorStatus {
        match self.state.lock() {
            Ok(state) => match &*state {
                SlotState::Empty => DetectorStatus::NotLoaded,
                SlotState::Ready(_) => DetectorStatus::Ready,
                SlotState::Failed(reason) => DetectorStatus::Unavailable(reason.clone()),
            },
            Err(_) => DetectorStatus::Unavailable("detector slot lock poisoned".to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == DetectorStatus::Ready
    }

    fn load(&self) -> std::result::Result<Arc<Detector>, String> {
        let mut backend = (self.loader)().map_err(|err| {
            log::error!("failed to load detector: {:#}", err);
            format!("{:#}", err)
        })?;
        backend.warm_up().map_err(|err| {
            log::error!("detector warm-up failed: {:#}", err);
            format!("{:#}", err)
        })?;
        log::info!("detector '{}' loaded", backend.name());
        Ok(Arc::new(Detector::new(backend)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn loads_once_and_shares_the_instance() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let slot = DetectorSlot::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedBackend::empty()) as Box<dyn DetectorBackend>)
        });
        assert_eq!(slot.status(), DetectorStatus::NotLoaded);

        let a = slot.get().unwrap();
        let b = slot.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(slot.is_ready());
    }

    #[test]
    fn failed_load_is_sticky_until_reload() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let slot = DetectorSlot::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("model/best.onnx not found")
        });

        let err = slot.get().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelUnavailable);
        assert!(slot.get().is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(matches!(slot.status(), DetectorStatus::Unavailable(_)));

        assert!(slot.reload().is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }
}
