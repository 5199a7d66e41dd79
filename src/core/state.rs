use std::sync::Arc;

use crate::core::config::Settings;
use crate::core::time::SharedClock;
use crate::store::SharedStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: SharedStore,
    clock: SharedClock,
}

impl AppState {
    pub(crate) fn new(settings: Settings, store: SharedStore, clock: SharedClock) -> Self {
        Self { inner: Arc::new(InnerState { settings, store, clock }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }
}
