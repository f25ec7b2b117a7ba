//! OrchestratorBuilder: wiring with fail-fast validation.
//!
//! `build()` reports every missing component at once and validates the run
//! settings, so a misconfigured sender aborts before it touches the lock or
//! the queue.

use std::sync::Arc;

use super::orchestrator::SendOrchestrator;
use super::settings::RunSettings;
use crate::domain::DripError;
use crate::ports::{
    Clock, IdGenerator, InboxRegistry, NoopNotifier, Notifier, QueueStore, RunLock, SystemClock,
    TelemetrySink, Transport, UlidGenerator,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing components: {0:?}")]
    MissingComponents(Vec<&'static str>),

    #[error("invalid run settings: {0}")]
    InvalidSettings(#[from] DripError),
}

/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .store(store.clone())
///     .registry(store.clone())
///     .telemetry(store)
///     .transport(Arc::new(DryRunTransport))
///     .lock(Arc::new(FileRunLock::new("/tmp/drip.lock")))
///     .settings(settings)
///     .build()?;
/// ```
#[derive(Default)]
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn QueueStore>>,
    registry: Option<Arc<dyn InboxRegistry>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    transport: Option<Arc<dyn Transport>>,
    lock: Option<Arc<dyn RunLock>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    settings: Option<RunSettings>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn InboxRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn lock(mut self, lock: Arc<dyn RunLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Defaults to [`NoopNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a [`UlidGenerator`] on the configured clock.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn settings(mut self, settings: RunSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> Result<SendOrchestrator, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.registry.is_none() {
            missing.push("registry");
        }
        if self.telemetry.is_none() {
            missing.push("telemetry");
        }
        if self.transport.is_none() {
            missing.push("transport");
        }
        if self.lock.is_none() {
            missing.push("lock");
        }
        let (Some(store), Some(registry), Some(telemetry), Some(transport), Some(lock)) = (
            self.store,
            self.registry,
            self.telemetry,
            self.transport,
            self.lock,
        ) else {
            return Err(BuildError::MissingComponents(missing));
        };

        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        Ok(SendOrchestrator {
            store,
            registry,
            telemetry,
            transport,
            lock,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            clock,
            ids,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{DryRunTransport, InMemoryStore, MemoryRunLock};
    use crate::policy::Pacer;
    use std::time::Duration;

    #[test]
    fn reports_every_missing_component() {
        let store = Arc::new(InMemoryStore::new(Arc::new(SystemClock)));

        let result = OrchestratorBuilder::new().store(store).build();

        assert!(matches!(
            result,
            Err(BuildError::MissingComponents(missing))
                if missing == vec!["registry", "telemetry", "transport", "lock"]
        ));
    }

    #[test]
    fn builds_with_defaults() {
        let store = Arc::new(InMemoryStore::new(Arc::new(SystemClock)));

        let orchestrator = OrchestratorBuilder::new()
            .store(store.clone())
            .registry(store.clone())
            .telemetry(store)
            .transport(Arc::new(DryRunTransport))
            .lock(Arc::new(MemoryRunLock::new()))
            .build()
            .unwrap();

        assert_eq!(orchestrator.settings().limit, RunSettings::default().limit);
    }

    #[test]
    fn rejects_invalid_settings() {
        let store = Arc::new(InMemoryStore::new(Arc::new(SystemClock)));
        let settings = RunSettings {
            pacer: Pacer {
                min_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(1),
            },
            ..RunSettings::default()
        };

        let result = OrchestratorBuilder::new()
            .store(store.clone())
            .registry(store.clone())
            .telemetry(store)
            .transport(Arc::new(DryRunTransport))
            .lock(Arc::new(MemoryRunLock::new()))
            .settings(settings)
            .build();

        assert!(matches!(result, Err(BuildError::InvalidSettings(DripError::Config(_)))));
    }
}
