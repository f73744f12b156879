use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use deepcrew_core::{Config, CrewExecutor, PhaseExecutor, QualityControl};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::AppError;

/// Shared state of the HTTP service.
#[derive(Clone)]
pub struct AppState {
    executor: Arc<dyn PhaseExecutor>,
    run_permits: Arc<Semaphore>,
    max_concurrent_runs: usize,
    heartbeat: Duration,
    report_dir: Option<PathBuf>,
    defaults: QualityControl,
    cors_origin: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Capacity {
    pub max_concurrent_runs: usize,
    pub available_permits: usize,
    pub running: usize,
}

impl AppState {
    /// State backed by the built-in graph executor.
    pub fn new(config: &Config) -> Self {
        Self::with_executor(config, Arc::new(CrewExecutor::default()))
    }

    pub fn with_executor(config: &Config, executor: Arc<dyn PhaseExecutor>) -> Self {
        let max_concurrent_runs = config.server.max_concurrent_runs.max(1);
        Self {
            executor,
            run_permits: Arc::new(Semaphore::new(max_concurrent_runs)),
            max_concurrent_runs,
            heartbeat: config.relay.heartbeat(),
            report_dir: config.server.report_dir.clone(),
            defaults: config.research.clone(),
            cors_origin: config.server.cors_origin.clone(),
        }
    }

    pub fn executor(&self) -> Arc<dyn PhaseExecutor> {
        self.executor.clone()
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    pub fn report_dir(&self) -> Option<PathBuf> {
        self.report_dir.clone()
    }

    pub fn defaults(&self) -> &QualityControl {
        &self.defaults
    }

    pub fn cors_origin(&self) -> &str {
        &self.cors_origin
    }

    /// Reserve a run slot; the slot frees when the permit drops.
    pub fn try_acquire_run(&self) -> Result<OwnedSemaphorePermit, AppError> {
        match self.run_permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => Err(AppError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "research capacity reached; retry once a slot frees up",
            )),
            Err(TryAcquireError::Closed) => Err(AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "research executor unavailable",
            )),
        }
    }

    pub fn capacity(&self) -> Capacity {
        let available = self.run_permits.available_permits();
        Capacity {
            max_concurrent_runs: self.max_concurrent_runs,
            available_permits: available,
            running: self.max_concurrent_runs.saturating_sub(available),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn capacity_limit_returns_429() {
        let mut config = Config::default();
        config.server.max_concurrent_runs = 1;
        let state = AppState::new(&config);

        let permit = state.try_acquire_run().expect("first permit should succeed");
        assert_eq!(state.capacity().running, 1);

        let err = state.try_acquire_run().expect_err("second permit should fail");
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);

        drop(permit);
        assert_eq!(state.capacity().available_permits, 1);
    }
}
