//! The set of service mocks used by one test run.

use super::definition::Definition;
use super::error::{ServerError, ServiceError};
use super::service::ServiceMock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const ROLLBACK_DEADLINE: Duration = Duration::from_secs(1);

/// Service mocks keyed by service name.
#[derive(Debug, Default)]
pub struct Mocks {
    mocks: HashMap<String, Arc<ServiceMock>>,
}

impl Mocks {
    pub fn new(mocks: impl IntoIterator<Item = ServiceMock>) -> Self {
        Self {
            mocks: mocks
                .into_iter()
                .map(|m| (m.name().to_string(), Arc::new(m)))
                .collect(),
        }
    }

    /// One mock per name, each answering every request with 204.
    pub fn new_nop<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            names
                .into_iter()
                .map(|name| ServiceMock::new(name.as_ref(), Definition::nop())),
        )
    }

    pub fn service(&self, name: &str) -> Option<&Arc<ServiceMock>> {
        self.mocks.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<ServiceMock>> {
        self.mocks.values()
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }

    /// Start every listener. If one fails, those already started are stopped
    /// before the error is returned.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut started = Vec::new();
        for mock in self.mocks.values() {
            match mock.start().await {
                Ok(_) => started.push(mock),
                Err(e) => {
                    for mock in started {
                        if let Err(stop_err) = mock.shutdown(ROLLBACK_DEADLINE).await {
                            warn!("Failed to stop mock {}: {}", mock.name(), stop_err);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Stop every running listener, waiting up to `deadline` for each.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        let mut errors = Vec::new();
        for mock in self.mocks.values().filter(|m| m.is_running()) {
            if let Err(e) = mock.shutdown(deadline).await {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServerError::Multiple(errors))
        }
    }

    pub fn reset_definitions(&self) {
        self.mocks.values().for_each(|m| m.reset_definition());
    }

    pub fn reset_running_context(&self) {
        self.mocks.values().for_each(|m| m.reset_running_context());
    }

    pub fn end_running_context(&self) -> Vec<ServiceError> {
        self.mocks
            .values()
            .flat_map(|m| m.end_running_context())
            .collect()
    }
}
