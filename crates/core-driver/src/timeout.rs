//! Deadline decorator for driver calls
//!
//! A replication engine that stops answering must not pin a flow in
//! `InProgress` forever; wrapping the driver turns an overdue call into
//! [`DriverError::Timeout`], which callers treat like any transient failure.

use crate::{DriverError, RecreateRequest, ReplicationDriver, ReplicationRequest, Result};
use async_trait::async_trait;
use drlogic_core_registry::ArtifactRef;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct TimedDriver {
    inner: Arc<dyn ReplicationDriver>,
    /// Deadline for replicate and recreate calls
    action_timeout: Duration,
    /// Deadline for listing and deletion
    catalogue_timeout: Duration,
}

impl TimedDriver {
    pub fn new(inner: Arc<dyn ReplicationDriver>, action_timeout: Duration) -> Self {
        Self {
            inner,
            action_timeout,
            catalogue_timeout: action_timeout,
        }
    }

    pub fn with_catalogue_timeout(mut self, timeout: Duration) -> Self {
        self.catalogue_timeout = timeout;
        self
    }

    async fn bounded<T>(
        limit: Duration,
        call: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| DriverError::Timeout(limit))?
    }
}

#[async_trait]
impl ReplicationDriver for TimedDriver {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn replicate(&self, request: &ReplicationRequest) -> Result<ArtifactRef> {
        Self::bounded(self.action_timeout, self.inner.replicate(request)).await
    }

    async fn list_artifacts(&self, entity_id: &str) -> Result<Vec<ArtifactRef>> {
        Self::bounded(self.catalogue_timeout, self.inner.list_artifacts(entity_id)).await
    }

    async fn delete_artifact(&self, artifact: &ArtifactRef) -> Result<()> {
        Self::bounded(self.catalogue_timeout, self.inner.delete_artifact(artifact)).await
    }

    async fn recreate(&self, request: &RecreateRequest) -> Result<String> {
        Self::bounded(self.action_timeout, self.inner.recreate(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockDriver;
    use drlogic_core_registry::{Bandwidth, EntityKind};

    fn request() -> ReplicationRequest {
        ReplicationRequest {
            entity_id: "vm-1".into(),
            kind: EntityKind::Instance,
            site_id: "site-a".into(),
            action: "image_copy".into(),
            bandwidth: Bandwidth(50),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let slow = MockDriver::new().with_delay(Duration::from_secs(60));
        let driver = TimedDriver::new(Arc::new(slow), Duration::from_secs(5));

        let err = driver.replicate(&request()).await.unwrap_err();
        assert_eq!(err, DriverError::Timeout(Duration::from_secs(5)));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let fast = MockDriver::new().with_delay(Duration::from_millis(10));
        let driver = TimedDriver::new(Arc::new(fast.clone()), Duration::from_secs(5));

        let artifact = driver.replicate(&request()).await.unwrap();
        assert_eq!(fast.artifacts("vm-1"), vec![artifact]);
        assert_eq!(driver.name(), "mock");
    }
}
