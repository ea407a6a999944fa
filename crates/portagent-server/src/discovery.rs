//! Service-discovery collaborator interface.
//!
//! Deployments register each listening port with a local discovery agent
//! and refresh a TTL check from the heartbeat. That collaborator lives
//! outside this daemon; the agent only consumes this interface, and ships
//! with a no-op implementation.

/// Liveness registration consumed by the agent.
pub trait ServiceRegistry: Send + Sync {
    /// Announce a service id listening on `port`, checked every `ttl_secs`.
    fn register(&self, service_id: &str, port: u16, ttl_secs: u32);

    /// Refresh the TTL check for a previously registered service id.
    fn pass(&self, service_id: &str);
}

/// Registry that records nothing; the default for standalone use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistry;

impl ServiceRegistry for NoopRegistry {
    fn register(&self, service_id: &str, port: u16, ttl_secs: u32) {
        tracing::debug!(service_id, port, ttl_secs, "service registration skipped");
    }

    fn pass(&self, _service_id: &str) {}
}
