//! Timeout boundary around a notification gateway.
//!
//! The engine defines no internal timeouts; callers that need bounded gateway
//! calls wrap the gateway here. An expired call maps to `GatewayError::Timeout`
//! and is never retried.

use crate::config::GatewayConfig;
use crate::gateway::{
    AuthorizationStatus, GatewayError, GatewayResult, NotificationGateway, PresentationOptions,
    Registration, RegistrationOutcome, RegistrationRequest,
};
use crate::model::reminder::ReminderId;
use async_trait::async_trait;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Bounds `gateway` by `config.timeout_ms`; unset leaves calls unbounded.
pub fn with_configured_timeout<G: NotificationGateway + 'static>(
    gateway: G,
    config: &GatewayConfig,
) -> Arc<dyn NotificationGateway> {
    match config.timeout() {
        Some(timeout) => {
            debug!(
                "event=gateway_timeout module=gateway.timeout status=ok timeout_ms={}",
                timeout.as_millis()
            );
            Arc::new(TimeoutGateway::new(gateway, timeout))
        }
        None => Arc::new(gateway),
    }
}

/// Gateway wrapper bounding every async call by `timeout`.
#[derive(Debug)]
pub struct TimeoutGateway<G> {
    inner: G,
    timeout: Duration,
}

impl<G: NotificationGateway> TimeoutGateway<G> {
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn bounded<T: Send>(
        &self,
        operation: &'static str,
        call: impl Future<Output = GatewayResult<T>> + Send,
    ) -> GatewayResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "event=gateway_call module=gateway.timeout status=error operation={} timeout_ms={}",
                    operation,
                    self.timeout.as_millis()
                );
                Err(GatewayError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl<G: NotificationGateway> NotificationGateway for TimeoutGateway<G> {
    async fn request_authorization(&self) -> GatewayResult<AuthorizationStatus> {
        self.bounded("request_authorization", self.inner.request_authorization())
            .await
    }

    async fn register(&self, request: RegistrationRequest) -> GatewayResult<RegistrationOutcome> {
        self.bounded("register", self.inner.register(request)).await
    }

    async fn unregister(&self, id: ReminderId) -> GatewayResult<()> {
        self.bounded("unregister", self.inner.unregister(id)).await
    }

    async fn list_registrations(&self) -> GatewayResult<Vec<Registration>> {
        self.bounded("list_registrations", self.inner.list_registrations())
            .await
    }

    fn will_present_while_foreground(&self) -> PresentationOptions {
        self.inner.will_present_while_foreground()
    }
}

#[cfg(test)]
mod tests {
    use super::{with_configured_timeout, TimeoutGateway};
    use crate::config::GatewayConfig;
    use crate::gateway::{
        AuthorizationStatus, GatewayError, GatewayResult, NotificationGateway, Registration,
        RegistrationOutcome, RegistrationRequest,
    };
    use crate::model::reminder::ReminderId;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Gateway whose calls never complete.
    struct StalledGateway;

    #[async_trait]
    impl NotificationGateway for StalledGateway {
        async fn request_authorization(&self) -> GatewayResult<AuthorizationStatus> {
            std::future::pending().await
        }

        async fn register(
            &self,
            _request: RegistrationRequest,
        ) -> GatewayResult<RegistrationOutcome> {
            std::future::pending().await
        }

        async fn unregister(&self, _id: ReminderId) -> GatewayResult<()> {
            std::future::pending().await
        }

        async fn list_registrations(&self) -> GatewayResult<Vec<Registration>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_maps_to_timeout() {
        let gateway = TimeoutGateway::new(StalledGateway, Duration::from_millis(50));
        let err = gateway
            .unregister(uuid::Uuid::new_v4())
            .await
            .expect_err("stalled call must time out");
        assert_eq!(err, GatewayError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_call_passes_through() {
        let gateway = TimeoutGateway::new(StalledGateway, Duration::from_millis(50));
        let registrations = gateway.list_registrations().await.expect("list");
        assert!(registrations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_timeout_bounds_every_call() {
        let config = GatewayConfig {
            timeout_ms: Some(80),
            ..GatewayConfig::default()
        };
        let gateway = with_configured_timeout(StalledGateway, &config);
        let err = gateway
            .request_authorization()
            .await
            .expect_err("stalled call must time out");
        assert_eq!(err, GatewayError::Timeout(Duration::from_millis(80)));
    }

    #[tokio::test(start_paused = true)]
    async fn unset_timeout_leaves_calls_unbounded() {
        let gateway = with_configured_timeout(StalledGateway, &GatewayConfig::default());
        let call = gateway.unregister(uuid::Uuid::new_v4());
        let outcome = tokio::time::timeout(Duration::from_secs(3600), call).await;
        assert!(outcome.is_err(), "call must still be pending");
    }
}
