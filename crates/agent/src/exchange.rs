//! Exchange runner: one producer task, one consumer task, one deadline.
//!
//! The turn controller runs in its own task under `exchange.timeout_secs`
//! and owns the notification sender, so the delivery pipeline (the consumer
//! task) sees the channel close on every exit path: success, error, timeout
//! or panic.

use std::sync::Arc;
use std::time::Duration;
use streamrelay_channels::{DeliveryPipeline, DeliverySettings};
use streamrelay_config::DeliveryConfig;
use streamrelay_core::channel::{ChatTarget, MessagingEndpoint};
use streamrelay_core::delivery;
use streamrelay_core::error::{Error, Result};
use streamrelay_core::metrics::MetricsSink;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::controller::{ExchangeOutcome, ExchangeRequest, TurnController};

/// Pipeline settings from the `[delivery]` section.
pub fn delivery_settings(config: &DeliveryConfig) -> DeliverySettings {
    DeliverySettings {
        thinking_text: config.thinking_text.clone().filter(|t| !t.is_empty()),
        fallback_text: config.fallback_text.clone(),
        formatted: config.formatted,
    }
}

/// Marks an exchange as in flight until dropped.
pub struct ExchangeGuard {
    metrics: Arc<dyn MetricsSink>,
    user_id: String,
    started: Instant,
}

impl ExchangeGuard {
    pub fn new(metrics: Arc<dyn MetricsSink>, user_id: &str) -> Self {
        metrics.exchange_active(1);
        Self {
            metrics,
            user_id: user_id.to_string(),
            started: Instant::now(),
        }
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.metrics.exchange_active(-1);
        debug!(
            user_id = %self.user_id,
            elapsed_secs = self.started.elapsed().as_secs_f64(),
            "Exchange cleaned up"
        );
    }
}

/// Runs exchanges against one messaging endpoint.
pub struct ExchangeRunner {
    controller: TurnController,
    endpoint: Arc<dyn MessagingEndpoint>,
    settings: DeliverySettings,
    timeout: Duration,
}

impl ExchangeRunner {
    pub fn new(controller: TurnController, endpoint: Arc<dyn MessagingEndpoint>) -> Self {
        let settings = delivery_settings(&controller.config().delivery);
        let timeout = controller.config().exchange.timeout();
        Self {
            controller,
            endpoint,
            settings,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    /// Run one exchange, delivering partial answers to `target`.
    ///
    /// Returns once both the controller and the pipeline are done.
    pub async fn run(&self, target: ChatTarget, request: ExchangeRequest) -> Result<ExchangeOutcome> {
        let user_id = request.user_id.clone();
        let _guard = ExchangeGuard::new(self.controller.metrics(), &user_id);

        let (sender, receiver) = delivery::channel();
        let pipeline = DeliveryPipeline::new(Arc::clone(&self.endpoint), target, self.settings.clone());
        let consumer = tokio::spawn(pipeline.run(receiver));

        let controller = self.controller.clone();
        let timeout = self.timeout;
        let producer = tokio::spawn(async move {
            match tokio::time::timeout(timeout, controller.run(&request, sender)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    secs: timeout.as_secs(),
                }),
            }
        });

        let result = match producer.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!(user_id = %user_id, "Exchange task panicked");
                Err(Error::Internal("exchange task panicked".into()))
            }
            Err(e) => Err(Error::Internal(format!("exchange task failed: {e}"))),
        };

        match consumer.await {
            Ok(report) => debug!(
                user_id = %user_id,
                created = report.created,
                edited = report.edited,
                dropped = report.dropped,
                "Delivery finished"
            ),
            Err(e) if e.is_panic() => error!(user_id = %user_id, "Delivery task panicked"),
            Err(e) => warn!(user_id = %user_id, error = %e, "Delivery task failed"),
        }

        if let Err(e) = &result {
            warn!(user_id = %user_id, error = %e, "Exchange failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use streamrelay_config::AppConfig;
    use streamrelay_core::channel::MessageId;
    use streamrelay_core::error::ProviderError;
    use streamrelay_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamEvent};
    use tokio::sync::mpsc;

    /// Streams that never end: the sending halves are kept alive.
    #[derive(Default)]
    struct StalledProvider {
        held: Mutex<Vec<mpsc::Sender<StreamEvent>>>,
    }

    #[async_trait]
    impl Provider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn complete_turn(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("stalled".into()))
        }

        async fn stream_turn(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<mpsc::Receiver<StreamEvent>, ProviderError> {
            let (tx, rx) = mpsc::channel(1);
            self.held.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    struct PanickingProvider;

    #[async_trait]
    impl Provider for PanickingProvider {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn complete_turn(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            panic!("provider blew up");
        }

        async fn stream_turn(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<mpsc::Receiver<StreamEvent>, ProviderError> {
            panic!("provider blew up");
        }
    }

    fn runner(
        provider: Arc<dyn Provider>,
        config: AppConfig,
    ) -> (ExchangeRunner, Arc<RecordingEndpoint>, Arc<RecordingMetrics>) {
        let store = Arc::new(RecordingStore::default());
        let metrics = Arc::new(RecordingMetrics::default());
        let endpoint = Arc::new(RecordingEndpoint::default());
        let controller = TurnController::new(
            provider,
            Arc::new(MockTools::new()),
            store.clone(),
            store,
            Arc::new(config),
        )
        .with_metrics(metrics.clone());
        (ExchangeRunner::new(controller, endpoint.clone()), endpoint, metrics)
    }

    fn no_placeholder() -> AppConfig {
        let mut config = AppConfig::default();
        config.delivery.thinking_text = None;
        config
    }

    #[tokio::test]
    async fn answer_reaches_the_endpoint() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            text("4"),
            usage(5),
            StreamEvent::End,
        ]]));
        let (runner, endpoint, metrics) = runner(provider, no_placeholder());

        let outcome = runner
            .run(ChatTarget::new(7, Some(MessageId(3))), ExchangeRequest::new("42", "What is 2+2?"))
            .await
            .unwrap();

        assert_eq!(outcome.answer, "4");
        assert_eq!(endpoint.sent(), vec![Sent::Create("4".into())]);
        assert_eq!(metrics.active.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn placeholder_is_edited_with_the_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![text("4"), StreamEvent::End]]));
        let (runner, endpoint, _) = runner(provider, AppConfig::default());

        runner
            .run(ChatTarget::new(7, None), ExchangeRequest::new("42", "q"))
            .await
            .unwrap();

        let sent = endpoint.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::Create(_)));
        assert_eq!(sent[1], Sent::Edit(MessageId(1), "4".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_yields_timeout_and_fallback() {
        let (runner, endpoint, metrics) = runner(Arc::new(StalledProvider::default()), no_placeholder());
        let runner = runner.with_timeout(Duration::from_secs(300));

        let err = runner
            .run(ChatTarget::new(7, None), ExchangeRequest::new("42", "q"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { secs: 300 }));
        assert_eq!(
            endpoint.sent(),
            vec![Sent::Create("get nothing from the model!".into())]
        );
        assert_eq!(metrics.active.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn panic_is_recovered_at_the_join_point() {
        let (runner, endpoint, metrics) = runner(Arc::new(PanickingProvider), no_placeholder());

        let err = runner
            .run(ChatTarget::new(7, None), ExchangeRequest::new("42", "q"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(
            endpoint.sent(),
            vec![Sent::Create("get nothing from the model!".into())]
        );
        assert_eq!(metrics.active.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn loop_budget_error_propagates() {
        let mut config = no_placeholder();
        config.exchange.max_loop_depth = 2;
        let provider = Arc::new(ScriptedProvider::forever(vec![
            call(0, "c", "lookup", "{}"),
            StreamEvent::End,
        ]));
        let store = Arc::new(RecordingStore::default());
        let endpoint = Arc::new(RecordingEndpoint::default());
        let controller = TurnController::new(
            provider.clone(),
            Arc::new(MockTools::new().answering("lookup", "again")),
            store.clone(),
            store.clone(),
            Arc::new(config),
        );
        let runner = ExchangeRunner::new(controller, endpoint.clone());

        let err = runner
            .run(ChatTarget::new(7, None), ExchangeRequest::new("42", "q"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TooManyLoops { max_depth: 2 }));
        assert_eq!(provider.call_count(), 2);
        assert!(store.inserted().is_empty());
        assert_eq!(endpoint.sent().len(), 1);
    }

    #[test]
    fn settings_follow_delivery_config() {
        let mut config = DeliveryConfig::default();
        config.thinking_text = Some(String::new());
        config.formatted = false;
        let settings = delivery_settings(&config);
        assert!(settings.thinking_text.is_none());
        assert!(!settings.formatted);
        assert_eq!(settings.fallback_text, config.fallback_text);
    }

    #[test]
    fn guard_tracks_active_exchanges() {
        let metrics = Arc::new(RecordingMetrics::default());
        {
            let _a = ExchangeGuard::new(metrics.clone(), "1");
            let _b = ExchangeGuard::new(metrics.clone(), "2");
            assert_eq!(metrics.active.load(Ordering::Relaxed), 2);
        }
        assert_eq!(metrics.active.load(Ordering::Relaxed), 0);
    }
}
