//! Tier manager: routing, local/remote fallback, and bounded escalation.
//!
//! Per request the manager walks a small state machine:
//!
//! ```text
//! ROUTE -> TRY_LOCAL -> TRY_REMOTE -> (ESCALATE -> TRY_LOCAL)* -> DONE | FAILED
//! ```
//!
//! Backends are always tried in the fixed order local, then remote. Escalation
//! strictly increases the tier and is bounded by `max_escalations`; a request
//! whose backends all fail ends immediately with an error [`Response`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

use super::backend::{Backend, BackendKind};
use super::config::ManagerConfig;
use super::health::{HealthCache, HealthStatus};
use super::router::{EscalationReason, RouteDecision, Router, RouterConfig, TaskType};
use super::types::{ChatMessage, GenerationParams, Response, Tier};

/// Per-request options for [`Manager::generate`].
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub task_type: Option<TaskType>,
    pub forced_tier: Option<Tier>,
    pub auto_escalate: bool,
    pub max_escalations: u32,
    pub params: GenerationParams,
    /// Cancelling the token fails the in-flight backend call
    pub cancel: Option<CancellationToken>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            task_type: None,
            forced_tier: None,
            auto_escalate: true,
            max_escalations: 2,
            params: GenerationParams::default(),
            cancel: None,
        }
    }
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_forced_tier(mut self, tier: Tier) -> Self {
        self.forced_tier = Some(tier);
        self
    }

    pub fn with_auto_escalate(mut self, enabled: bool) -> Self {
        self.auto_escalate = enabled;
        self
    }

    pub fn with_max_escalations(mut self, max: u32) -> Self {
        self.max_escalations = max;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Aggregate manager statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub fallbacks: u64,
    /// Sum of escalation steps across all requests
    pub escalations: u64,
    pub by_tier: HashMap<Tier, u64>,
    pub by_provider: HashMap<String, u64>,
    pub total_latency_ms: u64,
    pub total_tokens: u64,
}

impl ManagerStats {
    fn record_success(&mut self, response: &Response, tier: Tier) {
        self.total_requests += 1;
        self.successful += 1;
        if response.is_fallback {
            self.fallbacks += 1;
        }
        self.escalations += u64::from(response.escalations);
        *self.by_tier.entry(tier).or_default() += 1;
        *self.by_provider.entry(response.provider.clone()).or_default() += 1;
        self.total_latency_ms += response.latency_ms;
        self.total_tokens += response.usage.total_tokens;
    }

    fn record_failure(&mut self, escalations: u32) {
        self.total_requests += 1;
        self.failed += 1;
        self.escalations += u64::from(escalations);
    }

    /// Mean latency over successful requests.
    pub fn average_latency_ms(&self) -> f64 {
        if self.successful == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.successful as f64
        }
    }

    pub fn fallback_rate(&self) -> f64 {
        if self.successful == 0 {
            0.0
        } else {
            self.fallbacks as f64 / self.successful as f64
        }
    }
}

/// Builder for [`Manager`].
pub struct ManagerBuilder {
    config: ManagerConfig,
    router_config: RouterConfig,
    local: Option<Arc<dyn Backend>>,
    remote: Option<Arc<dyn Backend>>,
}

impl ManagerBuilder {
    pub fn router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    pub fn local(mut self, backend: Arc<dyn Backend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn remote(mut self, backend: Arc<dyn Backend>) -> Self {
        self.remote = Some(backend);
        self
    }

    /// Validate configuration and build the manager.
    pub fn build(self) -> Result<Manager> {
        self.config.validate()?;

        let local_usable = self.config.prefer_local && self.local.is_some();
        let remote_usable = self.config.enable_fallback && self.remote.is_some();
        if !local_usable && !remote_usable {
            return Err(Error::config(
                "no usable backend: configure a local backend with prefer_local or a remote backend with fallback enabled",
            ));
        }

        let router = Router::new(self.router_config, self.config.tiers.clone())?;
        let low_confidence = self
            .config
            .low_confidence_phrases
            .iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Manager {
            health: HealthCache::new(self.config.health_ttl()),
            config: self.config,
            router,
            local: self.local,
            remote: self.remote,
            low_confidence,
            stats: RwLock::new(ManagerStats::default()),
        })
    }
}

/// Orchestrates routing, backend fallback, and escalation.
pub struct Manager {
    config: ManagerConfig,
    router: Router,
    local: Option<Arc<dyn Backend>>,
    remote: Option<Arc<dyn Backend>>,
    health: HealthCache,
    low_confidence: Vec<String>,
    stats: RwLock<ManagerStats>,
}

impl Manager {
    pub fn builder(config: ManagerConfig) -> ManagerBuilder {
        ManagerBuilder {
            config,
            router_config: RouterConfig::default(),
            local: None,
            remote: None,
        }
    }

    /// Generate a response, escalating tiers on weak output.
    ///
    /// Never returns an error: when every backend fails the response has
    /// `provider == "none"`, empty content, and `error` set.
    #[instrument(
        skip(self, messages, options),
        fields(messages = messages.len(), route_id = tracing::field::Empty)
    )]
    pub async fn generate(&self, messages: &[ChatMessage], options: GenerateOptions) -> Response {
        let started = Instant::now();
        let route = self
            .router
            .route(messages, options.task_type, options.forced_tier);
        tracing::Span::current().record("route_id", tracing::field::display(route.id));
        let mut tier = route.tier;
        let mut escalations: u32 = 0;

        loop {
            let mut response = match self.try_backends(messages, tier, &options).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(tier = %tier, escalations, "request failed: {}", err);
                    self.stats.write().await.record_failure(escalations);
                    let mut failed = Response::terminal_failure(
                        err.to_string(),
                        tier,
                        started.elapsed().as_millis() as u64,
                    );
                    failed.escalations = escalations;
                    return failed;
                }
            };

            if options.auto_escalate && escalations < options.max_escalations {
                if let Some(reason) = self.should_escalate(&response, tier) {
                    if let Some(next) = tier.next() {
                        info!(from = %tier, to = %next, reason = %reason, "escalating");
                        tier = next;
                        escalations += 1;
                        continue;
                    }
                }
            }

            response.tier = Some(tier);
            response.escalations = escalations;
            self.stats.write().await.record_success(&response, tier);
            debug!(
                tier = %tier,
                provider = %response.provider,
                fallback = response.is_fallback,
                latency_ms = response.latency_ms,
                "request complete"
            );
            return response;
        }
    }

    /// Re-run a request with the quality gate's improvement hints appended.
    pub async fn generate_with_feedback(
        &self,
        messages: &[ChatMessage],
        hints: &[String],
        options: GenerateOptions,
    ) -> Response {
        let mut revised = messages.to_vec();
        if !hints.is_empty() {
            revised.push(feedback_message(hints));
        }
        self.generate(&revised, options).await
    }

    /// Route without generating.
    pub fn route(
        &self,
        messages: &[ChatMessage],
        task_type: Option<TaskType>,
        forced_tier: Option<Tier>,
    ) -> RouteDecision {
        self.router.route(messages, task_type, forced_tier)
    }

    /// Whether a response should be retried one tier up.
    pub fn should_escalate(&self, response: &Response, tier: Tier) -> Option<EscalationReason> {
        if response.is_error() {
            return Some(EscalationReason::BackendError);
        }
        let content = response.content.to_lowercase();
        if self.low_confidence.iter().any(|p| content.contains(p.as_str())) {
            return Some(EscalationReason::LowConfidence);
        }
        if tier.is_lowest() && content.contains('?') {
            return Some(EscalationReason::LowConfidence);
        }
        None
    }

    async fn try_backends(
        &self,
        messages: &[ChatMessage],
        tier: Tier,
        options: &GenerateOptions,
    ) -> Result<Response> {
        let params = self.resolve_params(tier, &options.params);
        let mut failures = Vec::new();

        if self.config.prefer_local {
            if let Some(local) = &self.local {
                if self.health.is_healthy(BackendKind::Local, local.as_ref()).await {
                    match self
                        .call(BackendKind::Local, local.as_ref(), messages, tier, &params, options)
                        .await
                    {
                        Ok(response) => return Ok(response),
                        Err(err) => {
                            warn!(tier = %tier, "local backend failed: {}", err);
                            failures.push(err.to_string());
                        }
                    }
                } else {
                    failures.push("local backend unhealthy".to_string());
                }
            }
        }

        if self.config.enable_fallback {
            if let Some(remote) = &self.remote {
                match self
                    .call(BackendKind::Remote, remote.as_ref(), messages, tier, &params, options)
                    .await
                {
                    Ok(mut response) => {
                        response.is_fallback = true;
                        return Ok(response);
                    }
                    Err(err) => {
                        warn!(tier = %tier, "remote backend failed: {}", err);
                        failures.push(err.to_string());
                    }
                }
            }
        }

        if failures.is_empty() {
            failures.push("no backend configured for this request".to_string());
        }
        Err(Error::TerminalFailure(failures.join("; ")))
    }

    /// One backend call bounded by the configured timeout and the caller's
    /// cancellation token. Error responses are folded into `Err`.
    async fn call(
        &self,
        kind: BackendKind,
        backend: &dyn Backend,
        messages: &[ChatMessage],
        tier: Tier,
        params: &GenerationParams,
        options: &GenerateOptions,
    ) -> Result<Response> {
        let model_id = self.config.tiers.model_for(tier, kind);
        let timeout = match kind {
            BackendKind::Local => self.config.local_timeout(),
            BackendKind::Remote => self.config.remote_timeout(),
        };

        let bounded = bounded_call(backend.generate(messages, model_id, params), timeout);
        let result = match &options.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                result = bounded => result,
            },
            None => bounded.await,
        };

        let response = result.map_err(|err| match err {
            Error::BackendUnavailable { .. } => err,
            err if err.is_backend_failure() => {
                Error::backend_unavailable(kind.as_str(), err.to_string())
            }
            other => other,
        })?;

        match &response.error {
            Some(message) => Err(Error::backend_unavailable(kind.as_str(), message.clone())),
            None => Ok(response),
        }
    }

    fn resolve_params(&self, tier: Tier, requested: &GenerationParams) -> GenerationParams {
        let tier_config = self.config.tiers.get(tier);
        let mut params = requested.clone();
        params.temperature = Some(params.temperature.unwrap_or(tier_config.default_temperature));
        params.max_tokens = Some(
            params
                .max_tokens
                .map_or(tier_config.max_output_tokens, |t| t.min(tier_config.max_output_tokens)),
        );
        params
    }

    /// Probe every configured backend now, ignoring cached freshness.
    pub async fn refresh_health(&self) -> Vec<HealthStatus> {
        let probes = [
            (BackendKind::Local, self.local.as_ref()),
            (BackendKind::Remote, self.remote.as_ref()),
        ];
        for (kind, backend) in probes {
            if backend.is_some() {
                self.health.invalidate(kind).await;
            }
        }
        let checks = probes.into_iter().filter_map(|(kind, backend)| {
            backend.map(|b| async move { self.health.is_healthy(kind, b.as_ref()).await })
        });
        futures::future::join_all(checks).await;
        self.health.snapshot().await
    }

    pub async fn health_snapshot(&self) -> Vec<HealthStatus> {
        self.health.snapshot().await
    }

    pub async fn stats(&self) -> ManagerStats {
        self.stats.read().await.clone()
    }

    pub async fn reset_stats(&self) {
        *self.stats.write().await = ManagerStats::default();
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

async fn bounded_call<F>(call: F, timeout: Duration) -> Result<Response>
where
    F: std::future::Future<Output = Result<Response>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(timeout.as_millis() as u64)),
    }
}

fn feedback_message(hints: &[String]) -> ChatMessage {
    let mut content =
        String::from("Please revise your previous answer and address the following:\n");
    for hint in hints {
        content.push_str("- ");
        content.push_str(hint);
        content.push('\n');
    }
    ChatMessage::user(content.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{TierConfig, TierTable, TokenUsage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    enum Step {
        Reply(&'static str),
        Fail,
        Hang,
    }

    /// Backend that replays a script and records the model ids it was called with.
    struct ScriptedBackend {
        name: &'static str,
        healthy: AtomicBool,
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(name: &'static str, healthy: bool, script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                name,
                healthy: AtomicBool::new(healthy),
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            model_id: &str,
            _params: &GenerationParams,
        ) -> Result<Response> {
            self.calls.lock().push(model_id.to_string());
            let step = self.script.lock().pop_front().unwrap_or(Step::Fail);
            match step {
                Step::Reply(text) => Ok(Response::success(
                    text,
                    model_id,
                    self.name,
                    TokenUsage::new(10, 5),
                    3,
                )),
                Step::Fail => Err(Error::backend_unavailable(self.name, "scripted failure")),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Response::success("late", model_id, self.name, TokenUsage::default(), 0))
                }
            }
        }

        async fn health_check(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn manager(local: Arc<ScriptedBackend>, remote: Arc<ScriptedBackend>) -> Manager {
        Manager::builder(ManagerConfig::default())
            .local(local)
            .remote(remote)
            .build()
            .unwrap()
    }

    fn tier_of(model: &str) -> Tier {
        let table = TierTable::default();
        Tier::ALL
            .into_iter()
            .find(|t| {
                table.model_for(*t, BackendKind::Local) == model
                    || table.model_for(*t, BackendKind::Remote) == model
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_success_no_fallback() {
        let local = ScriptedBackend::new("local", true, vec![Step::Reply("F = ma.")]);
        let remote = ScriptedBackend::new("remote", true, vec![]);
        let manager = manager(local.clone(), remote.clone());

        let response = manager
            .generate(&[ChatMessage::user("calculate the force")], GenerateOptions::new())
            .await;

        assert!(!response.is_error());
        assert_eq!(response.provider, "local");
        assert!(!response.is_fallback);
        assert_eq!(response.tier, Some(Tier::B));
        assert_eq!(local.calls(), vec!["llama3.1:8b".to_string()]);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unhealthy_local_falls_back_to_remote() {
        let local = ScriptedBackend::new("local", false, vec![Step::Reply("unused")]);
        let remote = ScriptedBackend::new("remote", true, vec![Step::Reply("The answer is 9.8 m/s^2.")]);
        let manager = manager(local.clone(), remote.clone());

        let options = GenerateOptions::new().with_forced_tier(Tier::B);
        let response = manager.generate(&[ChatMessage::user("g?")], options).await;

        assert_eq!(response.provider, "remote");
        assert!(response.is_fallback);
        assert!(local.calls().is_empty());
        assert_eq!(remote.calls(), vec!["gpt-4o".to_string()]);
    }

    #[tokio::test]
    async fn test_local_error_is_swallowed() {
        let local = ScriptedBackend::new("local", true, vec![Step::Fail]);
        let remote = ScriptedBackend::new("remote", true, vec![Step::Reply("Done.")]);
        let manager = manager(local, remote);

        let response = manager
            .generate(&[ChatMessage::user("hello")], GenerateOptions::new())
            .await;
        assert!(!response.is_error());
        assert!(response.is_fallback);
    }

    #[tokio::test]
    async fn test_both_backends_fail() {
        let local = ScriptedBackend::new("local", true, vec![Step::Fail]);
        let remote = ScriptedBackend::new("remote", true, vec![Step::Fail]);
        let manager = manager(local.clone(), remote.clone());

        let response = manager
            .generate(&[ChatMessage::user("hello")], GenerateOptions::new())
            .await;

        assert!(response.is_error());
        assert_eq!(response.provider, "none");
        assert!(response.content.is_empty());
        // Terminal failure is never retried inside the manager.
        assert_eq!(local.calls().len(), 1);
        assert_eq!(remote.calls().len(), 1);

        let stats = manager.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.successful, 0);
    }

    #[tokio::test]
    async fn test_low_confidence_escalates_strictly_upward() {
        let local = ScriptedBackend::new(
            "local",
            true,
            vec![
                Step::Reply("I'm not sure about this."),
                Step::Reply("It is unclear."),
                Step::Reply("I don't know."),
            ],
        );
        let remote = ScriptedBackend::new("remote", true, vec![]);
        let manager = manager(local.clone(), remote);

        let options = GenerateOptions::new().with_forced_tier(Tier::A);
        let response = manager.generate(&[ChatMessage::user("hi")], options).await;

        let tiers: Vec<Tier> = local.calls().iter().map(|m| tier_of(m)).collect();
        assert_eq!(tiers, vec![Tier::A, Tier::B, Tier::C]);
        // Escalation budget is spent, so the last response is returned as-is.
        assert_eq!(response.content, "I don't know.");
        assert_eq!(response.escalations, 2);
        assert_eq!(response.tier, Some(Tier::C));
    }

    #[tokio::test]
    async fn test_escalation_bounded_by_max() {
        let local = ScriptedBackend::new(
            "local",
            true,
            vec![Step::Reply("I'm not sure."), Step::Reply("I'm not sure.")],
        );
        let remote = ScriptedBackend::new("remote", true, vec![]);
        let manager = manager(local.clone(), remote);

        let options = GenerateOptions::new()
            .with_forced_tier(Tier::A)
            .with_max_escalations(1);
        let response = manager.generate(&[ChatMessage::user("hi")], options).await;

        assert_eq!(local.calls().len(), 2);
        assert_eq!(response.tier, Some(Tier::B));
    }

    #[test]
    fn test_truncated_response_is_not_an_escalation_signal() {
        let manager = manager(
            ScriptedBackend::new("local", true, vec![]),
            ScriptedBackend::new("remote", true, vec![]),
        );
        let truncated = Response::success("The answer is 42", "m", "local", TokenUsage::new(5, 5), 1)
            .with_finish_reason(crate::llm::FinishReason::Length);

        assert_eq!(manager.should_escalate(&truncated, Tier::A), None);
        assert_eq!(
            manager.should_escalate(&Response::terminal_failure("down", Tier::A, 1), Tier::A),
            Some(EscalationReason::BackendError)
        );
    }

    #[tokio::test]
    async fn test_question_mark_only_escalates_from_lowest_tier() {
        let local = ScriptedBackend::new(
            "local",
            true,
            vec![Step::Reply("Did you mean SI units?"), Step::Reply("Did you mean SI units?")],
        );
        let remote = ScriptedBackend::new("remote", true, vec![]);
        let manager = manager(local.clone(), remote);

        let options = GenerateOptions::new().with_forced_tier(Tier::A);
        let response = manager.generate(&[ChatMessage::user("hi")], options).await;

        assert_eq!(local.calls().len(), 2);
        assert_eq!(response.tier, Some(Tier::B));
    }

    #[tokio::test]
    async fn test_auto_escalate_disabled() {
        let local = ScriptedBackend::new("local", true, vec![Step::Reply("I'm not sure.")]);
        let remote = ScriptedBackend::new("remote", true, vec![]);
        let manager = manager(local.clone(), remote);

        let options = GenerateOptions::new()
            .with_forced_tier(Tier::A)
            .with_auto_escalate(false);
        let response = manager.generate(&[ChatMessage::user("hi")], options).await;

        assert_eq!(local.calls().len(), 1);
        assert_eq!(response.escalations, 0);
    }

    #[tokio::test]
    async fn test_tier_c_does_not_escalate() {
        let local = ScriptedBackend::new("local", true, vec![Step::Reply("I'm not sure.")]);
        let remote = ScriptedBackend::new("remote", true, vec![]);
        let manager = manager(local.clone(), remote);

        let options = GenerateOptions::new().with_forced_tier(Tier::C);
        let response = manager.generate(&[ChatMessage::user("hi")], options).await;
        assert_eq!(local.calls().len(), 1);
        assert_eq!(response.tier, Some(Tier::C));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_fallback() {
        let local = ScriptedBackend::new("local", true, vec![Step::Hang]);
        let remote = ScriptedBackend::new("remote", true, vec![Step::Reply("Remote answer.")]);
        let manager = manager(local, remote);

        let response = manager
            .generate(&[ChatMessage::user("hello")], GenerateOptions::new())
            .await;
        assert_eq!(response.provider, "remote");
        assert!(response.is_fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_fails_without_hanging() {
        let local = ScriptedBackend::new("local", true, vec![Step::Hang]);
        let remote = ScriptedBackend::new("remote", true, vec![Step::Hang]);
        let manager = manager(local, remote);

        let token = CancellationToken::new();
        token.cancel();
        let options = GenerateOptions::new().with_cancellation(token);
        let response = manager.generate(&[ChatMessage::user("hello")], options).await;

        assert!(response.is_error());
        assert!(response.error.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_stats_recorded() {
        let local = ScriptedBackend::new(
            "local",
            true,
            vec![Step::Reply("I'm not sure."), Step::Reply("Fine.")],
        );
        let remote = ScriptedBackend::new("remote", true, vec![Step::Reply("Remote.")]);
        let manager = manager(local.clone(), remote);

        manager
            .generate(&[ChatMessage::user("hi")], GenerateOptions::new().with_forced_tier(Tier::A))
            .await;
        local.healthy.store(false, Ordering::SeqCst);
        manager.refresh_health().await;
        manager
            .generate(&[ChatMessage::user("hi")], GenerateOptions::new().with_forced_tier(Tier::C))
            .await;

        let stats = manager.stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.escalations, 1);
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.by_tier.get(&Tier::B), Some(&1));
        assert_eq!(stats.by_provider.get("remote"), Some(&1));
        assert_eq!(stats.total_tokens, 30);
        assert!((stats.fallback_rate() - 0.5).abs() < f64::EPSILON);

        manager.reset_stats().await;
        assert_eq!(manager.stats().await, ManagerStats::default());
    }

    #[tokio::test]
    async fn test_generate_with_feedback_appends_hints() {
        struct Echo;

        #[async_trait]
        impl Backend for Echo {
            async fn generate(
                &self,
                messages: &[ChatMessage],
                model_id: &str,
                _params: &GenerationParams,
            ) -> Result<Response> {
                let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
                Ok(Response::success(last, model_id, "local", TokenUsage::default(), 1))
            }

            async fn health_check(&self) -> bool {
                true
            }
        }

        let manager = Manager::builder(ManagerConfig::default().with_fallback(false))
            .local(Arc::new(Echo))
            .build()
            .unwrap();

        let hints = vec!["State your assumptions.".to_string()];
        let response = manager
            .generate_with_feedback(
                &[ChatMessage::user("derive it")],
                &hints,
                GenerateOptions::new().with_auto_escalate(false),
            )
            .await;
        assert!(response.content.starts_with("Please revise"));
        assert!(response.content.contains("- State your assumptions."));
    }

    #[test]
    fn test_builder_requires_usable_backend() {
        let result = Manager::builder(ManagerConfig::default()).build();
        assert!(matches!(result, Err(Error::Config(_))));

        let remote = ScriptedBackend::new("remote", true, vec![]);
        let result = Manager::builder(ManagerConfig::default().with_fallback(false))
            .remote(remote)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_params_caps_output() {
        let local = ScriptedBackend::new("local", true, vec![]);
        let remote = ScriptedBackend::new("remote", true, vec![]);
        let mut tiers: HashMap<Tier, TierConfig> = TierTable::default().into();
        tiers.insert(
            Tier::A,
            TierConfig::new("small", "small-remote")
                .with_max_output_tokens(100)
                .with_default_temperature(0.1),
        );
        let manager = Manager::builder(
            ManagerConfig::default().with_tiers(TierTable::new(tiers).unwrap()),
        )
        .local(local)
        .remote(remote)
        .build()
        .unwrap();

        let params = manager.resolve_params(Tier::A, &GenerationParams::new().with_max_tokens(500));
        assert_eq!(params.max_tokens, Some(100));
        assert_eq!(params.temperature, Some(0.1));
    }
}
