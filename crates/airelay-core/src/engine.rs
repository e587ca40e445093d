use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use airelay_common::{RelayConfig, RelayMode};
use airelay_protocol::{Dialect, RequestContext, SseParser, TokenUsage, UsageAccumulator};
use airelay_provider::{
    candidate_order, filter_providers, BlacklistStore, ChatProvider, Platform, ProviderRegistry,
    RoundRobinState,
};
use airelay_storage::{enqueue_request_log, RequestLogInsert};

use crate::client::{UpstreamBody, UpstreamClient, UpstreamResponse};
use crate::error::UpstreamFailure;
use crate::outbound::{
    build_chat_request, build_gemini_request, build_models_request, dialect_for,
};

const ERROR_EXCERPT_LIMIT: usize = 2048;
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// What the router writes back to the client: either a proxied upstream
/// response or an engine-built JSON error, in the same shape.
pub struct RelayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

impl RelayResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "application/json; charset=utf-8".to_string(),
            )],
            body: UpstreamBody::Bytes(Bytes::from(body.to_string())),
        }
    }
}

/// One prepared upstream attempt plan: the provider's name for bookkeeping
/// plus the request to dispatch.
struct AttemptTarget {
    provider: String,
    request: crate::client::OutboundRequest,
}

#[derive(Default)]
struct RetryContext {
    total_attempts: u32,
    last_provider: String,
    last_error: Option<UpstreamFailure>,
}

impl RetryContext {
    fn record(&mut self, provider: &str, error: UpstreamFailure) {
        self.total_attempts += 1;
        self.last_provider = provider.to_string();
        self.last_error = Some(error);
    }

    fn record_success(&mut self, provider: &str) {
        self.total_attempts += 1;
        self.last_provider = provider.to_string();
    }
}

/// The relay engine: selection, failover, forwarding, logging.
pub struct RelayEngine {
    config: RelayConfig,
    registry: Arc<ProviderRegistry>,
    blacklist: Arc<BlacklistStore>,
    round_robin: Arc<RoundRobinState>,
    client: Arc<dyn UpstreamClient>,
    log_tx: mpsc::Sender<RequestLogInsert>,
}

impl RelayEngine {
    pub fn new(
        config: RelayConfig,
        registry: Arc<ProviderRegistry>,
        client: Arc<dyn UpstreamClient>,
        log_tx: mpsc::Sender<RequestLogInsert>,
    ) -> Self {
        Self {
            config,
            registry,
            blacklist: Arc::new(BlacklistStore::new()),
            round_robin: Arc::new(RoundRobinState::new()),
            client,
            log_tx,
        }
    }

    /// Relays a chat-completion request for the claude/codex dialects and
    /// custom claude-dialect pools.
    pub async fn relay_chat(
        &self,
        platform: Platform,
        path: &str,
        ctx: RequestContext,
    ) -> RelayResponse {
        let dialect = dialect_for(&platform);
        let outcome = filter_providers(
            self.registry.chat_providers(&platform),
            &platform,
            &ctx.requested_model,
            &self.blacklist,
            Some(&|p: &ChatProvider, model: &str| p.supports_model(model)),
            None,
        );
        let skipped = outcome.skipped;
        let ordered = candidate_order(outcome.active, &platform, &self.round_robin);
        let targets = ordered
            .iter()
            .map(|provider| AttemptTarget {
                provider: provider.name.clone(),
                request: build_chat_request(provider, dialect, path, &ctx),
            })
            .collect();

        self.run_failover(
            &platform,
            dialect,
            &ctx.requested_model,
            ctx.is_stream,
            targets,
            skipped,
        )
        .await
    }

    /// Relays a model-listing request (bounded 30 s attempts).
    pub async fn relay_models(&self, platform: Platform) -> RelayResponse {
        let dialect = dialect_for(&platform);
        let outcome = filter_providers(
            self.registry.chat_providers(&platform),
            &platform,
            "",
            &self.blacklist,
            None,
            None,
        );
        let skipped = outcome.skipped;
        let ordered = candidate_order(outcome.active, &platform, &self.round_robin);
        let targets = ordered
            .iter()
            .map(|provider| AttemptTarget {
                provider: provider.name.clone(),
                request: build_models_request(provider, dialect),
            })
            .collect();

        self.run_failover(&platform, dialect, "", false, targets, skipped)
            .await
    }

    /// Relays a gemini generateContent/streamGenerateContent request. The
    /// gemini filter is reduced: no model-support or config-validator hooks.
    pub async fn relay_gemini(
        &self,
        model: &str,
        is_stream: bool,
        ctx: RequestContext,
    ) -> RelayResponse {
        let platform = Platform::Gemini;
        let outcome = filter_providers(
            self.registry.gemini_providers(),
            &platform,
            "",
            &self.blacklist,
            None,
            None,
        );
        let skipped = outcome.skipped;
        let ordered = candidate_order(outcome.active, &platform, &self.round_robin);
        let targets = ordered
            .iter()
            .map(|provider| AttemptTarget {
                provider: provider.name.clone(),
                request: build_gemini_request(provider, model, is_stream, &ctx),
            })
            .collect();

        self.run_failover(&platform, Dialect::Gemini, model, is_stream, targets, skipped)
            .await
    }

    async fn run_failover(
        &self,
        platform: &Platform,
        dialect: Dialect,
        model: &str,
        is_stream: bool,
        targets: Vec<AttemptTarget>,
        skipped: usize,
    ) -> RelayResponse {
        if targets.is_empty() {
            return no_candidates_response(skipped);
        }

        let threshold = self.config.failure_threshold;
        let max_per_provider = match self.config.mode {
            RelayMode::Blacklist => threshold,
            RelayMode::Fallback => 1,
        };
        let retry_wait = Duration::from_secs(u64::from(self.config.retry_wait_seconds));
        let blacklist_for = Duration::from_secs(self.config.blacklist_seconds);

        let mut retry = RetryContext::default();
        for target in &targets {
            let mut attempt_no: u32 = 0;
            loop {
                attempt_no += 1;
                match self
                    .attempt(platform, dialect, model, is_stream, target)
                    .await
                {
                    Ok(response) => {
                        retry.record_success(&target.provider);
                        self.blacklist.record_success(platform, &target.provider);
                        info!(
                            event = "relay_success",
                            platform = %platform,
                            provider = %target.provider,
                            attempts = retry.total_attempts,
                        );
                        return response;
                    }
                    Err(failure) => {
                        let newly_blacklisted = self.blacklist.record_failure(
                            platform,
                            &target.provider,
                            threshold,
                            blacklist_for,
                        );
                        warn!(
                            event = "relay_attempt_failed",
                            platform = %platform,
                            provider = %target.provider,
                            attempt = attempt_no,
                            blacklisted = newly_blacklisted,
                            error = %failure,
                        );
                        let retryable = failure.is_retryable();
                        retry.record(&target.provider, failure);

                        if !retryable || newly_blacklisted || attempt_no >= max_per_provider {
                            break;
                        }
                        if !retry_wait.is_zero() {
                            tokio::time::sleep(retry_wait).await;
                        }
                    }
                }
            }
        }

        warn!(
            event = "relay_exhausted",
            platform = %platform,
            attempts = retry.total_attempts,
            last_provider = %retry.last_provider,
        );
        failure_response(&retry, self.config.mode)
    }

    /// One upstream attempt. Exactly one request-log row is enqueued per
    /// call; for streaming responses the row follows once the stream ends,
    /// carrying the accumulated token usage.
    async fn attempt(
        &self,
        platform: &Platform,
        dialect: Dialect,
        model: &str,
        is_stream: bool,
        target: &AttemptTarget,
    ) -> Result<RelayResponse, UpstreamFailure> {
        let started = Instant::now();
        let response = match self.client.send(target.request.clone()).await {
            Ok(response) => response,
            Err(failure) => {
                self.log_attempt(
                    platform,
                    model,
                    &target.provider,
                    failure.http_code(),
                    TokenUsage::default(),
                    is_stream,
                    started.elapsed(),
                )
                .await;
                return Err(failure);
            }
        };

        let UpstreamResponse {
            status,
            headers,
            body,
        } = response;

        if !(200..300).contains(&status) {
            let excerpt = match body {
                UpstreamBody::Bytes(bytes) => bounded_excerpt(&bytes),
                UpstreamBody::Stream(_) => String::new(),
            };
            self.log_attempt(
                platform,
                model,
                &target.provider,
                i32::from(status),
                TokenUsage::default(),
                is_stream,
                started.elapsed(),
            )
            .await;
            return Err(UpstreamFailure::Http { status, excerpt });
        }

        match body {
            UpstreamBody::Bytes(bytes) => {
                let mut usage = UsageAccumulator::new(dialect);
                if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
                    usage.observe_json(&value);
                }
                self.log_attempt(
                    platform,
                    model,
                    &target.provider,
                    i32::from(status),
                    usage.finalize(),
                    is_stream,
                    started.elapsed(),
                )
                .await;
                Ok(RelayResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(bytes),
                })
            }
            UpstreamBody::Stream(upstream_rx) => {
                let client_rx = self.spawn_stream_tee(
                    upstream_rx,
                    dialect,
                    platform.clone(),
                    model.to_string(),
                    target.provider.clone(),
                    i32::from(status),
                    started,
                );
                Ok(RelayResponse {
                    status,
                    headers,
                    body: UpstreamBody::Stream(client_rx),
                })
            }
        }
    }

    /// Copies stream chunks toward the client while parsing SSE events for
    /// token usage; enqueues the attempt's log row when the stream ends.
    #[allow(clippy::too_many_arguments)]
    fn spawn_stream_tee(
        &self,
        mut upstream_rx: mpsc::Receiver<Bytes>,
        dialect: Dialect,
        platform: Platform,
        model: String,
        provider: String,
        http_code: i32,
        started: Instant,
    ) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);
        let log_tx = self.log_tx.clone();

        tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut usage = UsageAccumulator::new(dialect);

            while let Some(chunk) = upstream_rx.recv().await {
                for event in parser.feed(&chunk) {
                    usage.observe_event(&event);
                }
                if tx.send(chunk).await.is_err() {
                    // Client went away mid-stream; stop copying but still
                    // account for the attempt.
                    break;
                }
            }
            for event in parser.finish() {
                usage.observe_event(&event);
            }

            let usage = usage.finalize();
            enqueue_request_log(
                &log_tx,
                RequestLogInsert {
                    platform: platform.to_string(),
                    model,
                    provider,
                    http_code,
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cache_create_tokens: usage.cache_create_tokens,
                    cache_read_tokens: usage.cache_read_tokens,
                    reasoning_tokens: usage.reasoning_tokens,
                    is_stream: true,
                    duration_sec: started.elapsed().as_secs_f64(),
                },
            )
            .await;
        });

        rx
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_attempt(
        &self,
        platform: &Platform,
        model: &str,
        provider: &str,
        http_code: i32,
        usage: TokenUsage,
        is_stream: bool,
        elapsed: Duration,
    ) {
        enqueue_request_log(
            &self.log_tx,
            RequestLogInsert {
                platform: platform.to_string(),
                model: model.to_string(),
                provider: provider.to_string(),
                http_code,
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cache_create_tokens: usage.cache_create_tokens,
                cache_read_tokens: usage.cache_read_tokens,
                reasoning_tokens: usage.reasoning_tokens,
                is_stream,
                duration_sec: elapsed.as_secs_f64(),
            },
        )
        .await;
    }
}

fn bounded_excerpt(body: &Bytes) -> String {
    let text = String::from_utf8_lossy(body);
    let mut excerpt: String = text.chars().take(ERROR_EXCERPT_LIMIT).collect();
    if text.chars().count() > ERROR_EXCERPT_LIMIT {
        excerpt.push('…');
    }
    excerpt
}

fn no_candidates_response(skipped: usize) -> RelayResponse {
    RelayResponse::json(
        503,
        json!({
            "error": format!("没有可用的 Provider（已跳过 {skipped} 个）"),
            "totalAttempts": 0,
        }),
    )
}

fn failure_response(retry: &RetryContext, mode: RelayMode) -> RelayResponse {
    let message = retry
        .last_error
        .as_ref()
        .map(UpstreamFailure::to_string)
        .unwrap_or_else(|| "未知错误".to_string());

    let mut body = json!({
        "error": format!(
            "所有 Provider 都失败，最后尝试: {} - {}",
            retry.last_provider, message
        ),
        "lastProvider": retry.last_provider,
        "totalAttempts": retry.total_attempts,
    });
    if mode == RelayMode::Blacklist {
        body["mode"] = Value::from("blacklist_retry");
        body["hint"] =
            Value::from("拉黑模式已开启，同 Provider 重试到拉黑再切换。如需立即降级请关闭拉黑功能");
    }
    RelayResponse::json(502, body)
}
