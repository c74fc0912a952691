use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore, Fingerprint};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, GenerationError};
use crate::generation::{Generation, GenerationPath, GenerationRequest};
use crate::metrics::{
    CACHE_ERRORS, CACHE_HITS, CACHE_MISSES, GENERATION_ATTEMPTS, GENERATION_FAILURES,
    REQUEST_LATENCY, REQUEST_TOTAL,
};
use crate::models::{AskRequest, AskResponse};
use crate::query::Query;

pub struct Broker {
    config: BrokerConfig,
    path: GenerationPath,
    cache: Option<Arc<dyn CacheStore>>,
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Broker {
    pub fn new(config: BrokerConfig, path: GenerationPath, cache: Option<Arc<dyn CacheStore>>) -> Self {
        Self { config, path, cache }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub async fn handle(&self, request: AskRequest) -> Result<AskResponse, BrokerError> {
        self.handle_within(request, None).await
    }

    // The configured request deadline applies, or the caller's if it is sooner
    pub async fn handle_within(
        &self,
        request: AskRequest,
        caller_deadline: Option<Instant>,
    ) -> Result<AskResponse, BrokerError> {
        REQUEST_TOTAL.inc();
        let start_time = Instant::now();
        let deadline = start_time + self.config.retry.request_deadline;
        let deadline = caller_deadline.map_or(deadline, |d| d.min(deadline));
        let result = self.answer(request, deadline).await;
        REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
        result
    }

    async fn answer(&self, request: AskRequest, deadline: Instant) -> Result<AskResponse, BrokerError> {
        let query = Query::parse(&request.question, &self.config.limits)?;
        let model_id = request
            .model_id
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.config.model_id.as_str())
            .to_string();
        let fingerprint = Fingerprint::of(&query, &model_id);
        let cache = self.cache.as_deref().filter(|_| request.use_cache);

        info!(
            fingerprint = %fingerprint,
            model_id = %model_id,
            use_cache = request.use_cache,
            "Processing question: {}",
            preview(query.as_str())
        );

        if let Some(cache) = cache {
            if let Some(entry) = lookup(cache, &fingerprint).await {
                CACHE_HITS.inc();
                info!(fingerprint = %fingerprint, "Cache HIT");
                return Ok(AskResponse {
                    response: entry.response,
                    question: query.as_str().to_string(),
                    model_id: entry.model_id,
                    cached: true,
                    timestamp: now_iso8601(),
                });
            }
            CACHE_MISSES.inc();
            debug!(fingerprint = %fingerprint, "Cache MISS");
        }

        let generation = self.generate(&query, &model_id, deadline).await?;
        let timestamp = now_iso8601();

        if let Some(cache) = cache {
            let entry = CacheEntry {
                question: query.as_str().to_string(),
                response: generation.text.clone(),
                model_id: generation.model_id.clone(),
                timestamp: timestamp.clone(),
            };
            if let Err(err) = cache.put(&fingerprint, &entry).await {
                CACHE_ERRORS.inc();
                let err = BrokerError::from(err);
                warn!(fingerprint = %fingerprint, error = %err, "Error caching response");
            }
        }

        Ok(AskResponse {
            response: generation.text,
            question: query.as_str().to_string(),
            model_id: generation.model_id,
            cached: false,
            timestamp,
        })
    }

    async fn generate(&self, query: &Query, model_id: &str, deadline: Instant) -> Result<Generation, BrokerError> {
        let passages = self.path.grounding(query.as_str()).await;
        let request = GenerationRequest {
            model_id: model_id.to_string(),
            system_prompt: self.config.inference.system_prompt.clone(),
            question: query.as_str().to_string(),
            passages,
            max_tokens: self.config.inference.max_tokens,
            temperature: self.config.inference.temperature,
        };

        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            let budget = policy
                .attempt_timeout
                .min(deadline.saturating_duration_since(Instant::now()));
            if budget.is_zero() {
                GENERATION_FAILURES.inc();
                warn!(attempt, "Request deadline passed before generation");
                return Err(BrokerError::GenerationFailure("request deadline exceeded".to_string()));
            }

            GENERATION_ATTEMPTS.inc();
            let outcome = match timeout(budget, self.path.generator().generate(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(GenerationError::Transient(format!("no response within {budget:?}"))),
            };

            match outcome {
                Ok(generation) => return Ok(generation),
                Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff_for(attempt);
                    // the next attempt must still fit before the deadline
                    if Instant::now() + delay + policy.min_attempt > deadline {
                        GENERATION_FAILURES.inc();
                        warn!(attempt, error = %err, "No time left to retry generation");
                        return Err(BrokerError::GenerationFailure(err.to_string()));
                    }
                    warn!(attempt, max_attempts = policy.max_attempts, ?delay, error = %err, "Retrying generation");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    GENERATION_FAILURES.inc();
                    warn!(attempt, error = %err, "Generation failed");
                    return Err(BrokerError::GenerationFailure(err.to_string()));
                }
            }
        }
    }
}

// A failing cache read is a miss
async fn lookup(cache: &dyn CacheStore, fingerprint: &Fingerprint) -> Option<CacheEntry> {
    match cache.get(fingerprint).await {
        Ok(entry) => entry,
        Err(err) => {
            CACHE_ERRORS.inc();
            let err = BrokerError::from(err);
            warn!(fingerprint = %fingerprint, error = %err, "Error reading cache");
            None
        }
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 100;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::generation::Generator;
    use crate::testing::{FakeCache, FakeGenerator, FakeIndex};
    use std::time::Duration;

    fn fast_config() -> BrokerConfig {
        BrokerConfig {
            model_id: "model-a".into(),
            retry: RetryPolicy {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                attempt_timeout: Duration::from_secs(5),
                min_attempt: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
            ..BrokerConfig::default()
        }
    }

    fn broker(generator: Arc<FakeGenerator>, cache: Arc<FakeCache>) -> Broker {
        let generator: Arc<dyn Generator> = generator;
        Broker::new(fast_config(), GenerationPath::Plain(generator), Some(cache))
    }

    fn fingerprint(question: &str, model_id: &str) -> Fingerprint {
        let query = Query::parse(question, &fast_config().limits).unwrap();
        Fingerprint::of(&query, model_id)
    }

    fn transient(msg: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Transient(msg.to_string()))
    }

    #[tokio::test]
    async fn empty_cache_generates_once_and_writes_once() {
        let generator = Arc::new(FakeGenerator::answering("A pension is a retirement savings plan."));
        let cache = Arc::new(FakeCache::new());
        let broker = broker(generator.clone(), cache.clone());

        let response = broker.handle(AskRequest::new("What is a pension?")).await.unwrap();

        assert!(!response.cached);
        assert_eq!(response.response, "A pension is a retirement savings plan.");
        assert_eq!(response.model_id, "model-a");
        assert_eq!(generator.calls(), 1);
        assert_eq!(cache.writes(), 1);

        let stored = cache
            .entry(&fingerprint("What is a pension?", "model-a"))
            .expect("entry written under the question fingerprint");
        assert_eq!(stored.response, response.response);
        assert_eq!(stored.question, "What is a pension?");
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_generation() {
        let generator = Arc::new(FakeGenerator::answering("fresh"));
        let cache = Arc::new(FakeCache::new());
        cache.seed(
            &fingerprint("What is a pension?", "model-a"),
            CacheEntry {
                question: "What is a pension?".into(),
                response: "cached answer".into(),
                model_id: "model-a".into(),
                timestamp: "2025-12-01T12:00:00Z".into(),
            },
        );
        let broker = broker(generator.clone(), cache.clone());

        let response = broker
            .handle(AskRequest::new("  what is A   PENSION?"))
            .await
            .unwrap();

        assert!(response.cached);
        assert_eq!(response.response, "cached answer");
        assert_eq!(generator.calls(), 0);
        assert_eq!(cache.writes(), 0);
    }

    #[tokio::test]
    async fn second_identical_question_is_served_from_cache() {
        let generator = Arc::new(FakeGenerator::answering("answer"));
        let cache = Arc::new(FakeCache::new());
        let broker = broker(generator.clone(), cache.clone());

        let first = broker.handle(AskRequest::new("What is a pension?")).await.unwrap();
        let second = broker.handle(AskRequest::new("what is a pension?")).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.response, first.response);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_input_makes_no_downstream_calls() {
        let generator = Arc::new(FakeGenerator::answering("unused"));
        let cache = Arc::new(FakeCache::new());
        let broker = broker(generator.clone(), cache.clone());

        let long = "x".repeat(2001);
        for question in ["", "   ", "too short", long.as_str()] {
            let err = broker.handle(AskRequest::new(question)).await.unwrap_err();
            assert!(matches!(err, BrokerError::InvalidInput(_)), "{question:?}: {err}");
        }
        assert_eq!(generator.calls(), 0);
        assert_eq!(cache.reads(), 0);
        assert_eq!(cache.writes(), 0);
    }

    #[tokio::test]
    async fn cache_write_failure_is_swallowed() {
        let generator = Arc::new(FakeGenerator::answering("answer"));
        let cache = Arc::new(FakeCache::failing_writes());
        let broker = broker(generator.clone(), cache.clone());

        let response = broker.handle(AskRequest::new("What is a pension?")).await.unwrap();

        assert_eq!(response.response, "answer");
        assert!(!response.cached);
        assert_eq!(cache.writes(), 1);
    }

    #[tokio::test]
    async fn cache_read_failure_degrades_to_generation() {
        let generator = Arc::new(FakeGenerator::answering("answer"));
        let cache = Arc::new(FakeCache::failing_reads());
        let broker = broker(generator.clone(), cache.clone());

        let response = broker.handle(AskRequest::new("What is a pension?")).await.unwrap();

        assert!(!response.cached);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn use_cache_false_bypasses_the_store() {
        let generator = Arc::new(FakeGenerator::answering("answer"));
        let cache = Arc::new(FakeCache::new());
        let broker = broker(generator.clone(), cache.clone());

        let mut request = AskRequest::new("What is a pension?");
        request.use_cache = false;
        broker.handle(request.clone()).await.unwrap();
        broker.handle(request).await.unwrap();

        assert_eq!(generator.calls(), 2);
        assert_eq!(cache.reads(), 0);
        assert_eq!(cache.writes(), 0);
    }

    #[tokio::test]
    async fn no_cache_configured_always_generates() {
        let generator = Arc::new(FakeGenerator::answering("answer"));
        let dyn_generator: Arc<dyn Generator> = generator.clone();
        let broker = Broker::new(fast_config(), GenerationPath::Plain(dyn_generator), None);

        broker.handle(AskRequest::new("What is a pension?")).await.unwrap();
        let second = broker.handle(AskRequest::new("What is a pension?")).await.unwrap();

        assert!(!second.cached);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn two_transient_failures_then_success() {
        let generator = Arc::new(FakeGenerator::scripted(
            vec![transient("throttled"), transient("throttled")],
            "third time lucky",
        ));
        let cache = Arc::new(FakeCache::new());
        let broker = broker(generator.clone(), cache.clone());

        let response = broker.handle(AskRequest::new("What is a pension?")).await.unwrap();

        assert_eq!(response.response, "third time lucky");
        assert_eq!(generator.calls(), 3);
        assert_eq!(cache.writes(), 1);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_attempts() {
        let generator = Arc::new(FakeGenerator::scripted(
            vec![transient("a"), transient("b"), transient("c"), transient("d")],
            "never reached",
        ));
        let cache = Arc::new(FakeCache::new());
        let broker = broker(generator.clone(), cache.clone());

        let err = broker.handle(AskRequest::new("What is a pension?")).await.unwrap_err();

        assert!(matches!(err, BrokerError::GenerationFailure(_)));
        assert_eq!(generator.calls(), 3);
        assert_eq!(cache.writes(), 0);
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let generator = Arc::new(FakeGenerator::scripted(
            vec![Err(GenerationError::Fatal("ValidationException".into()))],
            "never reached",
        ));
        let cache = Arc::new(FakeCache::new());
        let broker = broker(generator.clone(), cache.clone());

        let err = broker.handle(AskRequest::new("What is a pension?")).await.unwrap_err();

        assert!(matches!(err, BrokerError::GenerationFailure(ref m) if m.contains("ValidationException")));
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_as_transient() {
        let generator = Arc::new(FakeGenerator::answering("late").with_delay(Duration::from_millis(200)));
        let dyn_generator: Arc<dyn Generator> = generator.clone();
        let mut config = fast_config();
        config.retry.attempt_timeout = Duration::from_millis(20);
        config.retry.max_attempts = 2;
        let broker = Broker::new(config, GenerationPath::Plain(dyn_generator), None);

        let err = broker.handle(AskRequest::new("What is a pension?")).await.unwrap_err();

        assert!(matches!(err, BrokerError::GenerationFailure(ref m) if m.contains("no response within")));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn per_request_model_override_changes_fingerprint() {
        let generator = Arc::new(FakeGenerator::answering("answer"));
        let cache = Arc::new(FakeCache::new());
        let broker = broker(generator.clone(), cache.clone());

        let mut request = AskRequest::new("What is a pension?");
        request.model_id = Some("model-b".into());
        let response = broker.handle(request).await.unwrap();

        assert_eq!(response.model_id, "model-b");
        assert!(cache.entry(&fingerprint("What is a pension?", "model-b")).is_some());
        assert!(cache.entry(&fingerprint("What is a pension?", "model-a")).is_none());
    }

    #[tokio::test]
    async fn retrieved_passages_reach_the_generator() {
        let generator = Arc::new(FakeGenerator::answering("grounded"));
        let dyn_generator: Arc<dyn Generator> = generator.clone();
        let path = GenerationPath::RetrievalAugmented {
            generator: dyn_generator,
            index: Arc::new(FakeIndex::with_passages(&["The state pension age is 66."])),
            max_passages: 5,
        };
        let broker = Broker::new(fast_config(), path, None);

        broker.handle(AskRequest::new("When can I take my pension?")).await.unwrap();

        let request = generator.last_request().expect("generator called");
        assert_eq!(request.passages.len(), 1);
        assert!(request.user_prompt().contains("The state pension age is 66."));
    }

    #[tokio::test]
    async fn envelope_timestamp_is_utc_iso8601() {
        let generator = Arc::new(FakeGenerator::answering("answer"));
        let broker = broker(generator, Arc::new(FakeCache::new()));

        let response = broker.handle(AskRequest::new("What is a pension?")).await.unwrap();

        assert!(response.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&response.timestamp).is_ok());
    }

    #[tokio::test]
    async fn retries_stay_within_request_deadline() {
        let generator = Arc::new(FakeGenerator::answering("late").with_delay(Duration::from_secs(10)));
        let dyn_generator: Arc<dyn Generator> = generator.clone();
        let config = BrokerConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(80),
                attempt_timeout: Duration::from_millis(250),
                request_deadline: Duration::from_millis(280),
                min_attempt: Duration::from_millis(50),
            },
            ..BrokerConfig::default()
        };
        let broker = Broker::new(config, GenerationPath::Plain(dyn_generator), None);

        let start = Instant::now();
        let err = broker.handle(AskRequest::new("What is a pension?")).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, BrokerError::GenerationFailure(_)));
        assert!(elapsed < Duration::from_millis(290), "request ran {elapsed:?}");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn last_attempt_is_clamped_to_remaining_budget() {
        let generator = Arc::new(FakeGenerator::answering("late").with_delay(Duration::from_secs(10)));
        let dyn_generator: Arc<dyn Generator> = generator.clone();
        let mut config = fast_config();
        config.retry.attempt_timeout = Duration::from_millis(150);
        config.retry.request_deadline = Duration::from_millis(200);
        let broker = Broker::new(config, GenerationPath::Plain(dyn_generator), None);

        let start = Instant::now();
        broker.handle(AskRequest::new("What is a pension?")).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(260), "request ran {elapsed:?}");
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn caller_deadline_wins_when_sooner() {
        let generator = Arc::new(FakeGenerator::answering("late").with_delay(Duration::from_secs(10)));
        let dyn_generator: Arc<dyn Generator> = generator.clone();
        let broker = Broker::new(fast_config(), GenerationPath::Plain(dyn_generator), None);

        let start = Instant::now();
        let caller_deadline = start + Duration::from_millis(100);
        broker
            .handle_within(AskRequest::new("What is a pension?"), Some(caller_deadline))
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_millis(200), "request ran {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn expired_deadline_skips_generation() {
        let generator = Arc::new(FakeGenerator::answering("unused"));
        let dyn_generator: Arc<dyn Generator> = generator.clone();
        let broker = Broker::new(fast_config(), GenerationPath::Plain(dyn_generator), None);

        let err = broker
            .handle_within(AskRequest::new("What is a pension?"), Some(Instant::now()))
            .await
            .unwrap_err();

        assert!(matches!(err, BrokerError::GenerationFailure(ref m) if m.contains("deadline")));
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "£".repeat(150);
        let short = preview(&long);
        assert_eq!(short.chars().count(), 103);
        assert_eq!(preview("short"), "short");
    }
}
