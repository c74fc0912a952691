use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";

pub const DEFAULT_CACHE_PREFIX: &str = "broker-cache/";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert UK retirement planning advisor. \
Use the provided context from official UK pension documentation to answer questions accurately.

Guidelines:
- Base your answer on the retrieved pension documentation
- Always include appropriate disclaimers for financial advice
- Be clear about general guidance vs. personalized advice
- Mention when professional financial advice should be sought
- Use UK-specific terminology and regulations
- Be concise but comprehensive
- If the context doesn't contain enough information, acknowledge this";

// CLI argument structure. Every knob also reads from the environment so the
// Lambda binary is configured the same way as the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "response-broker")]
#[command(about = "Caching question broker in front of Bedrock")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Which generation backend answers questions
    #[arg(long, env = "GENERATOR", value_enum, default_value_t = GeneratorKind::Bedrock)]
    pub generator: GeneratorKind,

    // Default model, overridable per request
    #[arg(long, env = "BEDROCK_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    // Ollama server url, only used with --generator ollama
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    // Knowledge base used to ground answers; plain generation when unset
    #[arg(long, env = "KNOWLEDGE_BASE_ID")]
    pub knowledge_base_id: Option<String>,

    #[arg(long, env = "MAX_PASSAGES", default_value_t = 5)]
    pub max_passages: usize,

    // S3 bucket holding cached responses
    #[arg(long, env = "S3_CACHE_BUCKET")]
    pub cache_bucket: Option<String>,

    // Key layout differs from objects under the legacy bedrock-cache/ prefix
    #[arg(long, env = "S3_CACHE_PREFIX", default_value = DEFAULT_CACHE_PREFIX)]
    pub cache_prefix: String,

    // Keep responses in process memory when no bucket is configured
    #[arg(long, env = "MEMORY_CACHE", default_value_t = false)]
    pub memory_cache: bool,

    // Memory cache TTL in seconds, 0 keeps entries forever
    #[arg(short, long, env = "CACHE_TTL", default_value_t = 0)]
    pub cache_ttl: u64,

    #[arg(long, env = "MAX_TOKENS", default_value_t = 2000)]
    pub max_tokens: u32,

    #[arg(long, env = "TEMPERATURE", default_value_t = 0.7)]
    pub temperature: f32,

    #[arg(long, env = "SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT, hide_default_value = true)]
    pub system_prompt: String,

    #[arg(long, env = "MIN_QUESTION_CHARS", default_value_t = 10)]
    pub min_question_chars: usize,

    #[arg(long, env = "MAX_QUESTION_CHARS", default_value_t = 2000)]
    pub max_question_chars: usize,

    // Generation attempts per request, including the first
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, env = "INITIAL_BACKOFF_MS", default_value_t = 500)]
    pub initial_backoff_ms: u64,

    // Hard ceiling per generation attempt, kept below the gateway timeout
    #[arg(long, env = "ATTEMPT_TIMEOUT_SECS", default_value_t = 25)]
    pub attempt_timeout_secs: u64,

    // Budget for the whole request, retries and backoff included
    #[arg(long, env = "REQUEST_DEADLINE_SECS", default_value_t = 28)]
    pub request_deadline_secs: u64,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Answer every question in a JSONL file, warming the cache
    Batch {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        // Pause between requests to stay under the throttling limit
        #[arg(short, long, default_value_t = 500)]
        delay_ms: u64,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    Bedrock,
    Ollama,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            min_chars: 10,
            max_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.7,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
    // API Gateway gives up at 29s
    pub request_deadline: Duration,
    // No retry is started with less time than this left
    pub min_attempt: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(25),
            request_deadline: Duration::from_secs(28),
            min_attempt: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    // Delay after the 1-based `attempt`, doubling up to max_backoff
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub model_id: String,
    pub limits: QueryLimits,
    pub inference: InferenceSettings,
    pub retry: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            limits: QueryLimits::default(),
            inference: InferenceSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Args {
    pub fn broker_config(&self) -> anyhow::Result<BrokerConfig> {
        if self.model_id.trim().is_empty() {
            anyhow::bail!("model id must not be empty");
        }
        if self.min_question_chars > self.max_question_chars {
            anyhow::bail!(
                "min question length {} exceeds max {}",
                self.min_question_chars,
                self.max_question_chars
            );
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max attempts must be at least 1");
        }
        if self.request_deadline_secs == 0 {
            anyhow::bail!("request deadline must be at least 1 second");
        }

        Ok(BrokerConfig {
            model_id: self.model_id.trim().to_string(),
            limits: QueryLimits {
                min_chars: self.min_question_chars,
                max_chars: self.max_question_chars,
            },
            inference: InferenceSettings {
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                system_prompt: self.system_prompt.clone(),
            },
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
                request_deadline: Duration::from_secs(self.request_deadline_secs),
                ..RetryPolicy::default()
            },
        })
    }
}
