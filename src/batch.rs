use serde_json::{Map, Value};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::models::AskRequest;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn average(&self) -> Duration {
        if self.total == 0 {
            return Duration::ZERO;
        }
        self.elapsed / self.total as u32
    }
}

/// `questions.jsonl` -> `questions_with_responses_20251201_120000.jsonl`
pub fn default_output_path(input: &Path, now: chrono::DateTime<chrono::Local>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string());
    let name = format!("{stem}_with_responses_{}.jsonl", now.format("%Y%m%d_%H%M%S"));
    input.with_file_name(name)
}

fn load_items(reader: impl BufRead) -> anyhow::Result<Vec<Map<String, Value>>> {
    let mut items = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: Map<String, Value> = serde_json::from_str(&line)
            .map_err(|e| anyhow::anyhow!("line {}: {e}", idx + 1))?;
        items.push(item);
    }
    Ok(items)
}

pub async fn run_batch(
    broker: &Broker,
    reader: impl BufRead,
    mut writer: impl Write,
    delay: Duration,
) -> anyhow::Result<BatchSummary> {
    let items = load_items(reader)?;
    let total = items.len();
    info!(total, "Loaded questions");

    let start_time = Instant::now();
    let mut summary = BatchSummary {
        total,
        ..BatchSummary::default()
    };

    for (i, mut item) in items.into_iter().enumerate() {
        let prompt_id = item
            .get("prompt_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("prompt_{}", i + 1));
        let question = item
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match broker.handle(AskRequest::new(question)).await {
            Ok(envelope) => {
                info!(
                    progress = %format!("{}/{}", i + 1, total),
                    prompt_id = %prompt_id,
                    cached = envelope.cached,
                    chars = envelope.response.len(),
                    "Generated"
                );
                summary.successful += 1;
                if envelope.cached {
                    summary.cache_hits += 1;
                }
                item.insert("response".into(), Value::String(envelope.response));
                item.insert("model_id".into(), Value::String(envelope.model_id));
                item.insert("cached".into(), Value::Bool(envelope.cached));
            }
            Err(err) => {
                warn!(progress = %format!("{}/{}", i + 1, total), prompt_id = %prompt_id, error = %err, "Failed");
                summary.failed += 1;
                item.insert("response".into(), Value::String(format!("Error: {err}")));
            }
        }

        serde_json::to_writer(&mut writer, &item)?;
        writer.write_all(b"\n")?;

        if i + 1 < total && !delay.is_zero() {
            sleep(delay).await;
        }
    }
    writer.flush()?;

    summary.elapsed = start_time.elapsed();
    Ok(summary)
}

/// Rough spend for a batch, in USD.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub model_name: &'static str,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
}

impl CostEstimate {
    pub fn total(&self) -> f64 {
        self.input_cost + self.output_cost
    }
}

const AVG_INPUT_TOKENS: u64 = 150;

// (model family, display name, input $/1M, output $/1M)
const PRICING: &[(&str, &str, f64, f64)] = &[
    ("haiku", "Claude 3 Haiku", 0.25, 1.25),
    ("sonnet", "Claude 3 Sonnet", 3.0, 15.0),
    ("opus", "Claude 3 Opus", 15.0, 75.0),
];

/// Assumes ~150 input tokens per request and 80% of `max_tokens` of output.
pub fn estimate_cost(model_id: &str, requests: usize, max_tokens: u32) -> Option<CostEstimate> {
    let model = model_id.to_lowercase();
    let &(_, model_name, input_price, output_price) =
        PRICING.iter().find(|(family, ..)| model.contains(family))?;

    let input_tokens = AVG_INPUT_TOKENS * requests as u64;
    let output_tokens = (f64::from(max_tokens) * 0.8 * requests as f64) as u64;
    Some(CostEstimate {
        model_name,
        input_tokens,
        output_tokens,
        input_cost: input_tokens as f64 / 1_000_000.0 * input_price,
        output_cost: output_tokens as f64 / 1_000_000.0 * output_price,
    })
}
