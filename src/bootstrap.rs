// Shared wiring for every binary
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::broker::Broker;
use crate::cache::{CacheStore, MemoryCache, S3Cache};
use crate::config::{Args, GeneratorKind, LogFormat};
use crate::generation::{
    BedrockGenerator, GenerationPath, Generator, KnowledgeBaseIndex, OllamaGenerator,
};

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,response_broker=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

pub async fn build_broker(args: &Args) -> anyhow::Result<Broker> {
    let config = args.broker_config()?;
    let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    let generator: Arc<dyn Generator> = match args.generator {
        GeneratorKind::Bedrock => Arc::new(BedrockGenerator::new(
            aws_sdk_bedrockruntime::Client::new(&aws),
        )),
        GeneratorKind::Ollama => {
            let client = reqwest::Client::builder()
                .timeout(config.retry.attempt_timeout)
                .build()?;
            Arc::new(OllamaGenerator::new(client, &args.ollama_url))
        }
    };

    let path = match args.knowledge_base_id.as_deref().map(str::trim) {
        Some(kb) if !kb.is_empty() => {
            info!(knowledge_base_id = kb, max_passages = args.max_passages, "Retrieval-augmented generation");
            GenerationPath::RetrievalAugmented {
                generator,
                index: Arc::new(KnowledgeBaseIndex::new(
                    aws_sdk_bedrockagentruntime::Client::new(&aws),
                    kb,
                )),
                max_passages: args.max_passages,
            }
        }
        _ => {
            info!("Plain generation (no knowledge base configured)");
            GenerationPath::Plain(generator)
        }
    };

    let cache: Option<Arc<dyn CacheStore>> = match args.cache_bucket.as_deref().map(str::trim) {
        Some(bucket) if !bucket.is_empty() => {
            info!(bucket, prefix = %args.cache_prefix, "S3 response cache");
            Some(Arc::new(S3Cache::new(
                aws_sdk_s3::Client::new(&aws),
                bucket,
                args.cache_prefix.clone(),
            )))
        }
        _ if args.memory_cache => {
            let ttl = (args.cache_ttl > 0).then(|| Duration::from_secs(args.cache_ttl));
            info!(ttl = ?ttl, "In-memory response cache");
            Some(Arc::new(MemoryCache::new(ttl)))
        }
        _ => {
            info!("Response caching disabled");
            None
        }
    };

    info!(
        generator = ?args.generator,
        model_id = %config.model_id,
        max_attempts = config.retry.max_attempts,
        "Broker configured"
    );
    Ok(Broker::new(config, path, cache))
}
