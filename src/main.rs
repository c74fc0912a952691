use clap::Parser; // for cli
use response_broker::batch::{default_output_path, estimate_cost, run_batch};
use response_broker::bootstrap::{build_broker, init_tracing};
use response_broker::config::{Args, Command};
use response_broker::handlers::router;
use response_broker::state::AppState;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();
    init_tracing(args.log_format);

    let broker = Arc::new(build_broker(&args).await?);

    match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            let app = router(AppState::new(broker));

            let addr = format!("0.0.0.0:{}", args.port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            info!("Broker running on http://localhost:{}", args.port);
            axum::serve(listener, app).await?;
        }
        Command::Batch {
            input,
            output,
            delay_ms,
        } => {
            let output = output.unwrap_or_else(|| default_output_path(&input, chrono::Local::now()));
            info!(input = %input.display(), output = %output.display(), "Batch response generation");

            let reader = BufReader::new(File::open(&input)?);
            let writer = BufWriter::new(File::create(&output)?);
            let summary = run_batch(&broker, reader, writer, Duration::from_millis(delay_ms)).await?;

            info!(
                total = summary.total,
                successful = summary.successful,
                failed = summary.failed,
                cache_hits = summary.cache_hits,
                elapsed = ?summary.elapsed,
                average = ?summary.average(),
                "Generation complete, saved to {}",
                output.display()
            );

            let config = broker.config();
            match estimate_cost(&config.model_id, summary.total, config.inference.max_tokens) {
                Some(estimate) => info!(
                    model = estimate.model_name,
                    input_tokens = estimate.input_tokens,
                    output_tokens = estimate.output_tokens,
                    "Estimated cost: ${:.4} (input ${:.4}, output ${:.4})",
                    estimate.total(),
                    estimate.input_cost,
                    estimate.output_cost
                ),
                None => info!(model_id = %config.model_id, "Unknown model for cost estimation"),
            }
        }
    }

    Ok(())
}
