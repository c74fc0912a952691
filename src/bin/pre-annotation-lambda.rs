use clap::Parser;
use lambda_runtime::{Error, LambdaEvent, service_fn};
use response_broker::bootstrap::{build_broker, init_tracing};
use response_broker::config::Args;
use response_broker::lambda::invocation_deadline;
use response_broker::pre_annotation::{PreAnnotationResponse, handle_pre_annotation};
use serde_json::Value;
use std::sync::Arc;

// Ground Truth pre-annotation hook: one manifest line in, one worker task out
#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let broker = Arc::new(
        build_broker(&args)
            .await
            .map_err(|e| Error::from(e.to_string()))?,
    );

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let broker = Arc::clone(&broker);
        async move {
            let deadline = invocation_deadline(event.context.deadline);
            Ok::<PreAnnotationResponse, Error>(handle_pre_annotation(&broker, event.payload, Some(deadline)).await)
        }
    }))
    .await
}
