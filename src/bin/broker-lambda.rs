use clap::Parser;
use lambda_runtime::{Error, LambdaEvent, service_fn};
use response_broker::bootstrap::{build_broker, init_tracing};
use response_broker::config::Args;
use response_broker::lambda::{ApiGatewayResponse, handle_apigw_event, invocation_deadline};
use serde_json::Value;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Lambda has no argv, configuration comes from the environment
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
            Ok::<ApiGatewayResponse, Error>(handle_apigw_event(&broker, event.payload, Some(deadline)).await)
        }
    }))
    .await
}
