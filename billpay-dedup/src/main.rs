use std::sync::Arc;

use billpay_common::metrics::{serve, setup_metrics_recorder};
use billpay_dedup::config::Config;
use billpay_dedup::context::AppContext;
use billpay_dedup::handlers;
use billpay_dedup::pipeline::Pipeline;
use envconfig::Envconfig;
use eyre::Result;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let log_layer = fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env()?;
    let bind = config.bind();

    let context = AppContext::from_config(config).await?;
    let pipeline = Arc::new(Pipeline::new(Arc::new(context)));

    let recorder_handle = setup_metrics_recorder()?;
    let app = handlers::app(pipeline, Some(recorder_handle));

    tracing::info!(bind, "billpay dedup listening");
    if let Err(e) = serve(app, &bind).await {
        tracing::error!("failed to start billpay dedup http server, {}", e);
        return Err(e.into());
    }

    Ok(())
}
