use log::{error, info, warn};
use rpctrace::configuration::config::Config;
use rpctrace::decoding::FramedDecoderFactory;
use rpctrace::error_handling::types::TracerError;
use rpctrace::network::{default_source, CaptureCoordinator};
use rpctrace::rendering::{FrameRenderer, JsonRenderer, LogRenderer};
use rpctrace::session_management::SessionContext;
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
                rpctrace v{}, passive RPC connection tracer
==============================================================================
",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load().unwrap_or_else(|e| {
        error!("{}", TracerError::from(e));
        std::process::exit(1);
    });

    info!("Configuration imported successfully");

    let context = SessionContext::from_config(&config, Arc::new(FramedDecoderFactory));
    let renderer: Box<dyn FrameRenderer> = if config.json {
        Box::new(JsonRenderer::stdout())
    } else {
        Box::new(LogRenderer::new(config.display_options()))
    };

    let mut coordinator = CaptureCoordinator::new(default_source(), &config, context, renderer);

    if let Err(e) = coordinator.listen(&config.interfaces) {
        error!("{}, exiting...", TracerError::from(e));
        std::process::exit(1);
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = coordinator.run(shutdown).await {
        error!("{}", TracerError::from(e));
        std::process::exit(1);
    }
}
