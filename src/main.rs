// src/main.rs
//! Stream Tap proxy
//!
//! Plain HTTP forward proxy that saves streaming responses to disk while
//! delivering them to the client unchanged.

use anyhow::Result;
use std::sync::Arc;
use stream_tap::observability::{init_metrics, init_tracing, LoggingObserver};
use stream_tap::recording::SinkAllocator;
use stream_tap::utils::config::TapConfig;
use stream_tap::{HttpInterceptor, StreamInterceptor};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first: it decides how logging is set up
    let config = TapConfig::load()?;

    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    info!("Starting Stream Tap v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let allocator = SinkAllocator::new(&config.storage);
    if let Err(e) = allocator.prepare().await {
        // captures are retried per stream; the proxy still forwards traffic
        warn!("Capture directory unavailable: {}", e);
    }

    let interceptor = Arc::new(StreamInterceptor::new(
        allocator,
        config.tee.options(),
        Arc::new(LoggingObserver),
    ));

    let proxy = Arc::new(HttpInterceptor::new(config.proxy.clone(), interceptor));
    let listener = proxy.bind().await?;

    info!("Proxy address: http://{}", config.proxy.listen_addr);
    info!("Captures saved under: {:?}", config.storage.output_dir);
    info!("Point HTTP clients at the proxy address to capture their streams");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, stopping proxy");
    };

    tokio::select! {
        result = proxy.serve(listener) => {
            if let Err(e) = &result {
                error!("Proxy error: {}", e);
            }
            result?;
        }
        _ = shutdown_signal => {}
    }

    info!("Proxy stopped");
    Ok(())
}
