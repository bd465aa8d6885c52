//! forward-filter sidecar: consults a remote authority for every request
//! before handing it to the upstream service.

use forward_filter::config::ProxyConfig;
use forward_filter::server::{self, AppState};

fn main() -> anyhow::Result<()> {
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("FORWARD_FILTER_CONFIG").ok())
            .unwrap_or_else(|| "forward-filter.toml".to_string())
    };

    let config = ProxyConfig::load(&config_path)?;

    // The OTLP gRPC exporter needs a reactor, so the runtime comes first.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = forward_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            otlp_export = tracing_guard.exporting(),
            listen_address = %config.server.listen_address,
            authority = %config.filter.address,
            upstream = %config.upstream.url,
            "Starting forward-filter"
        );

        // Configuration errors stop the process before the listener binds.
        let state = AppState::from_config(&config)?;
        server::run(&config.server.listen_address, state).await
    })
}
