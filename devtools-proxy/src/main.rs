//! Process bootstrap and lifecycle for the DevTools proxy.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use devtools_proxy::DevtoolsProxy;
use devtools_proxy::config::{FeatureFlags, ProxyConfig, RuntimeConfig};
use eyre::Context as _;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Pause between closing the live sockets and stopping the listeners.
const DRAIN_PAUSE: Duration = Duration::from_millis(100);
/// Max wait for the listener tasks after shutdown is signalled.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    let config = ProxyConfig::parse();
    let flags = FeatureFlags::from_env();
    install_tracing(config.debug);

    let runtime = if flags.multi_thread {
        tokio::runtime::Builder::new_multi_thread()
    } else {
        tokio::runtime::Builder::new_current_thread()
    }
    .enable_all()
    .build()
    .expect("can build tokio runtime");

    match runtime.block_on(run(RuntimeConfig::new(config, flags).into_shared())) {
        Ok(()) => {
            tracing::info!("good night!");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Arc<RuntimeConfig>) -> eyre::Result<()> {
    devtools_proxy::metrics::describe_metrics();
    let cancellation_token = CancellationToken::new();
    spawn_shutdown_task(cancellation_token.clone());

    let proxy = DevtoolsProxy::init(Arc::clone(&config), cancellation_token.clone())?;
    let router = proxy.router();

    let mut servers = Vec::new();
    for port in &config.proxy_ports {
        for host in &config.proxy_hosts {
            let listener = TcpListener::bind((host.as_str(), *port))
                .await
                .wrap_err_with(|| format!("while binding {host}:{port}"))?;
            tracing::info!(
                "listening on {}",
                listener
                    .local_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| String::from("invalid addr"))
            );
            let router = router.clone();
            let shutdown = cancellation_token.clone();
            servers.push(tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await;
                if let Err(err) = result {
                    tracing::error!("got error from axum: {err:?}");
                }
            }));
        }
    }

    tracing::info!(
        "DevTools Proxy started at {:?}:{:?}; \
         use --remote-debugging-port={} --remote-debugging-address={} for Chrome",
        config.proxy_hosts,
        config.proxy_ports,
        config.chrome_port,
        config.chrome_host
    );

    cancellation_token.cancelled().await;

    tracing::info!("draining sockets..");
    proxy.shutdown().await;
    tokio::time::sleep(DRAIN_PAUSE).await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(servers))
        .await
        .is_err()
    {
        tracing::warn!("could not finish shutdown in time");
    }
    Ok(())
}

/// Cancels the token once SIGINT arrives.
fn spawn_shutdown_task(cancellation_token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("cannot listen for shutdown signal: {err:?}");
        }
        tracing::info!("shutdown signal received");
        cancellation_token.cancel();
    });
}

fn install_tracing(debug: bool) {
    let default_filter = if debug {
        "devtools_proxy=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}
