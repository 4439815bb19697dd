use std::{path, time::Duration};

use anyhow::Result;
use bonus_hunt_engine::{
    api::{self, ApiContext},
    broadcast::Broadcaster,
    lifecycle::HuntController,
    metrics::{register_custom_metrics, REGISTRY},
    settings::Settings,
    store::Store,
};
use clap::Parser;
use tokio::time::interval;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};
use warp::{reject::Rejection, reply::Reply, Filter};

#[derive(Debug, clap::Parser)]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Optional configuration file to use. If present the toml file at the
    /// given path will be loaded. Environment variables can override the
    /// settings in the given file.
    #[clap(short = 'c')]
    pub config: Option<path::PathBuf>,
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut res = String::new();
    for families in [REGISTRY.gather(), prometheus::gather()] {
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            warn!("could not encode metrics: {e:?}");
            continue;
        }
        match String::from_utf8(buffer) {
            Ok(v) => res.push_str(&v),
            Err(e) => warn!("metrics could not be from_utf8'd: {e:?}"),
        }
    }
    Ok(res)
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        register_custom_metrics();
        let settings = Settings::new(self.config.as_ref())?;
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(&settings.log))
            .with(tracing_subscriber::fmt::layer().with_span_events(FmtSpan::CLOSE))
            .init();

        let metrics_route = warp::path!("metrics").and_then(metrics_handler);
        tokio::spawn(warp::serve(metrics_route).run(([0, 0, 0, 0], settings.metrics_port)));

        let store = Store::connect(
            &settings.database_url,
            settings.max_connections,
            settings.store_timeout,
        )
        .await?;
        let broadcaster = Broadcaster::new(settings.broadcast_capacity);
        let controller = HuntController::new(
            store.clone(),
            broadcaster,
            settings.default_winner_points,
        );
        let ctx = ApiContext {
            controller: controller.clone(),
            retry: settings.retry_policy(),
        };

        let listen_addr = settings.listen_addr;
        let reconcile_interval = settings.reconcile_interval;
        Toplevel::new(move |top_level: SubsystemHandle| async move {
            top_level.start(SubsystemBuilder::new("http-api", {
                move |handle| async move {
                    let (addr, server) = warp::serve(api::routes(ctx))
                        .try_bind_with_graceful_shutdown(listen_addr, async move {
                            handle.on_shutdown_requested().await
                        })?;
                    info!(%addr, "http api listening");
                    server.await;
                    anyhow::Ok(())
                }
            }));
            // Completes hunts whose last outcome was recorded while completion
            // failed, or whose rows were edited out of band.
            top_level.start(SubsystemBuilder::new("reconciler", {
                move |handle| async move {
                    let mut interval = interval(reconcile_interval);
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                if let Err(e) = controller.reconcile().await {
                                    error!("Error reconciling hunts: {e}");
                                }
                                controller.broadcaster().prune();
                            }
                            _ = handle.on_shutdown_requested() => {
                                info!("Shutdown requested, exiting reconciler");
                                break;
                            }
                        }
                    }
                    anyhow::Ok(())
                }
            }));
        })
        .catch_signals()
        .handle_shutdown_requests(Duration::from_millis(5000))
        .await?;

        store.close().await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.run().await
}
