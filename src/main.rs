use std::process;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shardvisor::{build_shard_plans, Config, DiscordGateway, Fleet};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("shardvisor {} starting", env!("CARGO_PKG_VERSION"));

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(cause) => {
            error!(%cause, "unrecoverable configuration error");
            process::exit(1);
        }
    };

    info!("building shard plan");
    let gateway = DiscordGateway::new(cfg.token.clone());
    let plans =
        match build_shard_plans(cfg.shards_per_process, cfg.shard_ids.clone(), &gateway).await {
            Ok(plans) => plans,
            Err(cause) => {
                error!(%cause, "unrecoverable error while building the shard plan");
                process::exit(1);
            }
        };

    let fleet = match Fleet::assemble(cfg, plans) {
        Ok(fleet) => fleet,
        Err(cause) => {
            error!(%cause, "unrecoverable error while assembling the fleet");
            process::exit(1);
        }
    };

    fleet.run().await;
    info!("exiting");
}
