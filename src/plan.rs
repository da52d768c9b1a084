//! Launch planning: turns shard requirements into one environment overlay
//! per worker process.
//!
//! The shard total comes from an external source of truth — in production
//! the Discord gateway's recommendation — behind the [`ShardCountSource`]
//! trait. Shard ids are split into contiguous groups of the requested size,
//! the last group taking the remainder; each group becomes the env overlay
//! its worker is launched with. Any failure here is fatal to startup: the
//! fleet never runs on a partial plan.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::error::PlanError;

const DEFAULT_SHARDS_PER_PROCESS: usize = 3;
const GATEWAY_URL: &str = "https://discord.com/api/v10/gateway/bot";

/// Env variable carrying a worker's shard ids, e.g. `[0,1,2]`.
pub const ENV_SHARD_IDS: &str = "DISCORD_SHARD_IDS";
/// Env variable carrying the fleet-wide shard total.
pub const ENV_SHARD_COUNT: &str = "DISCORD_SHARD_COUNT";

/// One worker's launch plan: its position and its env overlay.
#[derive(Clone, Debug)]
pub struct ShardGroup {
    pub id: usize,
    pub env: Vec<(String, String)>,
}

/// External source of truth for how many shards the fleet must cover.
#[async_trait]
pub trait ShardCountSource: Send + Sync {
    async fn recommended_shards(&self) -> Result<u32, PlanError>;
}

/// [`ShardCountSource`] backed by Discord's `/gateway/bot` endpoint.
pub struct DiscordGateway {
    client: reqwest::Client,
    token: String,
}

impl DiscordGateway {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
        }
    }
}

#[derive(Deserialize)]
struct GatewayBot {
    shards: u32,
}

#[async_trait]
impl ShardCountSource for DiscordGateway {
    async fn recommended_shards(&self) -> Result<u32, PlanError> {
        let body: GatewayBot = self
            .client
            .get(GATEWAY_URL)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.shards)
    }
}

/// Produces the ordered launch-plan list for the whole fleet.
///
/// `shards_per_process` of zero falls back to the provider default. An
/// explicit, non-empty `shard_ids` list is used as given; otherwise the
/// full `0..total` range reported by the source is covered. The shard-count
/// overlay always carries the source's total, even under an explicit list.
pub async fn build_shard_plans(
    shards_per_process: usize,
    shard_ids: Option<Vec<u32>>,
    source: &dyn ShardCountSource,
) -> Result<Vec<ShardGroup>, PlanError> {
    let per_process = if shards_per_process == 0 {
        DEFAULT_SHARDS_PER_PROCESS
    } else {
        shards_per_process
    };

    let total = source.recommended_shards().await?;
    if total == 0 {
        return Err(PlanError::InvalidShardCount(total));
    }

    let ids = match shard_ids {
        Some(ids) if !ids.is_empty() => ids,
        _ => {
            info!(total, "no explicit shard ids provided, deriving the full range");
            (0..total).collect()
        }
    };

    info!(
        shards = ids.len(),
        groups = ids.len().div_ceil(per_process),
        per_process,
        "splitting shards into groups"
    );

    let groups = ids
        .chunks(per_process)
        .enumerate()
        .map(|(id, chunk)| {
            let list = chunk
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            info!(group = id, ids = %list, "planned shard group");
            ShardGroup {
                id,
                env: vec![
                    (ENV_SHARD_IDS.to_string(), format!("[{list}]")),
                    (ENV_SHARD_COUNT.to_string(), total.to_string()),
                ],
            }
        })
        .collect();

    Ok(groups)
}
