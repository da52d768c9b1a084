//! # shardvisor
//!
//! **Shardvisor** supervises a fleet of long-running worker processes, one
//! per shard group. It restarts workers that die unexpectedly, drives them
//! through controlled start/stop/restart/exit transitions, and tears the
//! whole fleet down the moment any single worker reaches a terminal state —
//! a partial fleet serves a partial keyspace and is worse than no fleet.
//!
//! ## Architecture
//! ```text
//!  ShardGroup #0      ShardGroup #1      ShardGroup #N-1
//!  (env overlay)      (env overlay)      (env overlay)
//!       │                  │                  │
//!       ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Fleet (coordinator)                                          │
//! │  - builds one Reactor per shard group, staggers their start   │
//! │  - response aggregator: logs failed event outcomes            │
//! │  - status aggregator: first Exited/Dead cancels the fleet     │
//! │  - signal task: SIGINT/SIGTERM → settle → cancel the fleet    │
//! └──────┬──────────────────┬──────────────────┬──────────────────┘
//!        ▼                  ▼                  ▼
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐
//!   │ Reactor  │       │ Reactor  │       │ Reactor  │
//!   │ (loop)   │       │ (loop)   │       │ (loop)   │
//!   └────┬─────┘       └────┬─────┘       └────┬─────┘
//!        │ owns              │                  │
//!        ▼                   ▼                  ▼
//!   ProcessHandle       ProcessHandle      ProcessHandle
//!   (worker process + exit observer task, one live process each)
//! ```
//!
//! Each reactor runs an event loop that waits on three inputs at once: an
//! exit notification from its worker process, an inbound [`Event`]
//! (start / restart / stop / exit), and the shared shutdown token. A worker
//! that dies while it was supposed to run is rebuilt from its launch recipe
//! and started again; repeated event failures or crash loops trip fixed
//! thresholds and kill the reactor instead, which in turn shuts the fleet
//! down.
//!
//! ## Example
//! ```rust,no_run
//! use shardvisor::{Config, Fleet, ShardGroup};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut cfg = Config::default();
//!     cfg.executable = "/usr/local/bin/python3".into();
//!     cfg.args = vec!["__main__.py".into()];
//!
//!     // Normally produced by build_shard_plans() from the gateway.
//!     let plans = vec![ShardGroup {
//!         id: 0,
//!         env: vec![("DISCORD_SHARD_IDS".into(), "[0,1,2]".into())],
//!     }];
//!
//!     let fleet = Fleet::assemble(cfg, plans).expect("fleet");
//!     fleet.run().await;
//! }
//! ```

mod config;
mod error;
mod events;
mod fleet;
mod plan;
mod process;
mod reactor;
mod signals;

pub use config::Config;
pub use error::{ConfigError, LivenessError, PlanError, ProcessError, ReactorError};
pub use events::{Event, EventKind, EventResponse, RequestEcho, ResponseCode, Status, StatusSignal};
pub use fleet::Fleet;
pub use plan::{
    build_shard_plans, DiscordGateway, ShardCountSource, ShardGroup, ENV_SHARD_COUNT,
    ENV_SHARD_IDS,
};
pub use process::{ProcessHandle, ProcessRecipe};
pub use reactor::Reactor;
pub use signals::wait_for_shutdown_signal;
