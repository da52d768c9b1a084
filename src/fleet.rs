//! # Fleet: builds the reactors, aggregates their signals, tears them down.
//!
//! The fleet owns every reactor plus the shared shutdown token, and runs
//! three long-lived listener tasks beside them:
//!
//! ```text
//!   ShardGroup list ──► Fleet::assemble() ──► one Reactor per group
//!
//!   Fleet::run():
//!     spawn response aggregator   (logs every Failure response)
//!     spawn status aggregator     (first Exited/Dead ──► token.cancel())
//!     spawn signal task           (SIGINT/SIGTERM ──► settle ──► cancel)
//!     for each reactor: JoinSet.spawn(reactor.run(token)), stagger delay
//!     join all reactors, return
//! ```
//!
//! One reactor reaching a terminal state cancels the whole fleet: each
//! worker serves a disjoint shard group, so the survivors' work is
//! meaningless until the plan is rebuilt. Teardown is best-effort
//! synchronous — every reactor observes the same token, not necessarily at
//! the same instant.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ConfigError;
use crate::events::{Event, EventResponse, ResponseCode, StatusSignal};
use crate::plan::ShardGroup;
use crate::process::ProcessRecipe;
use crate::reactor::Reactor;
use crate::signals::{sleep_unless_cancelled, wait_for_shutdown_signal};

/// Pause between an OS termination request and the fleet-wide cancellation,
/// giving in-flight work a moment to land.
const SIGNAL_SETTLE: Duration = Duration::from_secs(3);

pub struct Fleet {
    cfg: Config,
    reactors: Vec<Reactor>,
    responses_tx: mpsc::Sender<EventResponse>,
    responses_rx: mpsc::Receiver<EventResponse>,
    status_rx: mpsc::Receiver<StatusSignal>,
    token: CancellationToken,
}

impl Fleet {
    /// Builds one reactor per shard group, numbered by position in the
    /// plan. Fails before any reactor exists if the configuration cannot
    /// launch anything.
    pub fn assemble(cfg: Config, plans: Vec<ShardGroup>) -> Result<Self, ConfigError> {
        if cfg.executable.is_empty() {
            return Err(ConfigError::Missing("executable"));
        }

        let (responses_tx, responses_rx) = mpsc::channel(cfg.listener_buffer);
        let (status_tx, status_rx) = mpsc::channel(cfg.listener_buffer);

        let reactors = plans
            .into_iter()
            .enumerate()
            .map(|(id, group)| {
                let recipe = ProcessRecipe {
                    program: cfg.executable.clone(),
                    args: cfg.args.clone(),
                    env: group.env,
                };
                Reactor::new(id, &cfg, recipe, status_tx.clone())
            })
            .collect();

        Ok(Self {
            cfg,
            reactors,
            responses_tx,
            responses_rx,
            status_rx,
            token: CancellationToken::new(),
        })
    }

    /// Sender for event responses; attach it to an [`Event`] to have the
    /// outcome land in the fleet's response aggregator.
    pub fn response_sink(&self) -> mpsc::Sender<EventResponse> {
        self.responses_tx.clone()
    }

    /// Inbound event senders, one per reactor, in reactor-id order.
    pub fn controls(&self) -> Vec<mpsc::Sender<Event>> {
        self.reactors.iter().map(Reactor::events).collect()
    }

    /// Runs every reactor to completion.
    ///
    /// Returns once all reactor loops have finished — after a full
    /// cooperative teardown triggered by a terminal reactor, an OS signal,
    /// or every reactor exiting on its own.
    pub async fn run(self) {
        let Fleet {
            cfg,
            reactors,
            responses_tx,
            responses_rx,
            status_rx,
            token,
        } = self;
        // Callers only ever see per-event clones of this sender; dropping
        // the fleet's own copy lets the aggregator observe a closed channel
        // once the last of those clones is gone.
        drop(responses_tx);

        info!("starting response aggregator");
        tokio::spawn(log_failed_responses(responses_rx, token.clone()));

        info!("starting status aggregator");
        tokio::spawn(cancel_on_terminal_status(status_rx, token.clone()));

        info!("starting signal listener");
        tokio::spawn(cancel_on_shutdown_signal(token.clone(), SIGNAL_SETTLE));

        info!(count = reactors.len(), "starting reactors");
        let mut set = JoinSet::new();
        for mut reactor in reactors {
            let reactor_token = token.clone();
            set.spawn(async move {
                let id = reactor.id();
                match reactor.run(reactor_token).await {
                    Ok(()) => info!(reactor = id, "reactor finished"),
                    Err(cause) => error!(reactor = id, %cause, "reactor ended with an error"),
                }
            });
            sleep_unless_cancelled(cfg.stagger, &token).await;
        }

        info!("fleet started, waiting for reactors to finish");
        while set.join_next().await.is_some() {}
        info!("all reactors finished");
    }
}

/// Drains the shared response listener, logging failures. Success responses
/// only matter to callers that attached their own sink.
async fn log_failed_responses(
    mut responses: mpsc::Receiver<EventResponse>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            response = responses.recv() => match response {
                Some(response) if response.code == ResponseCode::Failure => {
                    warn!(
                        reactor = response.request.reactor,
                        event = ?response.request.kind,
                        message = %response.message,
                        "reactor reported a failed event"
                    );
                }
                Some(_) => {}
                None => break,
            }
        }
    }
}

/// Cancels the fleet the moment any reactor reports a terminal status.
async fn cancel_on_terminal_status(
    mut status: mpsc::Receiver<StatusSignal>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            signal = status.recv() => match signal {
                Some(signal) if signal.status.is_terminal() => {
                    warn!(
                        reactor = signal.reactor,
                        status = ?signal.status,
                        "reactor entered a terminal state, shutting the whole fleet down"
                    );
                    token.cancel();
                }
                Some(_) => {}
                None => break,
            }
        }
    }
}

/// Turns an OS termination request into the shared fleet cancellation.
async fn cancel_on_shutdown_signal(token: CancellationToken, settle: Duration) {
    if let Err(cause) = wait_for_shutdown_signal().await {
        error!(%cause, "unable to install shutdown signal handlers");
        return;
    }
    info!("termination signal received, shutting down");
    tokio::time::sleep(settle).await;
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Status};

    fn test_cfg() -> Config {
        let mut cfg = Config::default();
        cfg.executable = "/bin/sh".to_string();
        cfg.grace = Duration::from_millis(200);
        cfg.stagger = Duration::from_millis(10);
        cfg.throttle = Duration::from_millis(10);
        cfg.listener_buffer = 256;
        cfg
    }

    fn group(id: usize) -> ShardGroup {
        ShardGroup {
            id,
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_terminal_status_cancels_the_token() {
        let (status_tx, status_rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let watcher = tokio::spawn(cancel_on_terminal_status(status_rx, token.clone()));

        status_tx
            .send(StatusSignal {
                reactor: 0,
                status: Status::Running,
            })
            .await
            .unwrap();
        assert!(!token.is_cancelled(), "running is not terminal");

        status_tx
            .send(StatusSignal {
                reactor: 0,
                status: Status::Dead,
            })
            .await
            .unwrap();
        watcher.await.unwrap();
        assert!(token.is_cancelled(), "dead must cancel the fleet");
    }

    #[tokio::test]
    async fn test_one_exit_tears_the_fleet_down() {
        let mut cfg = test_cfg();
        cfg.args = vec!["-c".to_string(), "sleep 30".to_string()];

        let fleet = Fleet::assemble(cfg, vec![group(0), group(1)]).unwrap();
        let controls = fleet.controls();
        assert_eq!(controls.len(), 2);

        let driver = async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            controls[0].send(Event::new(EventKind::Exit)).await.unwrap();
        };

        tokio::time::timeout(Duration::from_secs(30), async {
            tokio::join!(fleet.run(), driver)
        })
        .await
        .expect("one terminal reactor must bring the whole fleet down");
    }

    #[tokio::test]
    async fn test_assemble_rejects_empty_executable() {
        let mut cfg = test_cfg();
        cfg.executable = String::new();
        assert!(matches!(
            Fleet::assemble(cfg, vec![group(0)]),
            Err(ConfigError::Missing("executable"))
        ));
    }
}
