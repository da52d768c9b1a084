//! Per-process supervision state machine.
//!
//! A reactor owns exactly one [`ProcessHandle`] and drives it through
//! `Initialized → Running ⇄ Stopped`, with `Exited` and `Dead` as absorbing
//! terminal states. The loop waits on three inputs at once — the worker's
//! exit notification, the inbound event channel, and the shared shutdown
//! token — and paces itself with a fixed throttle so a crash-looping worker
//! cannot spin faster than the failure counters can catch it.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::{ProcessError, ReactorError};
use crate::events::{Event, EventKind, EventResponse, Status, StatusSignal};
use crate::process::{ProcessHandle, ProcessRecipe};
use crate::signals::sleep_unless_cancelled;

/// Consecutive event failures tolerated before the reactor gives up; guards
/// against a launch recipe that can never succeed.
const MAX_CONSECUTIVE_EVENT_FAILURES: u32 = 3;

/// Unexpected worker exits tolerated before the reactor gives up; guards
/// against a worker that crash-loops faster than an operator can react.
const MAX_UNEXPECTED_EXITS: u32 = 10;

enum Input {
    ProcessExit(String),
    Event(Event),
    Shutdown,
    EventsClosed,
}

pub struct Reactor {
    id: usize,
    status: Status,
    consecutive_event_failures: u32,
    unexpected_exits: u32,
    last_event_at: Instant,
    grace: Duration,
    throttle: Duration,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    status_tx: mpsc::Sender<StatusSignal>,
    process: ProcessHandle,
}

impl Reactor {
    pub fn new(
        id: usize,
        cfg: &Config,
        recipe: ProcessRecipe,
        status_tx: mpsc::Sender<StatusSignal>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(cfg.event_buffer);
        let reactor = Self {
            id,
            status: Status::Initialized,
            consecutive_event_failures: 0,
            unexpected_exits: 0,
            last_event_at: Instant::now(),
            grace: cfg.grace,
            throttle: cfg.throttle,
            events_tx,
            events_rx,
            status_tx,
            process: ProcessHandle::new(recipe),
        };
        reactor.publish_status();
        reactor
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Sender half of this reactor's inbound event channel.
    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events_tx.clone()
    }

    /// Runs the event loop until a terminal state or fleet shutdown.
    ///
    /// Only legal from `Initialized`; everything after that goes through
    /// the event stream.
    #[instrument(skip_all, fields(reactor = self.id))]
    pub async fn run(&mut self, token: CancellationToken) -> Result<(), ReactorError> {
        if self.status != Status::Initialized {
            return Err(ReactorError::InvalidState {
                status: self.status,
            });
        }

        info!("reactor loop starting");
        // The synthetic start, and later self-scheduled recoveries, travel
        // through this slot instead of the inbound channel so a retry can
        // never deadlock on the channel the loop itself drains.
        let mut pending = Some(Event::new(EventKind::Start));

        loop {
            if self.consecutive_event_failures > MAX_CONSECUTIVE_EVENT_FAILURES {
                warn!(
                    failures = self.consecutive_event_failures,
                    "maximum event failure count reached, reactor will now die"
                );
                self.set_status(Status::Dead);
                break;
            }
            if self.unexpected_exits > MAX_UNEXPECTED_EXITS {
                warn!(
                    exits = self.unexpected_exits,
                    "maximum unexpected exit count reached, reactor will now die"
                );
                self.set_status(Status::Dead);
                break;
            }

            // Stopped persists until an event transitions the reactor, so
            // an exit observed after a requested stop still reads expected.
            if self.status != Status::Stopped {
                self.set_status(Status::Running);
            }

            let input = match pending.take() {
                Some(event) => Input::Event(event),
                None => {
                    tokio::select! {
                        reason = self.process.exit_observed() => Input::ProcessExit(reason),
                        event = self.events_rx.recv() => match event {
                            Some(event) => Input::Event(event),
                            None => Input::EventsClosed,
                        },
                        _ = token.cancelled() => Input::Shutdown,
                    }
                }
            };

            match input {
                Input::ProcessExit(reason) => pending = self.handle_process_exit(reason),
                Input::Event(event) => {
                    let kind = event.kind;
                    let outcome = self.handle_event(kind).await;
                    let succeeded = outcome.is_ok();
                    self.respond(event, outcome);

                    match kind {
                        EventKind::Stop => self.set_status(Status::Stopped),
                        EventKind::Exit => break,
                        EventKind::Start | EventKind::Restart if succeeded => {
                            self.set_status(Status::Running);
                        }
                        _ => {}
                    }
                }
                Input::Shutdown => {
                    info!("shutdown signal observed, leaving the event loop");
                    break;
                }
                Input::EventsClosed => {
                    warn!("event channel closed, leaving the event loop");
                    break;
                }
            }

            self.last_event_at = Instant::now();
            sleep_unless_cancelled(self.throttle, &token).await;
        }

        if self.status != Status::Dead {
            self.set_status(Status::Exited);
        }

        if self.process.is_alive() {
            warn!("worker still running at loop exit, attempting a final stop");
            self.process.terminate(self.grace).await?;
        }

        info!(
            idle_for = ?self.last_event_at.elapsed(),
            "reactor loop finished"
        );
        Ok(())
    }

    /// Reacts to the observer's exit notification, returning the recovery
    /// event to process next, if any.
    fn handle_process_exit(&mut self, reason: String) -> Option<Event> {
        if matches!(self.status, Status::Stopped | Status::Dead) {
            info!(%reason, "worker reported an expected exit");
            return None;
        }

        self.unexpected_exits += 1;
        if !self.process.is_alive() {
            info!(
                %reason,
                exits = self.unexpected_exits,
                "worker reported an unexpected exit, rebuilding and scheduling a start"
            );
            // The replacement is fully constructed before the old handle
            // drops; the recipe is immutable for the reactor's lifetime.
            self.process = ProcessHandle::new(self.process.recipe().clone());
            Some(Event::new(EventKind::Start))
        } else {
            warn!(%reason, "worker reported an exit but still probes alive, scheduling a restart");
            Some(Event::new(EventKind::Restart))
        }
    }

    async fn handle_event(&mut self, kind: EventKind) -> Result<(), ProcessError> {
        match kind {
            EventKind::Start => self.process.start(),
            EventKind::Restart => {
                self.process.terminate(self.grace).await?;
                self.process.start()
            }
            EventKind::Stop | EventKind::Exit => self.process.terminate(self.grace).await,
        }
    }

    /// Books the outcome against the failure counter and publishes exactly
    /// one response when the event carries a sink.
    fn respond(&mut self, event: Event, outcome: Result<(), ProcessError>) {
        let response = match outcome {
            Ok(()) => {
                self.consecutive_event_failures = 0;
                EventResponse::success(self.id, &event)
            }
            Err(cause) => {
                self.consecutive_event_failures += 1;
                warn!(event = ?event.kind, %cause, "event handling failed");
                EventResponse::failure(self.id, &event, cause.to_string())
            }
        };

        if let Some(sink) = &event.response_sink {
            if sink.try_send(response).is_err() {
                warn!(event = ?event.kind, "response sink full or closed, dropping response");
            }
        }
    }

    fn set_status(&mut self, status: Status) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.publish_status();
    }

    fn publish_status(&self) {
        let signal = StatusSignal {
            reactor: self.id,
            status: self.status,
        };
        if self.status_tx.try_send(signal).is_err() {
            warn!(
                reactor = self.id,
                status = ?self.status,
                "status listener full or closed, dropping signal"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> Config {
        let mut cfg = Config::default();
        cfg.grace = Duration::from_millis(200);
        cfg.throttle = Duration::from_millis(10);
        cfg.event_buffer = 16;
        cfg
    }

    fn sh_recipe(script: &str) -> ProcessRecipe {
        ProcessRecipe {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: Vec::new(),
        }
    }

    fn drain(status_rx: &mut mpsc::Receiver<StatusSignal>) -> Vec<Status> {
        let mut seen = Vec::new();
        while let Ok(signal) = status_rx.try_recv() {
            seen.push(signal.status);
        }
        seen
    }

    #[tokio::test]
    async fn test_run_is_rejected_outside_initialized() {
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let mut reactor = Reactor::new(0, &test_cfg(), sh_recipe("sleep 30"), status_tx);
        let events = reactor.events();
        let token = CancellationToken::new();

        events.send(Event::new(EventKind::Exit)).await.unwrap();
        reactor.run(token.clone()).await.expect("first run");

        let err = reactor
            .run(token)
            .await
            .expect_err("a retired reactor must not restart");
        assert!(matches!(
            err,
            ReactorError::InvalidState {
                status: Status::Exited
            }
        ));

        let statuses = drain(&mut status_rx);
        assert_eq!(
            statuses,
            vec![Status::Initialized, Status::Running, Status::Exited]
        );
        assert!(
            !reactor.process.is_alive(),
            "worker must be stopped by the exit event"
        );
    }

    #[tokio::test]
    async fn test_consecutive_failures_kill_the_reactor() {
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let mut reactor = Reactor::new(
            3,
            &test_cfg(),
            ProcessRecipe {
                program: "/definitely/not/a/real/binary".to_string(),
                args: Vec::new(),
                env: Vec::new(),
            },
            status_tx,
        );
        let events = reactor.events();
        let (resp_tx, mut resp_rx) = mpsc::channel(16);

        let mut sent = Vec::new();
        for _ in 0..3 {
            let event = Event::new(EventKind::Start).with_response_sink(resp_tx.clone());
            sent.push(event.id);
            events.send(event).await.unwrap();
        }

        reactor
            .run(CancellationToken::new())
            .await
            .expect("death by threshold is not a run error");

        // Synthetic start plus the three requests above.
        assert_eq!(reactor.consecutive_event_failures, 4);
        assert_eq!(drain(&mut status_rx).last(), Some(&Status::Dead));

        for id in sent {
            let response = resp_rx.recv().await.expect("response per event");
            assert_eq!(response.code, crate::events::ResponseCode::Failure);
            assert_eq!(response.request.reactor, 3);
            assert_eq!(response.request.event, id);
            assert_eq!(response.request.kind, EventKind::Start);
        }
    }

    #[tokio::test]
    async fn test_crash_loop_trips_unexpected_exit_threshold() {
        let (status_tx, mut status_rx) = mpsc::channel(256);
        let mut reactor = Reactor::new(1, &test_cfg(), sh_recipe("exit 0"), status_tx);

        reactor
            .run(CancellationToken::new())
            .await
            .expect("death by threshold is not a run error");

        assert_eq!(reactor.unexpected_exits, MAX_UNEXPECTED_EXITS + 1);
        let statuses = drain(&mut status_rx);
        assert_eq!(statuses.last(), Some(&Status::Dead));
        assert!(
            !statuses.contains(&Status::Exited),
            "a dead reactor must not also report exited"
        );
    }

    #[tokio::test]
    async fn test_stop_then_start_counts_no_unexpected_exits() {
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let mut reactor = Reactor::new(2, &test_cfg(), sh_recipe("sleep 30"), status_tx);
        let events = reactor.events();
        let (resp_tx, mut resp_rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let driver = async {
            events
                .send(Event::new(EventKind::Stop).with_response_sink(resp_tx.clone()))
                .await
                .unwrap();
            // Let the stop finish and the expected exit drain before the
            // start arrives, as an operator naturally would.
            tokio::time::sleep(Duration::from_millis(600)).await;
            events.send(Event::new(EventKind::Start)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            events.send(Event::new(EventKind::Exit)).await.unwrap();
        };

        let (outcome, _) = tokio::join!(reactor.run(token), driver);
        outcome.expect("run");

        assert_eq!(
            reactor.unexpected_exits, 0,
            "an exit after a requested stop must not count as unexpected"
        );
        assert_eq!(
            drain(&mut status_rx),
            vec![
                Status::Initialized,
                Status::Running,
                Status::Stopped,
                Status::Running,
                Status::Exited,
            ]
        );

        let response = resp_rx.recv().await.expect("stop response");
        assert_eq!(response.code, crate::events::ResponseCode::Success);
        assert_eq!(response.request.kind, EventKind::Stop);
    }

    #[tokio::test]
    async fn test_restart_event_relaunches_without_unexpected_exit() {
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let mut reactor = Reactor::new(5, &test_cfg(), sh_recipe("sleep 30"), status_tx);
        let events = reactor.events();
        let (resp_tx, mut resp_rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let driver = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            events
                .send(Event::new(EventKind::Restart).with_response_sink(resp_tx.clone()))
                .await
                .unwrap();
            // Leave the loop several iterations to surface any phantom exit
            // notification left over from the replaced worker.
            tokio::time::sleep(Duration::from_millis(600)).await;
            events.send(Event::new(EventKind::Exit)).await.unwrap();
        };

        let (outcome, _) = tokio::join!(reactor.run(token), driver);
        outcome.expect("run");

        let response = resp_rx.recv().await.expect("restart response");
        assert_eq!(response.code, crate::events::ResponseCode::Success);
        assert_eq!(response.request.kind, EventKind::Restart);

        assert_eq!(
            reactor.unexpected_exits, 0,
            "a requested restart must not count as an unexpected exit"
        );
        assert_eq!(
            drain(&mut status_rx),
            vec![Status::Initialized, Status::Running, Status::Exited],
            "a restarted reactor must stay running, never stopped or dead"
        );
    }

    #[tokio::test]
    async fn test_ambiguous_exit_schedules_restart() {
        let (status_tx, _status_rx) = mpsc::channel(64);
        let mut reactor = Reactor::new(6, &test_cfg(), sh_recipe("sleep 30"), status_tx);

        // An exit notification for a worker that still probes alive is the
        // ambiguous race case: it must count and resolve via a restart, not
        // a rebuild.
        reactor.process.start().expect("start");
        reactor.set_status(Status::Running);
        let follow_up = reactor.handle_process_exit("exit status: 1".to_string());

        assert_eq!(
            follow_up.map(|event| event.kind),
            Some(EventKind::Restart),
            "an exit from a live-probing worker must schedule a restart"
        );
        assert_eq!(reactor.unexpected_exits, 1);

        reactor
            .process
            .terminate(Duration::from_millis(200))
            .await
            .expect("cleanup");
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_worker_and_exits_loop() {
        let (status_tx, mut status_rx) = mpsc::channel(64);
        let mut reactor = Reactor::new(4, &test_cfg(), sh_recipe("sleep 30"), status_tx);
        let token = CancellationToken::new();

        let canceller = token.clone();
        let driver = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        };

        let (outcome, _) = tokio::join!(reactor.run(token), driver);
        outcome.expect("run");

        assert_eq!(drain(&mut status_rx).last(), Some(&Status::Exited));
        assert!(
            !reactor.process.is_alive(),
            "the final defensive stop must reap the worker"
        );
    }
}
