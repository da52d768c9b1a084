//! Lifecycle signal types exchanged between reactors and the fleet.
//!
//! Reactors consume [`Event`]s, publish one [`EventResponse`] per event that
//! carries a response sink, and announce every status change as a
//! [`StatusSignal`] on the fleet's shared listener.

use tokio::sync::mpsc;
use uuid::Uuid;

/// Lifecycle state of a single reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Initialized,
    Running,
    Stopped,
    Exited,
    Dead,
}

impl Status {
    /// Exited and Dead are absorbing: a reactor that reaches either is
    /// retired and never reused.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Exited | Status::Dead)
    }
}

/// Operations a reactor can be asked to perform on its worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Restart,
    Stop,
    Exit,
}

/// One request to a reactor.
///
/// Callers that want the outcome attach a sink with
/// [`Event::with_response_sink`]; exactly one [`EventResponse`] is published
/// per received event. Callers without a sink fire and forget.
///
/// ```rust
/// use shardvisor::{Event, EventKind};
///
/// let ev = Event::new(EventKind::Stop);
/// assert_eq!(ev.kind, EventKind::Stop);
/// ```
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub response_sink: Option<mpsc::Sender<EventResponse>>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            response_sink: None,
        }
    }

    pub fn with_response_sink(mut self, sink: mpsc::Sender<EventResponse>) -> Self {
        self.response_sink = Some(sink);
        self
    }
}

/// Outcome classification of a handled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    Failure,
}

/// Echo of the request an [`EventResponse`] answers, for correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestEcho {
    pub reactor: usize,
    pub event: Uuid,
    pub kind: EventKind,
}

/// Outcome of one handled event, published to the event's response sink.
#[derive(Debug, Clone)]
pub struct EventResponse {
    pub code: ResponseCode,
    pub message: String,
    pub request: RequestEcho,
}

impl EventResponse {
    pub(crate) fn success(reactor: usize, event: &Event) -> Self {
        Self {
            code: ResponseCode::Success,
            message: "operation successful".to_string(),
            request: RequestEcho {
                reactor,
                event: event.id,
                kind: event.kind,
            },
        }
    }

    pub(crate) fn failure(reactor: usize, event: &Event, message: String) -> Self {
        Self {
            code: ResponseCode::Failure,
            message,
            request: RequestEcho {
                reactor,
                event: event.id,
                kind: event.kind,
            },
        }
    }
}

/// Status transition announcement: `{which reactor, its new status}`.
#[derive(Debug, Clone, Copy)]
pub struct StatusSignal {
    pub reactor: usize,
    pub status: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(Status::Exited.is_terminal());
        assert!(Status::Dead.is_terminal());
        assert!(!Status::Initialized.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Stopped.is_terminal());
    }

    #[test]
    fn test_response_echoes_request() {
        let event = Event::new(EventKind::Restart);
        let response = EventResponse::failure(7, &event, "boom".to_string());

        assert_eq!(response.code, ResponseCode::Failure);
        assert_eq!(response.request.reactor, 7);
        assert_eq!(response.request.event, event.id);
        assert_eq!(response.request.kind, EventKind::Restart);
    }

    #[test]
    fn test_distinct_events_get_distinct_ids() {
        let a = Event::new(EventKind::Start);
        let b = Event::new(EventKind::Start);
        assert_ne!(a.id, b.id);
    }
}
