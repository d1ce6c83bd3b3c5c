//! Test doubles shared by the core crates.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use {async_trait::async_trait, tokio::time::Instant};

use crate::{
    error::{Error, Result},
    rest::{Method, RestClient, RestRequest, RestResponse},
    telemetry::{CoreEvent, TelemetrySink},
};

/// Keeps every emitted [`CoreEvent`] for later assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CoreEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&CoreEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: &CoreEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// One request seen by [`ScriptedRest`], with its start and end times.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: RestRequest,
    pub status: Option<u16>,
    pub started: Instant,
    pub finished: Instant,
}

enum Scripted {
    Respond(RestResponse),
    NetworkError(String),
}

/// A [`RestClient`] answering from per-endpoint scripts.
///
/// Requests without a scripted answer get `default_status` with an empty
/// JSON object. Every call takes `latency` of (tokio) time so ordering
/// between overlapping calls is observable.
pub struct ScriptedRest {
    scripts: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
    default_status: u16,
    latency: Duration,
}

impl Default for ScriptedRest {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRest {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            default_status: 200,
            latency: Duration::from_millis(10),
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_default_status(mut self, status: u16) -> Self {
        self.default_status = status;
        self
    }

    /// Queue a response for the next call to `method path`.
    pub fn respond(&self, method: Method, path: &str, response: RestResponse) {
        self.push(method, path, Scripted::Respond(response));
    }

    /// Queue a network-level failure for the next call to `method path`.
    pub fn fail_network(&self, method: Method, path: &str, message: &str) {
        self.push(method, path, Scripted::NetworkError(message.to_string()));
    }

    fn push(&self, method: Method, path: &str, entry: Scripted) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((method, path.to_string()))
            .or_default()
            .push_back(entry);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Calls to `method path` that came back 2xx.
    pub fn successes(&self, method: Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.request.method == method && c.request.path == path)
            .filter(|c| c.status.is_some_and(|s| (200..300).contains(&s)))
            .count()
    }
}

#[async_trait]
impl RestClient for ScriptedRest {
    async fn execute(&self, request: &RestRequest) -> Result<RestResponse> {
        let started = Instant::now();
        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&(request.method, request.path.clone()))
            .and_then(VecDeque::pop_front);

        tokio::time::sleep(self.latency).await;

        let outcome = match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::NetworkError(message)) => Err(Error::transient(message)),
            None => Ok(RestResponse::new(self.default_status)
                .with_body(serde_json::Value::Object(Default::default()))),
        };

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                request: request.clone(),
                status: outcome.as_ref().ok().map(|r| r.status),
                started,
                finished: Instant::now(),
            });
        outcome
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{event::EventKind, rest::RouteKey},
    };

    #[test]
    fn records_in_emission_order() {
        let sink = RecordingSink::new();
        sink.emit(&CoreEvent::EventDuplicate {
            epoch: 1,
            sequence: 2,
        });
        sink.emit(&CoreEvent::EventReceived {
            epoch: 1,
            sequence: 3,
            kind: EventKind::MessageCreated,
        });
        assert_eq!(sink.events().len(), 2);
        assert_eq!(
            sink.count(|e| matches!(e, CoreEvent::EventDuplicate { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_answers_are_consumed_in_order() {
        let rest = ScriptedRest::new();
        let path = "/channels/7/messages/100";
        rest.respond(Method::Delete, path, RestResponse::new(429));
        let request = RestRequest::new(
            Method::Delete,
            path,
            RouteKey::new(Method::Delete, "/channels/7/messages/{message_id}"),
        );

        assert_eq!(rest.execute(&request).await.unwrap().status, 429);
        assert_eq!(rest.execute(&request).await.unwrap().status, 200);
        assert_eq!(rest.successes(Method::Delete, path), 1);
    }
}
