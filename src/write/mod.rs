//! Confirmed write control
//!
//! A trigger that asks for confirmation, then sends a write request and shows a
//! wait indicator until the request settles. The outcome is routed to the
//! caller's setters and an optional completion callback always fires.
//!
//! ```text
//! Idle -(trigger, !disabled)-> Confirming -(cancel)-> Idle
//!                              Confirming -(confirm)-> Waiting -(settle)-> Idle
//! ```
//!
//! The HTTP call itself happens outside the control: [`ConfirmedWrite::confirm`]
//! hands back an [`InFlight`] ticket, the caller sends it on whatever task it
//! likes, and the resulting [`Settlement`] is fed back through
//! [`ConfirmedWrite::settle`]. Each ticket settles exactly once.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::api::{
    body, route, ApiError, FormPayload, Method, PreparedRequest, RawResponse, RequestBody,
    Transport,
};

/// Cycle ids are global so a settlement can never match a different control
static NEXT_CYCLE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteState {
    #[default]
    Idle,
    Confirming,
    Waiting,
}

impl WriteState {
    pub fn confirm_visible(self) -> bool {
        self == WriteState::Confirming
    }

    pub fn wait_visible(self) -> bool {
        self == WriteState::Waiting
    }
}

/// How the trigger is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    #[default]
    Outlined,
    Contained,
    Text,
}

/// Target, method and payload of a write
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteRequest {
    pub target: String,
    pub method: Method,
    pub json: Option<Value>,
    pub form: Option<FormPayload>,
}

impl WriteRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    pub fn form(mut self, form: FormPayload) -> Self {
        self.form = Some(form);
        self
    }

    /// Serialize the payload. JSON wins over a form when both are set; a
    /// `null` JSON value counts as no JSON at all.
    pub fn build_body(&self) -> RequestBody {
        if let Some(json) = self.json.as_ref().filter(|j| !j.is_null()) {
            let data = json.to_string();
            tracing::debug!("Sending JSON data {}", data);
            if let Some(form) = &self.form {
                tracing::warn!(
                    "Ignoring form data for {} ({} fields) in favour of JSON",
                    self.target,
                    form.len()
                );
            }
            RequestBody::Json(data)
        } else if let Some(form) = &self.form {
            let entries = body::flatten(form);
            tracing::debug!("Sending form data ({} entries)", entries.len());
            RequestBody::Multipart(entries)
        } else {
            tracing::debug!("Sending empty data");
            RequestBody::Empty
        }
    }

    pub fn prepare(&self) -> PreparedRequest {
        PreparedRequest {
            method: self.method,
            target: self.target.clone(),
            body: self.build_body(),
        }
    }
}

/// A confirmed request that has not settled yet
#[derive(Debug)]
pub struct InFlight {
    cycle: u64,
    pub request: PreparedRequest,
}

impl InFlight {
    pub async fn send<T: Transport>(self, transport: &T) -> Settlement {
        let outcome = transport.send(self.request).await;
        Settlement {
            cycle: self.cycle,
            outcome,
        }
    }

    /// Settle with an outcome obtained some other way
    pub fn settle_with(self, outcome: Result<RawResponse, ApiError>) -> Settlement {
        Settlement {
            cycle: self.cycle,
            outcome,
        }
    }
}

/// Outcome of an [`InFlight`] request, success or failure
#[derive(Debug)]
pub struct Settlement {
    cycle: u64,
    outcome: Result<RawResponse, ApiError>,
}

type DataSetter<C> = Box<dyn FnMut(&mut C, Value) + Send>;
type ErrorSetter<C> = Box<dyn FnMut(&mut C, ApiError) + Send>;
type Completion<C> = Box<dyn FnMut(&mut C) + Send>;

/// A guarded mutation: trigger, confirm, wait, settle.
///
/// `C` is the caller-owned state the setters write into.
pub struct ConfirmedWrite<C> {
    label: String,
    prompt: String,
    request: WriteRequest,
    disabled: bool,
    destructive: bool,
    variant: Variant,
    width: u16,
    pad: Option<u16>,
    state: WriteState,
    cycle: Option<u64>,
    on_data: Option<DataSetter<C>>,
    on_error: Option<ErrorSetter<C>>,
    on_complete: Option<Completion<C>>,
}

impl<C> std::fmt::Debug for ConfirmedWrite<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmedWrite")
            .field("label", &self.label)
            .field("request", &self.request)
            .field("disabled", &self.disabled)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<C> ConfirmedWrite<C> {
    pub fn new(label: impl Into<String>, request: WriteRequest) -> Self {
        Self {
            label: label.into(),
            prompt: String::new(),
            request,
            disabled: false,
            destructive: false,
            variant: Variant::default(),
            width: 4,
            pad: None,
            state: WriteState::Idle,
            cycle: None,
            on_data: None,
            on_error: None,
            on_complete: None,
        }
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Draw the trigger in the danger colour
    pub fn destructive(mut self, destructive: bool) -> Self {
        self.destructive = destructive;
        self
    }

    pub fn variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    /// Layout width in grid columns (out of 12)
    pub fn width(mut self, width: u16) -> Self {
        self.width = width;
        self
    }

    /// Empty columns drawn before the trigger
    pub fn pad(mut self, pad: u16) -> Self {
        self.pad = Some(pad);
        self
    }

    pub fn on_data(mut self, setter: impl FnMut(&mut C, Value) + Send + 'static) -> Self {
        self.on_data = Some(Box::new(setter));
        self
    }

    pub fn on_error(mut self, setter: impl FnMut(&mut C, ApiError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(setter));
        self
    }

    pub fn on_complete(mut self, callback: impl FnMut(&mut C) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn prompt_text(&self) -> &str {
        if self.prompt.is_empty() {
            "Confirm?"
        } else {
            &self.prompt
        }
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive
    }

    pub fn style(&self) -> Variant {
        self.variant
    }

    pub fn layout(&self) -> (Option<u16>, u16) {
        (self.pad, self.width)
    }

    #[allow(dead_code)]
    pub fn request(&self) -> &WriteRequest {
        &self.request
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Replace the payload, e.g. after the user edits the data being written
    pub fn set_request(&mut self, request: WriteRequest) {
        self.request = request;
    }

    /// Show the confirmation prompt. No-op when disabled or not idle.
    pub fn trigger(&mut self) -> bool {
        if self.disabled || self.state != WriteState::Idle {
            return false;
        }
        self.state = WriteState::Confirming;
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.state != WriteState::Confirming {
            return false;
        }
        self.state = WriteState::Idle;
        true
    }

    /// Accept the prompt and start waiting. Only valid while confirming.
    pub fn confirm(&mut self) -> Option<InFlight> {
        if self.state != WriteState::Confirming {
            tracing::debug!("Ignoring confirm for '{}' in state {:?}", self.label, self.state);
            return None;
        }

        let cycle = NEXT_CYCLE.fetch_add(1, Ordering::Relaxed);
        self.state = WriteState::Waiting;
        self.cycle = Some(cycle);

        let request = self.request.prepare();
        tracing::info!("{} {} ('{}')", request.method, request.target, self.label);
        Some(InFlight { cycle, request })
    }

    /// Finish a cycle: hide the wait indicator, route the outcome, then run the
    /// completion callback. Returns false for a settlement from another cycle.
    pub fn settle(&mut self, ctx: &mut C, settlement: Settlement) -> bool {
        if self.cycle != Some(settlement.cycle) {
            tracing::warn!("Dropping stale settlement for '{}'", self.label);
            return false;
        }
        self.cycle = None;
        self.state = WriteState::Idle;

        match route(settlement.outcome) {
            Ok(data) => {
                if let Some(setter) = self.on_data.as_mut() {
                    setter(ctx, data);
                }
            }
            Err(error) => {
                tracing::warn!("Write '{}' failed: {}", self.label, error);
                if let Some(setter) = self.on_error.as_mut() {
                    setter(ctx, error);
                }
            }
        }

        if let Some(callback) = self.on_complete.as_mut() {
            callback(ctx);
        }
        true
    }

    /// Confirm, send and settle in one go (the prompt must already be showing)
    pub async fn run<T: Transport>(&mut self, transport: &T, ctx: &mut C) -> bool {
        match self.confirm() {
            Some(in_flight) => {
                let settlement = in_flight.send(transport).await;
                self.settle(ctx, settlement)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiClient, EntryValue, FileField};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Caller state the setters write into
    #[derive(Debug, Default)]
    struct Sink {
        data: Option<Value>,
        error: Option<ApiError>,
        completed: usize,
    }

    fn control(request: WriteRequest) -> ConfirmedWrite<Sink> {
        ConfirmedWrite::new("Save", request)
            .on_data(|sink: &mut Sink, data| sink.data = Some(data))
            .on_error(|sink: &mut Sink, error| sink.error = Some(error))
            .on_complete(|sink: &mut Sink| sink.completed += 1)
    }

    /// Records requests and answers with a fixed outcome
    struct FakeTransport {
        outcome: Result<RawResponse, ApiError>,
        sent: Mutex<Vec<PreparedRequest>>,
    }

    impl FakeTransport {
        fn new(outcome: Result<RawResponse, ApiError>) -> Self {
            Self {
                outcome,
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<PreparedRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for FakeTransport {
        async fn send(&self, request: PreparedRequest) -> Result<RawResponse, ApiError> {
            self.sent.lock().unwrap().push(request);
            self.outcome.clone()
        }
    }

    #[test]
    fn test_json_only_body() {
        let request = WriteRequest::new("/api/x").json(json!({"a": 1}));
        let prepared = request.prepare();
        assert_eq!(prepared.method, Method::Put);
        assert_eq!(prepared.body, RequestBody::Json(r#"{"a":1}"#.to_string()));
        assert!(prepared.body.headers().contains(&("Accept", "application/json")));
        assert!(prepared.body.headers().contains(&("Content-Type", "application/json")));
    }

    #[test]
    fn test_json_wins_over_form() {
        let request = WriteRequest::new("/api/x")
            .json(json!("name"))
            .form(vec![("f".to_string(), "ignored".into())]);
        assert_eq!(request.build_body(), RequestBody::Json(r#""name""#.to_string()));
    }

    #[test]
    fn test_form_body() {
        let request = WriteRequest::new("/api/upload").method(Method::Post).form(vec![
            ("file".to_string(), FileField::new("f.txt", b"data".to_vec()).into()),
            ("tags".to_string(), vec!["x", "y"].into()),
        ]);

        let RequestBody::Multipart(entries) = request.build_body() else {
            panic!("expected a multipart body");
        };
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["file", "tags", "tags"]);
        assert!(matches!(&entries[0].value, EntryValue::File(f) if f.file_name == "f.txt"));
        assert_eq!(entries[1].value, EntryValue::Text("x".into()));
        assert_eq!(entries[2].value, EntryValue::Text("y".into()));
    }

    #[test]
    fn test_no_payload_is_empty_body() {
        assert_eq!(WriteRequest::new("/api/x").build_body(), RequestBody::Empty);
    }

    #[test]
    fn test_null_json_is_no_payload() {
        let request = WriteRequest::new("/api/x").json(Value::Null);
        assert_eq!(request.build_body(), RequestBody::Empty);
        assert!(request.build_body().headers().is_empty());

        let request = request.form(vec![("tags".to_string(), "x".into())]);
        assert!(matches!(request.build_body(), RequestBody::Multipart(e) if e.len() == 1));
    }

    #[test]
    fn test_destructive_flag() {
        let write = control(WriteRequest::new("/api/x"));
        assert!(!write.is_destructive());
        assert!(write.destructive(true).is_destructive());
    }

    #[test]
    fn test_disabled_trigger_is_noop() {
        let mut write = control(WriteRequest::new("/api/x")).disabled(true);
        assert!(!write.trigger());
        assert_eq!(write.state(), WriteState::Idle);
        assert!(write.confirm().is_none());
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut write = control(WriteRequest::new("/api/x"));
        assert!(write.trigger());
        assert!(write.state().confirm_visible());
        assert!(write.cancel());
        assert_eq!(write.state(), WriteState::Idle);
        assert!(!write.cancel());
    }

    #[test]
    fn test_confirm_only_from_confirming() {
        let mut write = control(WriteRequest::new("/api/x"));
        assert!(write.confirm().is_none());

        write.trigger();
        let in_flight = write.confirm();
        assert!(in_flight.is_some());
        assert!(write.state().wait_visible());
        assert!(!write.state().confirm_visible());

        // Single flight: no second trigger or confirm while waiting
        assert!(!write.trigger());
        assert!(write.confirm().is_none());
    }

    #[test]
    fn test_settle_success_and_failure_both_complete() {
        let mut sink = Sink::default();
        let mut write = control(WriteRequest::new("/api/x"));

        write.trigger();
        let in_flight = write.confirm().unwrap();
        assert!(write.settle(&mut sink, in_flight.settle_with(Ok(RawResponse::new(200, "[1]")))));
        assert_eq!(write.state(), WriteState::Idle);
        assert_eq!(sink.data, Some(json!([1])));
        assert_eq!(sink.completed, 1);

        write.trigger();
        let in_flight = write.confirm().unwrap();
        let failure = Err(ApiError::Transport("connection refused".into()));
        assert!(write.settle(&mut sink, in_flight.settle_with(failure)));
        assert_eq!(write.state(), WriteState::Idle);
        assert_eq!(sink.error, Some(ApiError::Transport("connection refused".into())));
        assert_eq!(sink.completed, 2);
    }

    #[test]
    fn test_routing_failure_still_completes() {
        let mut sink = Sink::default();
        let mut write = control(WriteRequest::new("/api/x"));

        write.trigger();
        let in_flight = write.confirm().unwrap();
        write.settle(&mut sink, in_flight.settle_with(Ok(RawResponse::new(200, "not json"))));

        assert!(sink.data.is_none());
        assert!(matches!(sink.error, Some(ApiError::Decode(_))));
        assert_eq!(sink.completed, 1);
    }

    #[test]
    fn test_settle_without_setters() {
        let mut completed = 0usize;
        let mut write: ConfirmedWrite<usize> = ConfirmedWrite::new("Delete", WriteRequest::new("/api/x"))
            .on_complete(|count: &mut usize| *count += 1);

        write.trigger();
        let in_flight = write.confirm().unwrap();
        write.settle(&mut completed, in_flight.settle_with(Ok(RawResponse::new(500, ""))));
        assert_eq!(completed, 1);
    }

    #[test]
    fn test_settlement_settles_exactly_once() {
        let mut sink = Sink::default();
        let mut first = control(WriteRequest::new("/api/x"));
        let mut second = control(WriteRequest::new("/api/y"));

        first.trigger();
        let first_flight = first.confirm().unwrap();
        second.trigger();
        let _second_flight = second.confirm().unwrap();

        // A settlement for one control is rejected by another
        let settlement = first_flight.settle_with(Ok(RawResponse::new(200, "{}")));
        assert!(!second.settle(&mut sink, settlement));
        assert_eq!(second.state(), WriteState::Waiting);
        assert_eq!(sink.completed, 0);
    }

    #[tokio::test]
    async fn test_run_with_fake_transport() {
        let transport = FakeTransport::new(Ok(RawResponse::new(200, r#"{"ok":true}"#)));
        let mut sink = Sink::default();
        let mut write = control(WriteRequest::new("/api/x").json(json!({"a": 1})));

        // Not confirming yet, so nothing is sent
        assert!(!write.run(&transport, &mut sink).await);
        assert!(transport.sent().is_empty());

        write.trigger();
        assert!(write.run(&transport, &mut sink).await);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(sink.data, Some(json!({"ok": true})));
        assert_eq!(write.state(), WriteState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_sends_nothing() {
        let transport = FakeTransport::new(Ok(RawResponse::new(200, "{}")));
        let mut sink = Sink::default();
        let mut write = control(WriteRequest::new("/api/x"));

        write.trigger();
        write.cancel();
        assert!(!write.run(&transport, &mut sink).await);
        assert!(transport.sent().is_empty());
        assert_eq!(sink.completed, 0);
    }

    #[tokio::test]
    async fn test_json_put_against_server() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/x"))
            .and(header("accept", "application/json"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"a": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let mut sink = Sink::default();
        let mut write = control(WriteRequest::new("/api/x").json(json!({"a": 1})));

        write.trigger();
        assert!(write.run(&client, &mut sink).await);
        assert_eq!(sink.data, Some(json!({"ok": true})));
        assert!(sink.error.is_none());
        assert_eq!(sink.completed, 1);
    }

    #[tokio::test]
    async fn test_multipart_upload_against_server() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let mut sink = Sink::default();
        let mut write = control(WriteRequest::new("/api/upload").form(vec![
            ("file".to_string(), FileField::new("f.txt", b"contents".to_vec()).into()),
            ("tags".to_string(), vec!["x", "y"].into()),
        ]));

        write.trigger();
        write.run(&client, &mut sink).await;
        assert_eq!(sink.completed, 1);

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).to_string();
        assert_eq!(body.matches(r#"name="file"; filename="f.txt""#).count(), 1);
        assert_eq!(body.matches(r#"name="tags""#).count(), 2);
        let x = body.find("\r\n\r\nx\r\n").unwrap();
        let y = body.find("\r\n\r\ny\r\n").unwrap();
        assert!(x < y);
    }

    #[tokio::test]
    async fn test_http_error_goes_to_error_setter() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/api/x"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"bad"}"#))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let mut sink = Sink::default();
        let mut write = control(WriteRequest::new("/api/x").json(json!(null)));

        write.trigger();
        write.run(&client, &mut sink).await;
        assert_eq!(
            sink.error,
            Some(ApiError::Status {
                status: 400,
                message: "bad".into()
            })
        );
        assert_eq!(sink.completed, 1);
    }
}
