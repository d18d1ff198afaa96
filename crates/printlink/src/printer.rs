//! The `Printer`: identity, state, registration and the communication loop.
//!
//! One `Printer` value is created by the embedding application and shared
//! (by reference) with any number of producer threads. The loop runs on a
//! dedicated thread via [`Printer::run_loop`]; user command handlers run on
//! a separate handler thread that pumps [`Printer::command`]. See the crate
//! docs for the full threading picture.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use printlink_config::{NetworkSection, SdkConfig, TimingSection};
use printlink_fs::Filesystem;
use printlink_transfer::{TransferManager, TransferSpec};
use printlink_types::{
    Command, CommandKind, CommandPayload, CommandState, Event, EventKind, EventSource,
    PrinterState, PrinterType, StateSource, Telemetry, TransferDirection, TransitionError,
};

use crate::clock::{Clock, SkewDetector, SystemClock};
use crate::command::{CommandDispatcher, HandlerOutcome, Offer};
use crate::condition::ConditionTree;
use crate::error::{SdkError, SdkResult};
use crate::info::{SDK_VERSION, build_info};
use crate::queue::{EventQueue, QueueSink};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, UreqTransport};

/// Loop sleep slice; stop requests are observed at least this often.
const STOP_SLICE: Duration = Duration::from_millis(50);

/// Best-effort event flush window on loop exit.
const FLUSH_WINDOW: Duration = Duration::from_secs(2);

/// Builder for [`Printer`].
pub struct PrinterBuilder {
    config: SdkConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    clock: Option<Arc<dyn Clock>>,
    queue: Option<Arc<EventQueue>>,
    fs: Option<Arc<Filesystem>>,
    transfers: Option<Arc<TransferManager>>,
}

impl PrinterBuilder {
    /// Injects a transport (tests use a scripted one).
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Injects a clock (tests step it manually).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses an existing queue, typically shared with the filesystem and the
    /// transfer manager through [`QueueSink`].
    pub fn with_queue(mut self, queue: Arc<EventQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Attaches the virtual filesystem; registers its built-in handlers.
    pub fn with_filesystem(mut self, fs: Arc<Filesystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Attaches the transfer manager; registers its built-in handlers.
    pub fn with_transfers(mut self, transfers: Arc<TransferManager>) -> Self {
        self.transfers = Some(transfers);
        self
    }

    /// Builds the printer.
    pub fn build(self) -> SdkResult<Printer> {
        self.config
            .validate()
            .map_err(|e| SdkError::Config(e.to_string()))?;

        let printer_type = PrinterType::from_str(&self.config.printer.printer_type)
            .map_err(|e| SdkError::Config(e.to_string()))?;
        let serial_number = self.config.printer.serial_number.clone();
        let fingerprint = match &self.config.printer.fingerprint {
            Some(fingerprint) => fingerprint.clone(),
            None => sha256_hex(serial_number.as_bytes()),
        };

        let timing = self.config.timing.clone();
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let server_url = self
                    .config
                    .connect
                    .server_url
                    .as_deref()
                    .ok_or(SdkError::NoServerUrl)?;
                Arc::new(UreqTransport::new(
                    server_url,
                    Duration::from_secs(timing.request_timeout_secs),
                ))
            }
        };

        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(EventQueue::new(self.config.commands.event_queue_capacity)));
        let sink = Arc::new(QueueSink::new(Arc::clone(&queue)));
        let conditions = Arc::new(ConditionTree::connectivity(sink));

        let mut priority = HashSet::new();
        for name in &self.config.commands.priority {
            match CommandKind::from_str(name) {
                Ok(kind) => {
                    priority.insert(kind);
                }
                Err(_) => warn!(%name, "unknown priority command in config; ignoring"),
            }
        }
        let dispatcher = CommandDispatcher::new(priority);

        let printer = Printer {
            printer_type,
            serial_number,
            fingerprint,
            firmware_version: self.config.printer.firmware_version.clone(),
            network: self.config.network.clone(),
            timing,
            server_url: self.config.connect.server_url.clone(),
            token: Mutex::new(self.config.connect.token.clone()),
            code: Mutex::new(None),
            state: Mutex::new(PrinterState::Idle),
            telemetry_slot: Mutex::new(Telemetry::default()),
            queue,
            dispatcher,
            conditions,
            transport,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            skew: Mutex::new(SkewDetector::new()),
            fs: self.fs,
            transfers: self.transfers,
            stop: AtomicBool::new(false),
        };
        printer.register_builtin_handlers();
        let token = printer.token.lock().expect("token lock poisoned").clone();
        if let (Some(transfers), Some(token)) = (&printer.transfers, token) {
            transfers.set_token(token);
        }
        Ok(printer)
    }
}

/// Device-side endpoint of the Connect protocol.
pub struct Printer {
    printer_type: PrinterType,
    serial_number: String,
    fingerprint: String,
    firmware_version: Option<String>,
    network: NetworkSection,
    timing: TimingSection,
    server_url: Option<String>,
    /// Set exactly once, on registration or from config.
    token: Mutex<Option<String>>,
    /// Temporary registration code, alive between register and get_token.
    code: Mutex<Option<String>>,
    state: Mutex<PrinterState>,
    telemetry_slot: Mutex<Telemetry>,
    queue: Arc<EventQueue>,
    dispatcher: CommandDispatcher,
    conditions: Arc<ConditionTree>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    skew: Mutex<SkewDetector>,
    fs: Option<Arc<Filesystem>>,
    transfers: Option<Arc<TransferManager>>,
    stop: AtomicBool,
}

impl Printer {
    /// Starts building a printer from its configuration.
    pub fn builder(config: SdkConfig) -> PrinterBuilder {
        PrinterBuilder {
            config,
            transport: None,
            clock: None,
            queue: None,
            fs: None,
            transfers: None,
        }
    }

    // ------------------------------------------------------------------
    // Identity & accessors
    // ------------------------------------------------------------------

    pub fn printer_type(&self) -> PrinterType {
        self.printer_type
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    pub(crate) fn network(&self) -> &NetworkSection {
        &self.network
    }

    /// Current printer state.
    pub fn state(&self) -> PrinterState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// True once a token is present.
    pub fn is_registered(&self) -> bool {
        self.token.lock().expect("token lock poisoned").is_some()
    }

    /// The temporary registration code, between `register` and `get_token`.
    pub fn registration_code(&self) -> Option<String> {
        self.code.lock().expect("code lock poisoned").clone()
    }

    pub fn filesystem(&self) -> Option<&Arc<Filesystem>> {
        self.fs.as_ref()
    }

    pub fn transfers(&self) -> Option<&Arc<TransferManager>> {
        self.transfers.as_ref()
    }

    pub fn conditions(&self) -> &ConditionTree {
        &self.conditions
    }

    /// Outbound queue statistics: (enqueued, dropped).
    pub fn event_stats(&self) -> (u64, u64) {
        (self.queue.events_enqueued(), self.queue.events_dropped())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Asks the service for a temporary registration code.
    ///
    /// Requires a configured server URL and no token yet.
    pub fn register(&self) -> SdkResult<String> {
        if self.is_registered() {
            return Err(SdkError::TokenAlreadySet);
        }

        let request = self.common_headers(HttpRequest::post("/p/register"));
        let response = match self.transport.send(&request) {
            Ok(response) => response,
            Err(err) => {
                self.conditions
                    .set("INTERNET", false, Some(&err.to_string()));
                return Err(SdkError::Unregistered);
            }
        };
        self.conditions.set("INTERNET", true, None);
        if !response.is_success() {
            self.conditions.set("HTTP", false, Some("registration failed"));
            return Err(status_error(&response));
        }
        self.conditions.set("HTTP", true, None);

        let code = response
            .header("Code")
            .map(str::to_string)
            .or_else(|| {
                response
                    .json()
                    .and_then(|v| v["code"].as_str().map(str::to_string))
            })
            .ok_or_else(|| SdkError::HttpStatus {
                status: response.status,
                message: "registration response carried no code".to_string(),
            })?;
        info!(%code, "registration code issued");
        *self.code.lock().expect("code lock poisoned") = Some(code.clone());
        Ok(code)
    }

    /// Polls the registration endpoint for the token.
    ///
    /// `Ok(None)` while the user has not finished registration on the web;
    /// `Err(RegistrationRejected)` once the service terminally refuses.
    pub fn get_token(&self, code: &str) -> SdkResult<Option<String>> {
        if self.is_registered() {
            return Err(SdkError::TokenAlreadySet);
        }
        let request = self.common_headers(HttpRequest::get(format!("/p/register?code={code}")));
        let response = self
            .transport
            .send(&request)
            .map_err(|err| {
                self.conditions
                    .set("INTERNET", false, Some(&err.to_string()));
                err
            })?;
        self.conditions.set("INTERNET", true, None);

        match response.status {
            202 => Ok(None),
            status if (200..300).contains(&status) => {
                let token = response
                    .header("Printer-Token")
                    .map(str::to_string)
                    .or_else(|| {
                        response
                            .json()
                            .and_then(|v| v["token"].as_str().map(str::to_string))
                    })
                    .ok_or_else(|| SdkError::HttpStatus {
                        status,
                        message: "registration response carried no token".to_string(),
                    })?;
                self.set_token(&token)?;
                *self.code.lock().expect("code lock poisoned") = None;
                self.conditions.set("TOKEN", true, None);
                info!("registration complete");
                Ok(Some(token))
            }
            _ => {
                self.conditions
                    .set("TOKEN", false, Some("registration rejected"));
                Err(SdkError::RegistrationRejected)
            }
        }
    }

    /// Sets the token. May succeed exactly once.
    pub fn set_token(&self, token: &str) -> SdkResult<()> {
        let mut slot = self.token.lock().expect("token lock poisoned");
        if slot.is_some() {
            return Err(SdkError::TokenAlreadySet);
        }
        *slot = Some(token.to_string());
        drop(slot);
        if let Some(transfers) = &self.transfers {
            transfers.set_token(token);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Producer-context API
    // ------------------------------------------------------------------

    /// Merges fields into the pending telemetry slot.
    ///
    /// Never blocks on I/O. Discarded while no token is set.
    pub fn telemetry(&self, update: Telemetry) {
        if !self.is_registered() {
            debug!("telemetry discarded: not registered");
            return;
        }
        self.telemetry_slot
            .lock()
            .expect("telemetry lock poisoned")
            .merge(update);
    }

    /// Changes the printer state, enqueueing `STATE_CHANGED` iff it
    /// actually changed. Forbidden transitions are errors.
    pub fn set_state(
        &self,
        new: PrinterState,
        source: StateSource,
        data: Map<String, Value>,
    ) -> SdkResult<()> {
        // The event is enqueued under the state lock, so two racing
        // set_state calls cannot publish their events out of order.
        let mut state = self.state.lock().expect("state lock poisoned");
        let old = *state;
        if old == new {
            return Ok(());
        }
        if !old.can_transition_to(new) {
            return Err(SdkError::Transition(TransitionError { from: old, to: new }));
        }
        *state = new;
        let mut event = Event::new(EventKind::StateChanged, source)
            .with_data("state", Value::from(new.as_str()))
            .with_data("old_state", Value::from(old.as_str()));
        for (key, value) in data {
            event = event.with_data(key, value);
        }
        self.queue.push(event);
        Ok(())
    }

    /// Enqueues an arbitrary event (the `event_cb` of the public contract).
    pub fn emit_event(&self, event: Event) {
        self.queue.push(event);
    }

    /// Registers (or replaces) the handler for a command kind.
    pub fn handler<F>(&self, kind: CommandKind, handler: F)
    where
        F: Fn(&Printer, &Command) -> SdkResult<HandlerOutcome> + Send + Sync + 'static,
    {
        self.dispatcher.register(kind, Arc::new(handler));
    }

    // ------------------------------------------------------------------
    // Handler context
    // ------------------------------------------------------------------

    /// Runs the pending command, if any. Called from the handler thread in
    /// a loop; the communication loop never invokes handlers.
    ///
    /// Returns true when a command was executed.
    pub fn command(&self) -> bool {
        let Some(command) = self.dispatcher.take_pending() else {
            return false;
        };
        let kind = command.payload.kind();
        debug!(id = %command.id, %kind, "running command");

        let result = match self.dispatcher.handler_for(kind) {
            Some(handler) => handler(self, &command),
            None => Err(SdkError::CommandRejected(format!(
                "no handler registered for {kind}"
            ))),
        };

        match result {
            Ok(outcome) => {
                let suppressed = self.dispatcher.finish(command.id, CommandState::Finished);
                if !suppressed {
                    let kind = outcome.event.unwrap_or(EventKind::Finished);
                    let mut event = Event::new(kind, outcome.source).with_command(command.id);
                    for (key, value) in outcome.data {
                        event = event.with_data(key, value);
                    }
                    self.queue.push(event);
                }
            }
            Err(SdkError::CommandRejected(reason)) => {
                let suppressed = self.dispatcher.finish(command.id, CommandState::Rejected);
                if !suppressed {
                    self.queue.push(
                        Event::new(EventKind::Rejected, EventSource::Connect)
                            .with_command(command.id)
                            .with_reason(reason),
                    );
                }
            }
            Err(err) => {
                let suppressed = self.dispatcher.finish(command.id, CommandState::Failed);
                if !suppressed {
                    self.queue.push(
                        Event::new(EventKind::Failed, EventSource::Connect)
                            .with_command(command.id)
                            .with_reason(err.to_string())
                            .with_priority(),
                    );
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // The loop
    // ------------------------------------------------------------------

    /// Runs the communication loop until [`stop_loop`] is called.
    ///
    /// Single-threaded cooperative scheduling: one outbound request at a
    /// time, composed from (in order) a priority event, due telemetry, or
    /// the next queued event.
    ///
    /// [`stop_loop`]: Printer::stop_loop
    pub fn run_loop(&self) {
        info!("communication loop starting");
        let telemetry_interval = Duration::from_secs(self.timing.telemetry_interval_secs);
        let mut backoff = Backoff::new(
            Duration::from_secs(self.timing.retry_backoff_secs.max(1)),
            Duration::from_secs(self.timing.max_backoff_secs.max(1)),
        );
        let mut last_telemetry: Option<Instant> = None;

        while !self.stop.load(Ordering::SeqCst) {
            if !self.is_registered() {
                self.sleep_observing_stop(backoff.base());
                continue;
            }

            if let Some(event) = self.queue.pop_priority() {
                self.send_event(event, &mut backoff);
            } else if last_telemetry.is_none_or(|t| t.elapsed() >= telemetry_interval) {
                self.send_telemetry(&mut backoff);
                last_telemetry = Some(Instant::now());
            } else if let Some(event) = self.queue.pop_wait() {
                self.send_event(event, &mut backoff);
            }
            // pop_wait bounded the idle sleep; nothing else to do here.
        }

        self.flush_events();
        info!("communication loop stopped");
    }

    /// Stops the loop and aborts all running transfers.
    ///
    /// Pending events are flushed best-effort for up to 2 seconds before
    /// `run_loop` returns; transfer workers are joined here.
    pub fn stop_loop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(transfers) = &self.transfers {
            transfers.shutdown();
        }
    }

    fn sleep_observing_stop(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep((deadline - now).min(STOP_SLICE));
        }
    }

    /// Common headers every request carries.
    fn common_headers(&self, mut request: HttpRequest) -> HttpRequest {
        if let Some(token) = self.token.lock().expect("token lock poisoned").as_deref() {
            request = request.with_header("Token", token);
        }
        request = request
            .with_header("Fingerprint", &self.fingerprint)
            .with_header("Printer-Type", self.printer_type.as_str())
            .with_header("SDK-Version", SDK_VERSION);
        if let Some(firmware) = &self.firmware_version {
            request = request.with_header("Printer-Version", firmware);
        }
        if self.skew.lock().expect("skew lock poisoned").observe(self.clock.as_ref()) {
            request = request.with_header("Clock-Adjusted", "1");
        }
        request
    }

    fn send_telemetry(&self, backoff: &mut Backoff) {
        let telemetry = std::mem::take(
            &mut *self
                .telemetry_slot
                .lock()
                .expect("telemetry lock poisoned"),
        );
        let body = telemetry.to_body(self.state(), self.dispatcher.command_id_in_progress());
        let request = self.common_headers(HttpRequest::post("/p/telemetry").with_json(&body));

        match self.transport.send(&request) {
            Ok(response) => self.handle_response(&response, backoff),
            Err(err) => self.handle_network_error(&err, backoff),
        }
    }

    fn send_event(&self, event: Event, backoff: &mut Backoff) {
        let body = self.event_body(&event);
        let request = self.common_headers(HttpRequest::post("/p/events").with_json(&body));

        match self.transport.send(&request) {
            Ok(response) => {
                if response.status >= 500 {
                    // Server trouble: the event is retried after backoff.
                    self.queue.push_front(event);
                }
                self.handle_response(&response, backoff);
            }
            Err(err) => {
                // Network trouble: ditto.
                self.queue.push_front(event);
                self.handle_network_error(&err, backoff);
            }
        }
    }

    /// Converts a queued event into its wire body.
    ///
    /// The timestamp is the wall-clock time of the *enqueue*, reconstructed
    /// from the event's monotonic stamp at send time.
    fn event_body(&self, event: &Event) -> Value {
        let age = event.queued_at.elapsed().as_secs() as i64;
        let timestamp = self.clock.now().as_secs() - age;
        let mut body = Map::new();
        body.insert("event".into(), Value::from(event.kind.as_str()));
        body.insert("source".into(), Value::from(event.source.as_str()));
        body.insert("state".into(), Value::from(self.state().as_str()));
        body.insert("timestamp".into(), Value::from(timestamp));
        if let Some(id) = event.command_id {
            body.insert("command_id".into(), Value::from(u32::from(id)));
        }
        if let Some(id) = event.transfer_id {
            body.insert("transfer_id".into(), Value::from(u32::from(id)));
        }
        if let Some(reason) = &event.reason {
            body.insert("reason".into(), Value::from(reason.as_str()));
        }
        if !event.data.is_empty() {
            body.insert("data".into(), Value::Object(event.data.clone()));
        }
        Value::Object(body)
    }

    fn handle_response(&self, response: &HttpResponse, backoff: &mut Backoff) {
        if let Some(retry_after) = response
            .header("Retry-After")
            .and_then(|v| v.parse::<u64>().ok())
        {
            debug!(retry_after, "server requested a pause");
            self.sleep_observing_stop(Duration::from_secs(retry_after));
        }

        if response.is_success() {
            backoff.reset();
            self.conditions.set("INTERNET", true, None);
            self.conditions.set("HTTP", true, None);
            self.conditions.set("API", true, None);
            if let Some(id) = response.header("Command-Id") {
                self.handle_new_command(id.to_string(), response);
            }
            return;
        }

        if (400..500).contains(&response.status) {
            // Client errors are terminal: update conditions, never retry.
            let message = response
                .json()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            warn!(status = response.status, %message, "service refused the request");
            if matches!(response.status, 401 | 403) {
                self.conditions.set("TOKEN", false, Some(&message));
            } else {
                self.conditions.set("API", false, Some(&message));
            }
            if let Some(command_id) = response
                .json()
                .and_then(|v| v["command_id"].as_u64())
                .map(|v| v as u32)
            {
                self.queue.push(
                    Event::new(EventKind::Failed, EventSource::Connect)
                        .with_command(command_id.into())
                        .with_reason(message)
                        .with_priority(),
                );
            }
            return;
        }

        // 5xx: transient server failure.
        warn!(status = response.status, "server error; backing off");
        self.conditions
            .set("API", false, Some(&format!("HTTP {}", response.status)));
        let wait = backoff.bump();
        self.sleep_observing_stop(wait);
    }

    fn handle_network_error(&self, err: &SdkError, backoff: &mut Backoff) {
        warn!(%err, "send failed; backing off");
        self.conditions.set("INTERNET", false, Some(&err.to_string()));
        let wait = backoff.bump();
        self.sleep_observing_stop(wait);
    }

    /// Parses a command from a telemetry response and offers it for
    /// execution.
    fn handle_new_command(&self, id_header: String, response: &HttpResponse) {
        let Ok(command_id) = id_header.parse::<u32>() else {
            warn!(%id_header, "unparseable Command-Id header");
            return;
        };
        let command_id = printlink_types::CommandId::new(command_id);

        let Some(body) = response.json() else {
            self.queue.push(
                Event::new(EventKind::Rejected, EventSource::Connect)
                    .with_command(command_id)
                    .with_reason("command body is not JSON"),
            );
            return;
        };
        let kind = body["command"].as_str().unwrap_or_default().to_string();
        let args = body["args"].as_array().cloned().unwrap_or_default();
        let kwargs = body["kwargs"].as_object().cloned().unwrap_or_default();
        let force = body["force"].as_bool().unwrap_or(false);

        let payload = match CommandPayload::parse(&kind, &args, &kwargs) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(%err, "command refused at parse");
                self.queue.push(
                    Event::new(EventKind::Rejected, EventSource::Connect)
                        .with_command(command_id)
                        .with_reason(err.to_string()),
                );
                return;
            }
        };
        let command = Command::new(command_id, payload).with_force(force);

        match self.dispatcher.offer(command) {
            Offer::Accepted => {
                self.queue.push(
                    Event::new(EventKind::Accepted, EventSource::Connect).with_command(command_id),
                );
            }
            Offer::RejectedBusy => {
                self.queue.push(
                    Event::new(EventKind::Rejected, EventSource::Connect)
                        .with_command(command_id)
                        .with_reason("busy"),
                );
            }
            Offer::Preempted { rejected } => {
                for old in rejected {
                    // Knocked out by a priority command: jumps the queue.
                    self.queue.push(
                        Event::new(EventKind::Rejected, EventSource::Connect)
                            .with_command(old)
                            .with_reason("preempted")
                            .with_priority(),
                    );
                }
                self.queue.push(
                    Event::new(EventKind::Accepted, EventSource::Connect).with_command(command_id),
                );
            }
            Offer::Duplicate => debug!(%command_id, "duplicate command delivery ignored"),
        }
    }

    /// Drains what the queue still holds, bounded by [`FLUSH_WINDOW`].
    fn flush_events(&self) {
        let deadline = Instant::now() + FLUSH_WINDOW;
        while Instant::now() < deadline {
            let Some(event) = self.queue.pop() else { break };
            let body = self.event_body(&event);
            let request = self.common_headers(HttpRequest::post("/p/events").with_json(&body));
            if self.transport.send(&request).is_err() {
                break;
            }
        }
    }

    // ------------------------------------------------------------------
    // Built-in handlers
    // ------------------------------------------------------------------

    fn register_builtin_handlers(&self) {
        self.dispatcher
            .register(CommandKind::SendInfo, Arc::new(send_info_handler));
        self.dispatcher
            .register(CommandKind::SetPrinterReady, Arc::new(set_ready_handler));
        self.dispatcher
            .register(CommandKind::CancelPrinterReady, Arc::new(cancel_ready_handler));

        if self.fs.is_some() {
            self.dispatcher
                .register(CommandKind::CreateFolder, Arc::new(create_folder_handler));
            self.dispatcher
                .register(CommandKind::DeleteFolder, Arc::new(delete_handler));
            self.dispatcher
                .register(CommandKind::DeleteFile, Arc::new(delete_handler));
            self.dispatcher
                .register(CommandKind::SendFileInfo, Arc::new(send_file_info_handler));
        }
        if self.transfers.is_some() {
            self.dispatcher
                .register(CommandKind::StartUrlDownload, Arc::new(start_download_handler));
            self.dispatcher.register(
                CommandKind::StartConnectDownload,
                Arc::new(start_download_handler),
            );
            self.dispatcher
                .register(CommandKind::StopTransfer, Arc::new(stop_transfer_handler));
            self.dispatcher.register(
                CommandKind::SendTransferInfo,
                Arc::new(send_transfer_info_handler),
            );
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn status_error(response: &HttpResponse) -> SdkError {
    SdkError::HttpStatus {
        status: response.status,
        message: response
            .json()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or_default(),
    }
}

/// Exponential backoff with jitter, capped.
struct Backoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: None,
        }
    }

    fn base(&self) -> Duration {
        self.base
    }

    fn reset(&mut self) {
        self.current = None;
    }

    /// Doubles the wait (from `base`), capped at `max`, with up to 10%
    /// jitter so a fleet of printers does not reconnect in lockstep.
    fn bump(&mut self) -> Duration {
        let next = match self.current {
            None => self.base,
            Some(current) => (current * 2).min(self.max),
        };
        self.current = Some(next);
        let jitter = rand::thread_rng().gen_range(0.0..0.1);
        next.mul_f64(1.0 + jitter).min(self.max)
    }
}

// ----------------------------------------------------------------------
// Built-in handler functions
// ----------------------------------------------------------------------

fn send_info_handler(printer: &Printer, _command: &Command) -> SdkResult<HandlerOutcome> {
    let mut outcome = HandlerOutcome::with_event(EventSource::Connect, EventKind::Info);
    outcome.data = build_info(printer);
    Ok(outcome)
}

fn set_ready_handler(printer: &Printer, _command: &Command) -> SdkResult<HandlerOutcome> {
    printer.set_state(PrinterState::Ready, StateSource::Connect, Map::new())?;
    Ok(HandlerOutcome::finished(EventSource::Connect))
}

fn cancel_ready_handler(printer: &Printer, _command: &Command) -> SdkResult<HandlerOutcome> {
    printer.set_state(PrinterState::Idle, StateSource::Connect, Map::new())?;
    Ok(HandlerOutcome::finished(EventSource::Connect))
}

fn create_folder_handler(printer: &Printer, command: &Command) -> SdkResult<HandlerOutcome> {
    let fs = printer.fs.as_ref().expect("registered only with fs");
    let CommandPayload::CreateFolder { path } = &command.payload else {
        return Err(SdkError::CommandRejected("malformed arguments".into()));
    };
    fs.create_folder(path, command.force)?;
    Ok(HandlerOutcome::finished(EventSource::Connect))
}

fn delete_handler(printer: &Printer, command: &Command) -> SdkResult<HandlerOutcome> {
    let fs = printer.fs.as_ref().expect("registered only with fs");
    let path = match &command.payload {
        CommandPayload::DeleteFolder { path } | CommandPayload::DeleteFile { path } => path,
        _ => return Err(SdkError::CommandRejected("malformed arguments".into())),
    };
    // A download racing toward this path dies with it.
    if let Some(transfers) = &printer.transfers {
        transfers.abort_by_path(path, "deleted");
    }
    fs.delete(path, command.force)?;
    Ok(HandlerOutcome::finished(EventSource::Connect))
}

fn send_file_info_handler(printer: &Printer, command: &Command) -> SdkResult<HandlerOutcome> {
    let fs = printer.fs.as_ref().expect("registered only with fs");
    let CommandPayload::SendFileInfo { path } = &command.payload else {
        return Err(SdkError::CommandRejected("malformed arguments".into()));
    };
    let (node, metadata) = fs.file_info(path)?;
    let mut outcome = HandlerOutcome::with_event(EventSource::Connect, EventKind::Info)
        .with_data("path", Value::from(node.path.as_str()))
        .with_data("size", Value::from(node.size))
        .with_data("m_timestamp", Value::from(node.m_timestamp))
        .with_data("read_only", Value::from(node.read_only));
    if let Some(metadata) = metadata {
        outcome = outcome.with_data("meta", json!(metadata));
    }
    Ok(outcome)
}

fn start_download_handler(printer: &Printer, command: &Command) -> SdkResult<HandlerOutcome> {
    let transfers = printer
        .transfers
        .as_ref()
        .expect("registered only with transfers");
    let spec = match &command.payload {
        CommandPayload::StartUrlDownload {
            url,
            destination,
            to_print,
        } => TransferSpec {
            direction: TransferDirection::DownloadFromUrl,
            url: url.clone(),
            path: destination.clone(),
            command_id: Some(command.id),
            to_print: *to_print,
            throttle: None,
        },
        CommandPayload::StartConnectDownload {
            source,
            destination,
            to_print,
        } => {
            let base = printer.server_url.clone().unwrap_or_default();
            TransferSpec {
                direction: TransferDirection::DownloadFromConnect,
                url: format!("{}{}", base.trim_end_matches('/'), source),
                path: destination.clone(),
                command_id: Some(command.id),
                to_print: *to_print,
                throttle: None,
            }
        }
        _ => return Err(SdkError::CommandRejected("malformed arguments".into())),
    };
    let id = transfers.enqueue(spec)?;
    Ok(HandlerOutcome::finished(EventSource::Connect)
        .with_data("transfer_id", Value::from(u32::from(id))))
}

fn stop_transfer_handler(printer: &Printer, command: &Command) -> SdkResult<HandlerOutcome> {
    let transfers = printer
        .transfers
        .as_ref()
        .expect("registered only with transfers");
    let CommandPayload::StopTransfer { transfer_id } = &command.payload else {
        return Err(SdkError::CommandRejected("malformed arguments".into()));
    };
    match transfer_id {
        Some(id) => transfers.stop((*id).into(), "stopped")?,
        None => {
            let active = transfers.active_snapshots();
            if active.is_empty() {
                return Err(SdkError::CommandRejected("no transfer in progress".into()));
            }
            for snapshot in active {
                transfers.stop(snapshot.id, "stopped")?;
            }
        }
    }
    Ok(HandlerOutcome::finished(EventSource::Connect))
}

fn send_transfer_info_handler(printer: &Printer, _command: &Command) -> SdkResult<HandlerOutcome> {
    let transfers = printer
        .transfers
        .as_ref()
        .expect("registered only with transfers");
    let active = transfers.active_snapshots();
    let Some(snapshot) = active.first() else {
        return Err(SdkError::CommandRejected("no transfer in progress".into()));
    };
    let mut outcome = HandlerOutcome::with_event(EventSource::Connect, EventKind::TransferInfo)
        .with_data("transfer_id", Value::from(u32::from(snapshot.id)))
        .with_data("path", Value::from(snapshot.path.as_str()))
        .with_data("url", Value::from(snapshot.url.as_str()))
        .with_data("transferred", Value::from(snapshot.bytes_transferred))
        .with_data("to_print", Value::from(snapshot.to_print));
    if let Some(total) = snapshot.total_bytes {
        outcome = outcome.with_data("total", Value::from(total));
    }
    if let Some(progress) = snapshot.progress_percent {
        outcome = outcome.with_data("progress", Value::from(progress));
    }
    if let Some(remaining) = snapshot.time_remaining {
        outcome = outcome.with_data("time_remaining", Value::from(remaining));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_of_known_input() {
        // sha256("SN123")
        assert_eq!(
            sha256_hex(b"SN123"),
            "eaa51384b8e9f0c15c46c3534ce364dc3bc617c198f09dced21342f175be5e33"
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let first = b.bump();
        assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1150));
        let mut last = first;
        for _ in 0..10 {
            last = b.bump();
        }
        assert!(last <= Duration::from_secs(60));
        b.reset();
        let again = b.bump();
        assert!(again < Duration::from_millis(1150));
    }
}
