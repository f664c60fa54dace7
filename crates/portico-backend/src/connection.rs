// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One worker's backend session and its state machines.
//!
//! Backend lifecycle:
//!
//! ```text
//! Init → LoggingIn → Ready ⇄ (request execution)
//!                    Ready → LoggingOff → Init        (recycle)
//!        LoggingIn → InitError                        (failed / timed out)
//!                    LoggingOff → FinError            (failed / timed out)
//! ```
//!
//! InitError/FinError are terminal until the reconciliation loop calls
//! `reset_error()`. The request machine moves WaitingForRequest →
//! Preparing → Prepared{Ok,Warn,Error} → Executing → back to waiting, with
//! ExecutionError and the request-timeout flag as the failure exits.
//!
//! The session handle and object cache live in a slot that is physically
//! *moved* into every blocking call; a timed-out call keeps the slot as a
//! pending join handle, so no second call can reach the non-reentrant
//! native handle until the first one has actually returned.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use portico_schema::{FieldSpec, SchemaModel};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::blob::ExchangeDir;
use crate::client::{
    BackendCallError, BackendClient, BackendCreds, BackendObject, BackendSession,
    CALL_ERROR_DESCRIPTION, CALL_ERROR_TYPE, CALL_INIT, CALL_RUN, CALL_VALIDATE,
};
use crate::deadline::{DeadlineOutcome, join_discard, run_with_deadline};
use crate::journal::{CallJournal, CallPhase, JournalEntry, strip_vowels};
use crate::marshal::{self, MarshalCtx, MarshalError};
use crate::owner::derive_owner_id;

/// Backend session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Init,
    LoggingIn,
    Ready,
    LoggingOff,
    InitError,
    FinError,
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendState::Init => "Init",
            BackendState::LoggingIn => "LoggingIn",
            BackendState::Ready => "Ready",
            BackendState::LoggingOff => "LoggingOff",
            BackendState::InitError => "InitError",
            BackendState::FinError => "FinError",
        })
    }
}

/// In-flight request lifecycle on one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    NotApplicable,
    WaitingForRequest,
    Preparing,
    PreparedOk,
    PreparedWarn,
    PreparedError,
    Executing,
    ExecutionError,
}

impl RequestState {
    /// Something is mid-flight on this worker.
    pub fn in_flight(self) -> bool {
        !matches!(
            self,
            RequestState::NotApplicable | RequestState::WaitingForRequest
        )
    }

    /// A failure exit that the reconciliation loop must repair.
    pub fn failed(self) -> bool {
        matches!(
            self,
            RequestState::PreparedError | RequestState::ExecutionError
        )
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RequestState::NotApplicable => "NotApplicable",
            RequestState::WaitingForRequest => "WaitingForRequest",
            RequestState::Preparing => "Preparing",
            RequestState::PreparedOk => "PreparedOk",
            RequestState::PreparedWarn => "PreparedWarn",
            RequestState::PreparedError => "PreparedError",
            RequestState::Executing => "Executing",
            RequestState::ExecutionError => "ExecutionError",
        })
    }
}

/// Deadlines and credentials for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub creds: BackendCreds,
    pub login_deadline: Duration,
    pub logoff_deadline: Duration,
    pub request_deadline: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            creds: BackendCreds::default(),
            login_deadline: Duration::from_secs(30),
            logoff_deadline: Duration::from_secs(15),
            request_deadline: Duration::from_secs(60),
        }
    }
}

/// Read-only snapshot for the reconciliation loop and status views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStatus {
    pub state: BackendState,
    pub timed_out: bool,
    pub request: RequestState,
    pub request_timed_out: bool,
    pub invalid_state: bool,
    pub pending: bool,
}

/// Session handle plus the per-class object cache. Creating an object is
/// moderately expensive, so handles are pooled for the session's lifetime.
struct SessionBundle {
    session: Box<dyn BackendSession>,
    objects: HashMap<String, Box<dyn BackendObject>>,
}

impl SessionBundle {
    fn new(session: Box<dyn BackendSession>) -> Self {
        Self {
            session,
            objects: HashMap::new(),
        }
    }

    fn object_for(&mut self, class: &str) -> Result<&mut dyn BackendObject, BackendCallError> {
        if !self.objects.contains_key(class) {
            let object = self.session.create_object(class)?;
            self.objects.insert(class.to_string(), object);
        }
        match self.objects.get_mut(class) {
            Some(object) => Ok(object.as_mut()),
            None => Err(BackendCallError::new("object cache inconsistent")),
        }
    }
}

type LoginReturn = Result<Box<dyn BackendSession>, BackendCallError>;
type LogoffReturn = Result<(), BackendCallError>;
type CallReturn = (SessionBundle, Result<Value, ExecuteFailure>);

/// Where the session currently is. `Pending*` fences a call that outlived
/// its deadline: the handle must be joined before the session is usable.
enum SessionSlot {
    Empty,
    Idle(SessionBundle),
    PendingLogin(JoinHandle<LoginReturn>),
    PendingLogoff(JoinHandle<LogoffReturn>),
    PendingCall(JoinHandle<CallReturn>),
}

impl SessionSlot {
    fn is_pending(&self) -> bool {
        matches!(
            self,
            SessionSlot::PendingLogin(_)
                | SessionSlot::PendingLogoff(_)
                | SessionSlot::PendingCall(_)
        )
    }

    /// `Some(finished)` when pending, `None` otherwise.
    fn pending_finished(&self) -> Option<bool> {
        match self {
            SessionSlot::PendingLogin(h) => Some(h.is_finished()),
            SessionSlot::PendingLogoff(h) => Some(h.is_finished()),
            SessionSlot::PendingCall(h) => Some(h.is_finished()),
            _ => None,
        }
    }
}

enum ExecuteFailure {
    Business { code: i64, message: String },
    Marshal(MarshalError),
}

/// Result of the prepare phase, from the consumer's point of view.
#[derive(Debug)]
pub enum PrepareOutcome {
    /// Proceed: ack, then execute.
    Ok,
    /// Recoverable and caller-facing: ack, reply with the error, done.
    Warn(PrepareWarning),
    /// Unclassified: nack with requeue; the connection will be recycled.
    Failed(String),
}

/// Caller-facing prepare rejections.
#[derive(Debug)]
pub enum PrepareWarning {
    UnknownMethod(String),
    Marshal(MarshalError),
}

/// Result of the execute phase.
#[derive(Debug)]
pub enum ExecuteOutcome {
    Ok(Value),
    /// Backend declared a business error after `run`.
    Business { code: i64, message: String },
    /// Recoverable output marshalling failure; session stays usable.
    Warn(String),
    /// Unclassified; the connection must be recycled.
    Fatal(String),
    /// Deadline elapsed; the call is fenced off, the worker stands down.
    TimedOut,
}

struct PreparedRequest {
    method: String,
    object_class: String,
    owner_id: String,
}

struct ConnState {
    backend: BackendState,
    timed_out: bool,
    request: RequestState,
    request_timed_out: bool,
    invalid_state: bool,
    slot: SessionSlot,
    prepared: Option<PreparedRequest>,
}

/// One worker's connection to the backend.
pub struct BackendConnection {
    worker_id: u32,
    client: Arc<dyn BackendClient>,
    config: ConnectionConfig,
    model: Arc<SchemaModel>,
    exchange: ExchangeDir,
    journal: Arc<dyn CallJournal>,
    state: Mutex<ConnState>,
}

impl BackendConnection {
    pub fn new(
        worker_id: u32,
        client: Arc<dyn BackendClient>,
        config: ConnectionConfig,
        model: Arc<SchemaModel>,
        exchange: ExchangeDir,
        journal: Arc<dyn CallJournal>,
    ) -> Self {
        Self {
            worker_id,
            client,
            config,
            model,
            exchange,
            journal,
            state: Mutex::new(ConnState {
                backend: BackendState::Init,
                timed_out: false,
                request: RequestState::NotApplicable,
                request_timed_out: false,
                invalid_state: false,
                slot: SessionSlot::Empty,
                prepared: None,
            }),
        }
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    pub async fn status(&self) -> BackendStatus {
        let st = self.state.lock().await;
        BackendStatus {
            state: st.backend,
            timed_out: st.timed_out,
            request: st.request,
            request_timed_out: st.request_timed_out,
            invalid_state: st.invalid_state,
            pending: st.slot.is_pending(),
        }
    }

    /// Blocking login under the login deadline. Init → Ready or InitError.
    pub async fn init(&self) -> BackendState {
        {
            let mut st = self.state.lock().await;
            if st.backend != BackendState::Init || st.slot.is_pending() {
                return st.backend;
            }
            st.backend = BackendState::LoggingIn;
        }

        let client = self.client.clone();
        let creds = self.config.creds.clone();
        let outcome =
            run_with_deadline(self.config.login_deadline, move || client.connect(&creds)).await;

        let mut st = self.state.lock().await;
        match outcome {
            DeadlineOutcome::Completed(Ok(session)) => {
                st.slot = SessionSlot::Idle(SessionBundle::new(session));
                st.backend = BackendState::Ready;
                st.timed_out = false;
                st.invalid_state = false;
                if st.request == RequestState::NotApplicable {
                    st.request = RequestState::WaitingForRequest;
                }
                info!(worker_id = self.worker_id, "Backend session ready");
            }
            DeadlineOutcome::Completed(Err(e)) => {
                if e.invalid_state {
                    st.invalid_state = true;
                }
                st.backend = BackendState::InitError;
                warn!(worker_id = self.worker_id, error = %e, "Backend login failed");
            }
            DeadlineOutcome::Failed(msg) => {
                st.backend = BackendState::InitError;
                warn!(worker_id = self.worker_id, error = %msg, "Backend login panicked");
            }
            DeadlineOutcome::TimedOut(handle) => {
                // Flag only if nothing else moved the machine meanwhile
                if st.backend == BackendState::LoggingIn {
                    st.timed_out = true;
                }
                st.backend = BackendState::InitError;
                st.slot = SessionSlot::PendingLogin(handle);
                warn!(worker_id = self.worker_id, "Backend login timed out");
            }
        }
        st.backend
    }

    /// Blocking logoff under the logoff deadline. Joins any fenced-off call
    /// first; the session must not be dropped while a pending call may still
    /// be inside it. Ends in Init (clean) or FinError.
    pub async fn fin(&self) -> BackendState {
        let taken = {
            let mut st = self.state.lock().await;
            if matches!(
                st.backend,
                BackendState::LoggingIn | BackendState::LoggingOff
            ) {
                return st.backend;
            }
            st.backend = BackendState::LoggingOff;
            st.request = RequestState::NotApplicable;
            st.request_timed_out = false;
            st.prepared = None;
            mem::replace(&mut st.slot, SessionSlot::Empty)
        };

        let bundle = match taken {
            SessionSlot::Idle(bundle) => Some(bundle),
            SessionSlot::Empty => None,
            SessionSlot::PendingLogin(handle) => match join_discard(handle).await {
                Some(Ok(session)) => {
                    debug!(worker_id = self.worker_id, "Late login joined");
                    Some(SessionBundle::new(session))
                }
                _ => None,
            },
            SessionSlot::PendingLogoff(handle) => {
                let _ = join_discard(handle).await;
                None
            }
            SessionSlot::PendingCall(handle) => match join_discard(handle).await {
                Some((bundle, _late_result)) => {
                    debug!(
                        worker_id = self.worker_id,
                        "Late execute joined, result discarded"
                    );
                    Some(bundle)
                }
                None => None,
            },
        };

        let Some(bundle) = bundle else {
            let mut st = self.state.lock().await;
            st.backend = BackendState::Init;
            st.timed_out = false;
            return st.backend;
        };

        let outcome = run_with_deadline(self.config.logoff_deadline, move || {
            let mut bundle = bundle;
            bundle.objects.clear();
            bundle.session.logoff()
        })
        .await;

        let mut st = self.state.lock().await;
        match outcome {
            DeadlineOutcome::Completed(Ok(())) => {
                st.backend = BackendState::Init;
                st.timed_out = false;
                info!(worker_id = self.worker_id, "Backend session closed");
            }
            DeadlineOutcome::Completed(Err(e)) => {
                if e.invalid_state {
                    st.invalid_state = true;
                }
                st.backend = BackendState::FinError;
                warn!(worker_id = self.worker_id, error = %e, "Backend logoff failed");
            }
            DeadlineOutcome::Failed(msg) => {
                st.backend = BackendState::FinError;
                warn!(worker_id = self.worker_id, error = %msg, "Backend logoff panicked");
            }
            DeadlineOutcome::TimedOut(handle) => {
                if st.backend == BackendState::LoggingOff {
                    st.timed_out = true;
                }
                st.backend = BackendState::FinError;
                st.slot = SessionSlot::PendingLogoff(handle);
                warn!(worker_id = self.worker_id, "Backend logoff timed out");
            }
        }
        st.backend
    }

    /// Clear a terminal error state back to Init so the next reconciliation
    /// pass retries the login. Refuses while a fenced-off call is still
    /// running; a finished one is joined and its late result discarded.
    pub async fn reset_error(&self) -> bool {
        let mut st = self.state.lock().await;
        if !matches!(
            st.backend,
            BackendState::InitError | BackendState::FinError
        ) {
            return false;
        }
        match st.slot.pending_finished() {
            Some(false) => return false,
            Some(true) => {
                let taken = mem::replace(&mut st.slot, SessionSlot::Empty);
                // Finished handles join immediately
                match taken {
                    SessionSlot::PendingLogin(handle) => {
                        if let Some(Ok(_session)) = join_discard(handle).await {
                            debug!(
                                worker_id = self.worker_id,
                                "Late login discarded during reset"
                            );
                        }
                    }
                    SessionSlot::PendingLogoff(handle) => {
                        let _ = join_discard(handle).await;
                    }
                    SessionSlot::PendingCall(handle) => {
                        let _ = join_discard(handle).await;
                    }
                    _ => {}
                }
            }
            None => {
                st.slot = SessionSlot::Empty;
            }
        }
        st.backend = BackendState::Init;
        st.timed_out = false;
        st.request = RequestState::NotApplicable;
        st.request_timed_out = false;
        st.prepared = None;
        true
    }

    /// Reset a consumed PreparedWarn back to waiting after the consumer has
    /// acked and replied.
    pub async fn finish_request(&self) {
        let mut st = self.state.lock().await;
        if st.request == RequestState::PreparedWarn {
            st.request = RequestState::WaitingForRequest;
        }
    }

    /// Prepare phase: schema lookup, owner derivation, input marshalling,
    /// object `init` + `validate`. Runs on the blocking pool without a
    /// deadline; only login/logoff/execute carry one.
    #[instrument(skip(self, params), fields(worker_id = self.worker_id, method = %method))]
    pub async fn prepare_request(&self, method: &str, params: &Value) -> PrepareOutcome {
        let started = Instant::now();

        let Some(schema) = self.model.method(method) else {
            let mut st = self.state.lock().await;
            if st.request == RequestState::WaitingForRequest {
                st.request = RequestState::PreparedWarn;
            }
            drop(st);
            self.journal_call(CallPhase::Prepare, method, started, Some("unknown method"));
            return PrepareOutcome::Warn(PrepareWarning::UnknownMethod(method.to_string()));
        };
        let object_class = schema.object_class.clone();
        let input_specs = schema.input.clone();
        let owner_id = derive_owner_id(params.get("user_hash").and_then(Value::as_str));

        let bundle = {
            let mut st = self.state.lock().await;
            if st.backend != BackendState::Ready
                || st.request != RequestState::WaitingForRequest
            {
                return PrepareOutcome::Failed(format!(
                    "worker not ready: backend {} request {}",
                    st.backend, st.request
                ));
            }
            let taken = mem::replace(&mut st.slot, SessionSlot::Empty);
            let SessionSlot::Idle(bundle) = taken else {
                st.slot = taken;
                return PrepareOutcome::Failed("backend session busy".to_string());
            };
            st.request = RequestState::Preparing;
            st.prepared = None;
            bundle
        };

        let model = self.model.clone();
        let exchange = self.exchange.clone();
        let closure_class = object_class.clone();
        let closure_owner = owner_id.clone();
        let params = params.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut bundle = bundle;
            let result = prepare_in_bundle(
                &mut bundle,
                &model,
                &exchange,
                &closure_owner,
                &closure_class,
                &input_specs,
                &params,
            );
            (bundle, result)
        })
        .await;

        let (bundle, result) = match joined {
            Ok(pair) => pair,
            Err(join_err) => {
                let mut st = self.state.lock().await;
                st.request = RequestState::PreparedError;
                drop(st);
                self.journal_call(
                    CallPhase::Prepare,
                    method,
                    started,
                    Some(&join_err.to_string()),
                );
                return PrepareOutcome::Failed(format!("prepare panicked: {join_err}"));
            }
        };

        let mut st = self.state.lock().await;
        st.slot = SessionSlot::Idle(bundle);
        match result {
            Ok(()) => {
                st.request = RequestState::PreparedOk;
                st.prepared = Some(PreparedRequest {
                    method: method.to_string(),
                    object_class,
                    owner_id,
                });
                drop(st);
                self.journal_call(CallPhase::Prepare, method, started, None);
                PrepareOutcome::Ok
            }
            Err(e) if e.is_fatal() => {
                if let MarshalError::Call(call) = &e
                    && call.invalid_state
                {
                    st.invalid_state = true;
                }
                st.request = RequestState::PreparedError;
                drop(st);
                let msg = e.to_string();
                self.journal_call(CallPhase::Prepare, method, started, Some(&msg));
                PrepareOutcome::Failed(msg)
            }
            Err(e) => {
                st.request = RequestState::PreparedWarn;
                drop(st);
                self.journal_call(CallPhase::Prepare, method, started, Some(&e.to_string()));
                PrepareOutcome::Warn(PrepareWarning::Marshal(e))
            }
        }
    }

    /// Execute phase: object `run`, declared-error check, output collection,
    /// all under the request deadline.
    #[instrument(skip(self), fields(worker_id = self.worker_id))]
    pub async fn execute_request(&self) -> ExecuteOutcome {
        let started = Instant::now();

        let (bundle, prepared, output_specs) = {
            let mut st = self.state.lock().await;
            if st.request != RequestState::PreparedOk {
                return ExecuteOutcome::Fatal(format!(
                    "execute without prepared request (state {})",
                    st.request
                ));
            }
            let Some(prepared) = st.prepared.take() else {
                return ExecuteOutcome::Fatal("prepared context missing".to_string());
            };
            let taken = mem::replace(&mut st.slot, SessionSlot::Empty);
            let SessionSlot::Idle(bundle) = taken else {
                st.slot = taken;
                return ExecuteOutcome::Fatal("backend session busy".to_string());
            };
            let output_specs = self
                .model
                .method(&prepared.method)
                .map(|s| s.output.clone())
                .unwrap_or_default();
            st.request = RequestState::Executing;
            (bundle, prepared, output_specs)
        };

        let method = prepared.method.clone();
        let model = self.model.clone();
        let exchange = self.exchange.clone();
        let outcome = run_with_deadline(self.config.request_deadline, move || {
            let mut bundle = bundle;
            let result = execute_in_bundle(&mut bundle, &model, &exchange, &prepared, &output_specs);
            (bundle, result)
        })
        .await;

        let mut st = self.state.lock().await;
        match outcome {
            DeadlineOutcome::Completed((bundle, result)) => {
                st.slot = SessionSlot::Idle(bundle);
                match result {
                    Ok(value) => {
                        st.request = RequestState::WaitingForRequest;
                        drop(st);
                        self.journal_call(CallPhase::Execute, &method, started, None);
                        ExecuteOutcome::Ok(value)
                    }
                    Err(ExecuteFailure::Business { code, message }) => {
                        st.request = RequestState::WaitingForRequest;
                        drop(st);
                        self.journal_call(CallPhase::Execute, &method, started, Some(&message));
                        ExecuteOutcome::Business { code, message }
                    }
                    Err(ExecuteFailure::Marshal(e)) if e.is_fatal() => {
                        if let MarshalError::Call(call) = &e
                            && call.invalid_state
                        {
                            st.invalid_state = true;
                        }
                        st.request = RequestState::ExecutionError;
                        drop(st);
                        let msg = e.to_string();
                        self.journal_call(CallPhase::Execute, &method, started, Some(&msg));
                        ExecuteOutcome::Fatal(msg)
                    }
                    Err(ExecuteFailure::Marshal(e)) => {
                        st.request = RequestState::WaitingForRequest;
                        drop(st);
                        let msg = e.to_string();
                        self.journal_call(CallPhase::Execute, &method, started, Some(&msg));
                        ExecuteOutcome::Warn(msg)
                    }
                }
            }
            DeadlineOutcome::Failed(msg) => {
                st.request = RequestState::ExecutionError;
                drop(st);
                self.journal_call(CallPhase::Execute, &method, started, Some(&msg));
                ExecuteOutcome::Fatal(msg)
            }
            DeadlineOutcome::TimedOut(handle) => {
                if st.request == RequestState::Executing {
                    st.request_timed_out = true;
                }
                st.slot = SessionSlot::PendingCall(handle);
                drop(st);
                self.journal_call(CallPhase::Execute, &method, started, Some("timed out"));
                warn!(
                    worker_id = self.worker_id,
                    method = %method,
                    "Execute exceeded deadline, call fenced off"
                );
                ExecuteOutcome::TimedOut
            }
        }
    }

    fn journal_call(&self, phase: CallPhase, method: &str, started: Instant, error: Option<&str>) {
        self.journal.record(JournalEntry {
            worker_id: self.worker_id,
            phase,
            method: strip_vowels(method),
            elapsed_ms: started.elapsed().as_millis() as u64,
            error: error.map(String::from),
        });
    }
}

fn prepare_in_bundle(
    bundle: &mut SessionBundle,
    model: &SchemaModel,
    exchange: &ExchangeDir,
    owner_id: &str,
    object_class: &str,
    input_specs: &[FieldSpec],
    params: &Value,
) -> Result<(), MarshalError> {
    let object = bundle.object_for(object_class)?;
    let ctx = MarshalCtx {
        model,
        exchange,
        owner_id,
    };
    marshal::marshal_input(&ctx, object, input_specs, params)?;
    object.call(CALL_INIT, &[])?;
    object.call(CALL_VALIDATE, &[])?;
    Ok(())
}

fn execute_in_bundle(
    bundle: &mut SessionBundle,
    model: &SchemaModel,
    exchange: &ExchangeDir,
    prepared: &PreparedRequest,
    output_specs: &[FieldSpec],
) -> Result<Value, ExecuteFailure> {
    let object = bundle
        .object_for(&prepared.object_class)
        .map_err(|e| ExecuteFailure::Marshal(MarshalError::Call(e)))?;

    object
        .call(CALL_RUN, &[])
        .map_err(|e| ExecuteFailure::Marshal(MarshalError::Call(e)))?;

    let error_type = object
        .call(CALL_ERROR_TYPE, &[])
        .map_err(|e| ExecuteFailure::Marshal(MarshalError::Call(e)))?;
    let code = error_type
        .as_i64()
        .or_else(|| error_type.as_str().and_then(|s| s.trim().parse().ok()))
        .unwrap_or(0);
    if code != 0 {
        let description = object
            .call(CALL_ERROR_DESCRIPTION, &[])
            .map_err(|e| ExecuteFailure::Marshal(MarshalError::Call(e)))?;
        return Err(ExecuteFailure::Business {
            code,
            message: description.as_str().unwrap_or_default().to_string(),
        });
    }

    let ctx = MarshalCtx {
        model,
        exchange,
        owner_id: &prepared.owner_id,
    };
    marshal::collect_output(&ctx, object, output_specs).map_err(ExecuteFailure::Marshal)
}

impl ExecuteFailure {
    fn is_fatal(&self) -> bool {
        match self {
            ExecuteFailure::Business { .. } => false,
            ExecuteFailure::Marshal(e) => e.is_fatal(),
        }
    }
}
