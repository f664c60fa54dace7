// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic fake backend.
//!
//! Implements the full connector contract without any native code:
//! lifecycle calls succeed with zero results, setters store their argument,
//! getters echo the stored value back, iterators report "no more". Knobs
//! simulate the failure modes the real connector exhibits: refused logins,
//! slow calls (for deadline tests), per-call failures, backend-declared
//! business errors, and the poisoned "invalid native state" mode.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use crate::client::{
    BackendCallError, BackendClient, BackendCreds, BackendObject, BackendSession, CALL_ERROR_DESCRIPTION,
    CALL_ERROR_TYPE, CALL_INIT, CALL_RUN, CALL_VALIDATE,
};

#[derive(Debug, Default)]
struct MockConfig {
    fail_login: bool,
    call_delay: Duration,
    business_error: Option<(i64, String)>,
    failing_calls: HashSet<String>,
    poisoned: AtomicBool,
    login_count: AtomicUsize,
    logoff_count: AtomicUsize,
}

impl MockConfig {
    fn check(&self) -> Result<(), BackendCallError> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(BackendCallError::invalid_state("invalid native state"));
        }
        if !self.call_delay.is_zero() {
            std::thread::sleep(self.call_delay);
        }
        Ok(())
    }
}

/// Fake connector for tests and dev mode.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    config: Arc<MockConfig>,
}

impl MockBackend {
    /// Mock where every operation succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose logins are refused.
    pub fn failing_login() -> Self {
        Self {
            config: Arc::new(MockConfig {
                fail_login: true,
                ..Default::default()
            }),
        }
    }

    /// Mock where every backend call sleeps first. Used to trip deadlines.
    pub fn with_call_delay(delay: Duration) -> Self {
        Self {
            config: Arc::new(MockConfig {
                call_delay: delay,
                ..Default::default()
            }),
        }
    }

    /// Mock whose `run` reports a backend-declared business error.
    pub fn with_business_error(code: i64, message: impl Into<String>) -> Self {
        Self {
            config: Arc::new(MockConfig {
                business_error: Some((code, message.into())),
                ..Default::default()
            }),
        }
    }

    /// Mock where the named calls fail (without the corruption marker).
    pub fn with_failing_calls(names: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            config: Arc::new(MockConfig {
                failing_calls: names.into_iter().map(String::from).collect(),
                ..Default::default()
            }),
        }
    }

    /// Flip the poisoned flag: from then on every operation fails with the
    /// "invalid native state" corruption marker.
    pub fn poison(&self) {
        self.config.poisoned.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.config.poisoned.store(false, Ordering::SeqCst);
    }

    pub fn login_count(&self) -> usize {
        self.config.login_count.load(Ordering::SeqCst)
    }

    pub fn logoff_count(&self) -> usize {
        self.config.logoff_count.load(Ordering::SeqCst)
    }
}

impl BackendClient for MockBackend {
    fn connect(&self, _creds: &BackendCreds) -> Result<Box<dyn BackendSession>, BackendCallError> {
        self.config.check()?;
        if self.config.fail_login {
            return Err(BackendCallError::new("login refused"));
        }
        self.config.login_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            config: self.config.clone(),
        }))
    }
}

struct MockSession {
    config: Arc<MockConfig>,
}

impl BackendSession for MockSession {
    fn create_object(&mut self, _class: &str) -> Result<Box<dyn BackendObject>, BackendCallError> {
        self.config.check()?;
        Ok(Box::new(MockObject {
            config: self.config.clone(),
            values: HashMap::new(),
        }))
    }

    fn logoff(&mut self) -> Result<(), BackendCallError> {
        self.config.check()?;
        self.config.logoff_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockObject {
    config: Arc<MockConfig>,
    values: HashMap<String, Value>,
}

impl BackendObject for MockObject {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, BackendCallError> {
        self.config.check()?;
        if self.config.failing_calls.contains(name) {
            return Err(BackendCallError::new(format!("call {name} failed")));
        }
        match name {
            CALL_INIT | CALL_VALIDATE | CALL_RUN => Ok(json!(0)),
            CALL_ERROR_TYPE => {
                let code = self.config.business_error.as_ref().map(|(c, _)| *c).unwrap_or(0);
                Ok(json!(code))
            }
            CALL_ERROR_DESCRIPTION => {
                let msg = self
                    .config
                    .business_error
                    .as_ref()
                    .map(|(_, m)| m.clone())
                    .unwrap_or_default();
                Ok(json!(msg))
            }
            _ if name.starts_with("set") => {
                let value = args.first().cloned().unwrap_or(Value::Null);
                self.values.insert(name.to_string(), value);
                Ok(Value::Null)
            }
            _ if name.starts_with("get") => {
                // get_x echoes whatever set_x stored
                let stored = name
                    .strip_prefix("get")
                    .map(|rest| format!("set{rest}"))
                    .and_then(|key| self.values.get(&key).cloned());
                Ok(stored.unwrap_or(Value::Null))
            }
            // Iterators: "no more" on the output side, no-op advance on input
            _ => Ok(json!(false)),
        }
    }
}
