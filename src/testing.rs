//! Test doubles shared by the module tests.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::{
    clock::Clock,
    secrets::{Prompter, SecretStore},
    tuya::{ApiResponse, Credentials, SignedRequest, Transport},
};

pub fn credentials() -> Credentials {
    Credentials {
        access_id: "test-access-id".to_owned(),
        access_secret: "test-secret".to_owned(),
        device_id: "test-device".to_owned(),
    }
}

/// A successful token envelope.
pub fn token_body(t: i64, access_token: &str, expire_time: i64, refresh_token: &str) -> Value {
    json!({
        "success": true,
        "t": t,
        "result": {
            "access_token": access_token,
            "expire_time": expire_time,
            "refresh_token": refresh_token,
            "uid": "test-uid"
        }
    })
}

type Handler = Box<dyn FnMut(&SignedRequest, usize) -> Result<(u16, Value)>>;

/// Transport that answers from a closure and records every request.
pub struct ScriptedTransport {
    handler: RefCell<Handler>,
    requests: RefCell<Vec<SignedRequest>>,
}

impl ScriptedTransport {
    /// `handler` gets the request and its zero-based index.
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&SignedRequest, usize) -> Result<(u16, Value)> + 'static,
    {
        Self {
            handler: RefCell::new(Box::new(handler)),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn always(status: u16, body: Value) -> Self {
        Self::new(move |_, _| Ok((status, body.clone())))
    }

    pub fn ok_json(body: Value) -> Self {
        Self::always(200, body)
    }

    pub fn requests(&self) -> Vec<SignedRequest> {
        self.requests.borrow().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|r| r.path_and_query.clone())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: &SignedRequest) -> Result<ApiResponse> {
        let n = self.requests.borrow().len();
        self.requests.borrow_mut().push(request.clone());
        let mut handler = self.handler.borrow_mut();
        let (status, body) = (&mut **handler)(request, n)?;
        Ok(ApiResponse { status, body })
    }
}

/// Clock that only moves when something sleeps on it.
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
    sleeps: RefCell<Vec<Duration>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(now),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub fn at_millis(ms: i64) -> Self {
        Self::at(Utc.timestamp_millis_opt(ms).unwrap())
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.now
            .set(self.now.get() + chrono::Duration::from_std(duration).unwrap());
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    values: RefCell<HashMap<(String, String), String>>,
}

impl MemorySecretStore {
    pub fn with(entries: &[(&str, &str, &str)]) -> Self {
        let store = Self::default();
        for (ns, field, value) in entries {
            store
                .values
                .borrow_mut()
                .insert(((*ns).to_owned(), (*field).to_owned()), (*value).to_owned());
        }
        store
    }

    pub fn value(&self, namespace: &str, field: &str) -> Option<String> {
        self.values
            .borrow()
            .get(&(namespace.to_owned(), field.to_owned()))
            .cloned()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, namespace: &str, field: &str) -> Result<Option<String>> {
        Ok(self.value(namespace, field))
    }

    fn set(&self, namespace: &str, field: &str, value: &str) -> Result<()> {
        self.values
            .borrow_mut()
            .insert((namespace.to_owned(), field.to_owned()), value.to_owned());
        Ok(())
    }
}

/// Answers prompts from a fixed table and remembers what was asked.
#[derive(Default)]
pub struct CannedPrompter {
    answers: HashMap<String, String>,
    asked: RefCell<Vec<(String, bool)>>,
}

impl CannedPrompter {
    pub fn with(answers: &[(&str, &str)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            asked: RefCell::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().iter().map(|(field, _)| field.clone()).collect()
    }

    /// Fields that were asked for with echo disabled.
    pub fn asked_hidden(&self) -> Vec<String> {
        self.asked
            .borrow()
            .iter()
            .filter(|(_, hidden)| *hidden)
            .map(|(field, _)| field.clone())
            .collect()
    }
}

impl Prompter for CannedPrompter {
    fn prompt(&self, field: &str, label: &str, hidden: bool) -> Result<String> {
        self.asked.borrow_mut().push((field.to_owned(), hidden));
        self.answers
            .get(field)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unexpected prompt: {label}"))
    }
}
