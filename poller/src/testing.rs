//! In-memory stand-ins for the query agent and the metrics backend.
//!
//! Available to this crate's tests and, with the `testing` feature, to
//! dependents.

use crate::fetch::{AgentRequest, FetchErr, QueryAgent};
use crate::metrics::{ExportErr, Facet, GaugeExporter};
use async_trait::async_trait;
use bytes::Bytes;
use model::record::RecordSet;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

const LOCK_POISONED: &str = "No one should panic while holding this lock";

#[derive(Debug, Clone)]
pub enum Reply {
    Body(Bytes),
    Status(StatusCode),
    /// Fails without reaching the agent.
    Unavailable,
    /// Never answers, so the attempt runs into its timeout.
    Hang,
}

impl Reply {
    pub fn rows(records: &RecordSet) -> Self {
        Reply::Body(serde_json::to_vec(records).expect("Record sets always encode").into())
    }
}

/// Answers with scripted replies in order, then with a fixed reply forever.
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Reply>>,
    otherwise: Reply,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedAgent {
    pub fn new(otherwise: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            otherwise,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().expect(LOCK_POISONED).push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().expect(LOCK_POISONED).len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().expect(LOCK_POISONED).clone()
    }
}

#[async_trait]
impl QueryAgent for ScriptedAgent {
    async fn execute(&self, _request: &AgentRequest) -> Result<Bytes, FetchErr> {
        self.calls.lock().expect(LOCK_POISONED).push(Instant::now());
        let reply = self
            .script
            .lock()
            .expect(LOCK_POISONED)
            .pop_front()
            .unwrap_or_else(|| self.otherwise.clone());

        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Status(status) => Err(FetchErr::Status {
                status,
                body: String::new(),
            }),
            Reply::Unavailable => Err(FetchErr::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "scripted failure".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug)]
pub struct RecordedGauge {
    pub name: String,
    pub facet: Facet,
    value: AtomicU64,
}

impl RecordedGauge {
    pub fn value(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::SeqCst))
    }
}

/// Keeps created gauges in memory and tracks which ones are registered.
#[derive(Default)]
pub struct RecordingExporter {
    registered: Mutex<Vec<Arc<RecordedGauge>>>,
    created: AtomicUsize,
    fail_creations: AtomicBool,
    fail_registrations: AtomicBool,
}

impl RecordingExporter {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fail_creations(&self, fail: bool) {
        self.fail_creations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_registrations(&self, fail: bool) {
        self.fail_registrations.store(fail, Ordering::SeqCst);
    }

    /// Registered series as `(name, facet, value)`, sorted by name and facet.
    pub fn registered(&self) -> Vec<(String, Facet, f64)> {
        let mut series: Vec<_> = self
            .registered
            .lock()
            .expect(LOCK_POISONED)
            .iter()
            .map(|gauge| (gauge.name.clone(), gauge.facet.clone(), gauge.value()))
            .collect();
        series.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        series
    }

    /// Value of the registered series with exactly these labels.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let facet: Facet = labels.iter().copied().collect();
        self.registered
            .lock()
            .expect(LOCK_POISONED)
            .iter()
            .find(|gauge| gauge.name == name && gauge.facet == facet)
            .map(|gauge| gauge.value())
    }
}

impl GaugeExporter for RecordingExporter {
    type Gauge = Arc<RecordedGauge>;

    fn create(&self, name: &str, _help: &str, facet: &Facet) -> Result<Self::Gauge, ExportErr> {
        if self.fail_creations.load(Ordering::SeqCst) {
            return Err(prometheus::Error::Msg(format!("refusing to create {name}")).into());
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordedGauge {
            name: name.to_string(),
            facet: facet.clone(),
            value: AtomicU64::new(0f64.to_bits()),
        }))
    }

    fn set(&self, gauge: &Self::Gauge, value: f64) {
        gauge.value.store(value.to_bits(), Ordering::SeqCst);
    }

    fn register(&self, gauge: &Self::Gauge) -> Result<(), ExportErr> {
        if self.fail_registrations.load(Ordering::SeqCst) {
            return Err(prometheus::Error::Msg(format!("refusing to register {}", gauge.name)).into());
        }
        let mut registered = self.registered.lock().expect(LOCK_POISONED);
        if registered.iter().any(|other| Arc::ptr_eq(other, gauge)) {
            return Err(prometheus::Error::AlreadyReg.into());
        }
        registered.push(gauge.clone());
        Ok(())
    }

    fn unregister(&self, gauge: &Self::Gauge) -> Result<(), ExportErr> {
        let mut registered = self.registered.lock().expect(LOCK_POISONED);
        let before = registered.len();
        registered.retain(|other| !Arc::ptr_eq(other, gauge));
        if registered.len() == before {
            return Err(prometheus::Error::Msg(format!("{} is not registered", gauge.name)).into());
        }
        Ok(())
    }
}
