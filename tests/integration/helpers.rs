//! Helper types and functions for integration tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uptime_engine::config::{EngineConfig, RetryConfig};
use uptime_engine::notify::{NotifyError, PushTransport};
use uptime_engine::probe::Probe;
use uptime_engine::storage::{HealthStatus, MemoryBackend, StorageBackend, StorageError, StorageResult};
use uptime_engine::{Engine, FailureReason, Monitor, ProbeKind, ProbeOutcome, StatusRecord};

/// Engine configuration with short intervals and a fast retry policy
pub fn test_config(workers: usize) -> EngineConfig {
    EngineConfig {
        workers,
        min_interval_ms: 10,
        probe_timeout_secs: 1,
        notification_timeout_secs: 2,
        persistence_retry: RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            base_for_backoff: 2,
        },
        ..EngineConfig::default()
    }
}

pub fn http_monitor(id: &str, target: &str, interval_ms: u64) -> Monitor {
    Monitor::new(id, format!("Monitor {id}"), target, ProbeKind::Http, Duration::from_millis(interval_ms))
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !check() {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

/// Wait until at least `count` checks of `monitor_id` are stored
pub async fn wait_for_checks(engine: &Engine, monitor_id: &str, count: usize, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let stored = engine.recent_checks(monitor_id, count).await.map(|c| c.len()).unwrap_or(0);
        if stored >= count {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Step {
    Up,
    Fail(FailureReason),
    Panic,
}

/// Probe returning scripted outcomes and recording how it was called
pub struct ScriptedProbe {
    delay: Duration,
    default: Step,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    starts: Mutex<HashMap<String, Vec<Instant>>>,
    in_flight: Mutex<HashMap<String, usize>>,
    overlaps: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(delay: Duration, default: Step) -> Self {
        Self {
            delay,
            default,
            scripts: Mutex::new(HashMap::new()),
            starts: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            overlaps: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(self, monitor_id: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(monitor_id.to_string(), steps.into_iter().collect());
        self
    }

    pub fn starts(&self, monitor_id: &str) -> Vec<Instant> {
        self.starts
            .lock()
            .unwrap()
            .get(monitor_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Times a probe started while another one for the same monitor was running
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn check(&self, monitor: &Monitor, _timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts
            .lock()
            .unwrap()
            .entry(monitor.id.clone())
            .or_default()
            .push(start);
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(monitor.id.clone()).or_default();
            *count += 1;
            if *count > 1 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&monitor.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.default);

        tokio::time::sleep(self.delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(&monitor.id) {
            *count -= 1;
        }

        match step {
            Step::Up => ProbeOutcome::success(monitor.id.clone(), start.elapsed(), "scripted success"),
            Step::Fail(reason) => {
                ProbeOutcome::failure(monitor.id.clone(), reason, start.elapsed(), "scripted failure")
            }
            Step::Panic => panic!("scripted probe panic"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentPush {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SentPush {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Push transport answering with a fixed status and keeping every request
pub struct RecordingPush {
    status: u16,
    sent: Mutex<Vec<SentPush>>,
}

impl RecordingPush {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentPush> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for RecordingPush {
    async fn send(&self, url: &str, headers: &[(String, String)], body: String) -> Result<u16, NotifyError> {
        self.sent.lock().unwrap().push(SentPush {
            url: url.to_string(),
            headers: headers.to_vec(),
            body,
        });
        Ok(self.status)
    }
}

/// In-memory storage whose `commit_check` fails a configurable number of times
pub struct FailingCommits {
    inner: MemoryBackend,
    failures_left: AtomicU64,
    attempts: AtomicUsize,
}

impl FailingCommits {
    pub fn new(failures: u64) -> Self {
        Self {
            inner: MemoryBackend::new(),
            failures_left: AtomicU64::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn always() -> Self {
        Self::new(u64::MAX)
    }

    /// Let every following commit through
    pub fn heal(&self) {
        self.failures_left.store(0, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for FailingCommits {
    async fn load_active_monitors(&self) -> StorageResult<Vec<Monitor>> {
        self.inner.load_active_monitors().await
    }

    async fn load_monitors(&self) -> StorageResult<Vec<Monitor>> {
        self.inner.load_monitors().await
    }

    async fn load_monitor(&self, monitor_id: &str) -> StorageResult<Option<Monitor>> {
        self.inner.load_monitor(monitor_id).await
    }

    async fn upsert_monitor(&self, monitor: &Monitor) -> StorageResult<()> {
        self.inner.upsert_monitor(monitor).await
    }

    async fn delete_monitor(&self, monitor_id: &str) -> StorageResult<()> {
        self.inner.delete_monitor(monitor_id).await
    }

    async fn get_status(&self, monitor_id: &str) -> StorageResult<Option<StatusRecord>> {
        self.inner.get_status(monitor_id).await
    }

    async fn save_status(&self, record: &StatusRecord) -> StorageResult<()> {
        self.inner.save_status(record).await
    }

    async fn append_history(&self, outcome: &ProbeOutcome) -> StorageResult<()> {
        self.inner.append_history(outcome).await
    }

    async fn commit_check(&self, record: &StatusRecord, outcome: &ProbeOutcome) -> StorageResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::Query("database is locked".to_string()));
        }
        self.inner.commit_check(record, outcome).await
    }

    async fn latest_checks(&self, monitor_id: &str, limit: usize) -> StorageResult<Vec<ProbeOutcome>> {
        self.inner.latest_checks(monitor_id, limit).await
    }

    async fn update_scheduling_meta(
        &self,
        monitor_id: &str,
        last_checked: DateTime<Utc>,
        next_due: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.inner.update_scheduling_meta(monitor_id, last_checked, next_due).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}
