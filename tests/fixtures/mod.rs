#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use audit_queue::pool::ExecutionContextFactory;
use audit_queue::{BoxError, Processor, TaskResult};

/// Tracks how many calls are inside a section at once and the highest value seen
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Sleeps for `delay` per payload and records entry/exit on a gauge
pub struct SlowProcessor {
    pub delay: Duration,
    pub gauge: Arc<ConcurrencyGauge>,
}

#[async_trait]
impl Processor<u32, u32> for SlowProcessor {
    async fn process(&self, payload: u32) -> TaskResult<u32> {
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();
        Ok(payload)
    }
}

/// Records the order in which payloads were processed
#[derive(Default)]
pub struct RecordingProcessor {
    pub seen: Mutex<Vec<u32>>,
}

#[async_trait]
impl Processor<u32, u32> for RecordingProcessor {
    async fn process(&self, payload: u32) -> TaskResult<u32> {
        self.seen.lock().push(payload);
        Ok(payload)
    }
}

/// Always rejects, remembering when each attempt started
#[derive(Default)]
pub struct RejectingProcessor {
    pub attempts: Mutex<Vec<tokio::time::Instant>>,
}

#[async_trait]
impl Processor<u32, u32> for RejectingProcessor {
    async fn process(&self, payload: u32) -> TaskResult<u32> {
        self.attempts.lock().push(tokio::time::Instant::now());
        Err::<u32, BoxError>(format!("page {} unreachable", payload).into())
    }
}

/// Lifecycle counters shared between a fake factory and the test body
#[derive(Debug, Default)]
pub struct FactoryCounters {
    pub sessions_opened: AtomicUsize,
    pub tabs_opened: AtomicUsize,
    pub tabs_closed: AtomicUsize,
}

/// Fake browser: a counter for the shared session and one id per tab
#[derive(Default)]
pub struct FakeBrowserFactory {
    pub counters: Arc<FactoryCounters>,
}

pub struct FakeTab {
    pub worker_id: usize,
}

#[async_trait]
impl ExecutionContextFactory for FakeBrowserFactory {
    type Shared = ();
    type Handle = FakeTab;

    async fn create_shared(&self) -> Result<(), BoxError> {
        self.counters.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_worker(&self, _shared: &(), worker_id: usize) -> Result<FakeTab, BoxError> {
        self.counters.tabs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeTab { worker_id })
    }

    async fn destroy_worker(&self, _handle: &FakeTab) {
        self.counters.tabs_closed.fetch_add(1, Ordering::SeqCst);
    }
}
