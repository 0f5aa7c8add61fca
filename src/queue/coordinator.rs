use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use super::adapter::{AdapterOptions, AdmissionGate, QueueAdapter};
use super::errors::QueueError;
use super::events::{NoopEvents, QueueEvents};
use super::parallel::ParallelQueue;
use super::priority_queue::PriorityQueueConfig;
use super::processor::Processor;
use super::sequential::SequentialQueue;
use super::types::{QueueConfig, QueueResult, QueueStatistics, WorkItem};

/// Which adapter a coordinator runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Sequential,
    Parallel,
}

impl AdapterKind {
    pub fn for_concurrency(max_concurrent: usize) -> Self {
        if max_concurrent <= 1 {
            AdapterKind::Sequential
        } else {
            AdapterKind::Parallel
        }
    }
}

/// Entry point for callers: picks the adapter variant from the configured
/// concurrency and maps payload keys to priorities through `priority_patterns`.
pub struct QueueCoordinator<P, R> {
    adapter: Box<dyn QueueAdapter<P, R>>,
    kind: AdapterKind,
    patterns: Vec<(Regex, i32)>,
    admission_gate: Option<Arc<dyn AdmissionGate>>,
}

impl<P, R> QueueCoordinator<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        Self::builder(config).build()
    }

    pub fn builder(config: QueueConfig) -> CoordinatorBuilder<P, R> {
        CoordinatorBuilder::new(config)
    }

    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    pub fn enqueue(&self, batch: Vec<P>, priority: Option<i32>) -> Result<Vec<String>, QueueError> {
        self.adapter.enqueue(batch, priority)
    }

    pub async fn process(&self, processor: Arc<dyn Processor<P, R>>) -> Result<QueueResult<P, R>, QueueError> {
        self.adapter.process(processor).await
    }

    pub fn pause(&self) {
        self.adapter.pause();
    }

    pub fn resume(&self) {
        self.adapter.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.adapter.is_paused()
    }

    pub fn is_processing(&self) -> bool {
        self.adapter.is_processing()
    }

    pub fn clear(&self) -> usize {
        self.adapter.clear()
    }

    pub fn get_statistics(&self) -> QueueStatistics {
        self.adapter.get_statistics()
    }

    pub fn get_item(&self, id: &str) -> Option<WorkItem<P, R>> {
        self.adapter.get_item(id)
    }

    pub fn update_priority(&self, id: &str, priority: i32) -> Result<(), QueueError> {
        self.adapter.update_priority(id, priority)
    }

    /// Whether the attached admission gate currently reports pressure
    pub fn should_throttle(&self) -> bool {
        self.admission_gate.as_ref().is_some_and(|gate| gate.should_throttle())
    }

    /// Priority of the first pattern matching `key`, if any
    pub fn priority_for(&self, key: &str) -> Option<i32> {
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.is_match(key))
            .map(|(_, priority)| *priority)
    }
}

impl<P, R> QueueCoordinator<P, R>
where
    P: AsRef<str> + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Enqueue payloads keyed by a string (usually a URL), each taking the
    /// priority of the first matching pattern or the queue default.
    pub fn enqueue_keyed(&self, batch: Vec<P>) -> Result<Vec<String>, QueueError> {
        let prioritized = batch
            .into_iter()
            .map(|payload| {
                let priority = self.priority_for(payload.as_ref());
                (payload, priority)
            })
            .collect();
        self.adapter.enqueue_prioritized(prioritized)
    }
}

pub struct CoordinatorBuilder<P, R> {
    config: QueueConfig,
    priority_queue: PriorityQueueConfig,
    events: Arc<dyn QueueEvents<P, R>>,
    admission_gate: Option<Arc<dyn AdmissionGate>>,
    gate_poll_interval: Duration,
}

impl<P, R> CoordinatorBuilder<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn new(config: QueueConfig) -> Self {
        Self {
            config,
            priority_queue: PriorityQueueConfig::default(),
            events: Arc::new(NoopEvents),
            admission_gate: None,
            gate_poll_interval: Duration::from_millis(100),
        }
    }

    pub fn priority_queue(mut self, config: PriorityQueueConfig) -> Self {
        self.priority_queue = config;
        self
    }

    pub fn events(mut self, events: Arc<dyn QueueEvents<P, R>>) -> Self {
        self.events = events;
        self
    }

    /// Hold new claims while `gate` reports pressure, rechecking every `poll_interval`
    pub fn admission_gate(mut self, gate: Arc<dyn AdmissionGate>, poll_interval: Duration) -> Self {
        self.admission_gate = Some(gate);
        self.gate_poll_interval = poll_interval;
        self
    }

    /// Gate admission on a resource monitor's throttle decision
    pub fn with_resource_monitor(self, monitor: Arc<crate::monitor::ResourceMonitor>) -> Self {
        let poll_interval = monitor.options().interval;
        self.admission_gate(monitor, poll_interval)
    }

    pub fn build(self) -> Result<QueueCoordinator<P, R>, QueueError> {
        let patterns = self
            .config
            .priority_patterns
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| (regex, rule.priority))
                    .map_err(|source| QueueError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let kind = AdapterKind::for_concurrency(self.config.max_concurrent);
        let options = AdapterOptions {
            priority_queue: self.priority_queue,
            events: self.events,
            admission_gate: self.admission_gate.clone(),
            gate_poll_interval: self.gate_poll_interval,
        };

        let adapter: Box<dyn QueueAdapter<P, R>> = match kind {
            AdapterKind::Sequential => Box::new(SequentialQueue::with_options(self.config, options)),
            AdapterKind::Parallel => Box::new(ParallelQueue::with_options(self.config, options)),
        };

        info!(
            "🧭 Queue coordinator ready ({} adapter, {} priority patterns)",
            adapter.name(),
            patterns.len()
        );
        debug!("🧭 Admission gate attached: {}", self.admission_gate.is_some());

        Ok(QueueCoordinator {
            adapter,
            kind,
            patterns,
            admission_gate: self.admission_gate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::types::{BoxError, PriorityPattern};

    fn config(max_concurrent: usize, patterns: Vec<PriorityPattern>) -> QueueConfig {
        QueueConfig {
            max_concurrent,
            retry_delay: Duration::from_millis(5),
            priority_patterns: patterns,
            enable_progress_reporting: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_variant_selection() {
        let sequential: QueueCoordinator<String, ()> = QueueCoordinator::new(config(1, vec![])).unwrap();
        let parallel: QueueCoordinator<String, ()> = QueueCoordinator::new(config(4, vec![])).unwrap();
        assert_eq!(sequential.kind(), AdapterKind::Sequential);
        assert_eq!(parallel.kind(), AdapterKind::Parallel);
        assert_eq!(AdapterKind::for_concurrency(0), AdapterKind::Sequential);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result: Result<QueueCoordinator<String, ()>, _> = QueueCoordinator::new(config(
            1,
            vec![PriorityPattern {
                pattern: "([unclosed".to_string(),
                priority: 5,
            }],
        ));
        assert!(matches!(result, Err(QueueError::InvalidPattern { .. })));
    }

    #[tokio::test]
    async fn test_keyed_enqueue_uses_first_matching_pattern() {
        let coordinator: QueueCoordinator<String, usize> = QueueCoordinator::new(config(
            1,
            vec![
                PriorityPattern {
                    pattern: r"/checkout".to_string(),
                    priority: 10,
                },
                PriorityPattern {
                    pattern: r"^https://shop\.".to_string(),
                    priority: 5,
                },
            ],
        ))
        .unwrap();

        let ids = coordinator
            .enqueue_keyed(vec![
                "https://blog.example.com/".to_string(),
                "https://shop.example.com/".to_string(),
                "https://shop.example.com/checkout".to_string(),
            ])
            .unwrap();

        assert_eq!(coordinator.get_item(&ids[0]).map(|item| item.priority), Some(0));
        assert_eq!(coordinator.get_item(&ids[1]).map(|item| item.priority), Some(5));
        assert_eq!(coordinator.get_item(&ids[2]).map(|item| item.priority), Some(10));

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = order.clone();
        let processor: Arc<dyn Processor<String, usize>> = Arc::new(move |url: String| {
            let seen = seen.clone();
            async move {
                let len = url.len();
                seen.lock().push(url);
                Ok::<_, BoxError>(len)
            }
        });

        let result = coordinator.process(processor).await.unwrap();
        assert_eq!(result.completed.len(), 3);
        assert_eq!(order.lock()[0], "https://shop.example.com/checkout");
        assert_eq!(order.lock()[2], "https://blog.example.com/");
    }

    #[test]
    fn test_without_gate_never_throttles() {
        let coordinator: QueueCoordinator<String, ()> = QueueCoordinator::new(config(2, vec![])).unwrap();
        assert!(!coordinator.should_throttle());
    }
}
