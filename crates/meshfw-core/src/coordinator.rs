//! Cluster stats coordination.
//!
//! One coordinator runs per worker process. On a fixed period it samples its
//! own resource usage, broadcasts the sample to every sibling worker (full
//! mesh, no central relay), and maintains a table of the latest sample per
//! live worker id. After every table update the worker holding the smallest
//! live id arms a debounced report that registers with, or updates, the
//! central registry.
//!
//! Siblings running an older, non-cooperating protocol are detected by a
//! one-shot deadline: if no sibling broadcast arrives within
//! `period + 3000ms`, the coordinator permanently switches to polling every
//! live worker's OS-level resource usage itself.
//!
//! The stats table is owned by a single spawned task; all inputs arrive as
//! messages or timers through one `select!` loop, so there is no lock
//! anywhere in this module.

use meshfw_types::{
    ConfigError, RegistrationRecord, RegistryConfig, ResourceSample, RouteRegistration,
    StatsMessage,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::RegistryApi;
use crate::sampler::{ResourceSampler, SysinfoSampler};

/// Grace added to the period when purging stale sibling stats.
const STALE_GRACE: Duration = Duration::from_millis(1000);
/// Grace added to the period for the legacy-protocol detection deadline.
const LEGACY_GRACE: Duration = Duration::from_millis(3000);

/// This worker's identity on the process-messaging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Cluster worker id, unique among live siblings.
    pub worker_id: u32,
    /// OS process id.
    pub pid: u32,
}

/// Interface to the process supervision layer: outbound broadcasts plus the
/// cluster membership view. Inbound messages arrive separately through the
/// mpsc receiver handed to [`ClusterStatsCoordinator::spawn`].
pub trait WorkerBus: Send + Sync {
    /// Who this worker is.
    fn identity(&self) -> WorkerIdentity;

    /// Send a stats broadcast to every sibling worker.
    fn broadcast(&self, message: &StatsMessage);

    /// Pids of all currently-live workers, used by legacy polling.
    fn live_worker_pids(&self) -> Vec<u32>;
}

/// What this service registers under.
#[derive(Debug, Clone)]
pub struct SelfRoute {
    /// Self URL the registry should route to.
    pub url: String,
    /// Path templates to register.
    pub path: Vec<String>,
    /// Secure key callers use to reach this service.
    pub secure_key: String,
}

/// One worker's latest sample, keyed by worker id in the table.
struct WorkerStat {
    time: Instant,
    sample: ResourceSample,
}

/// Latest `(sample, timestamp)` per live worker id, including our own.
///
/// Owned exclusively by the coordinator task; never shared.
struct StatsTable {
    period: Duration,
    entries: HashMap<u32, WorkerStat>,
}

impl StatsTable {
    fn new(period: Duration) -> Self {
        Self { period, entries: HashMap::new() }
    }

    fn record(&mut self, worker_id: u32, sample: ResourceSample, now: Instant) {
        self.entries.insert(worker_id, WorkerStat { time: now, sample });
    }

    /// Drop entries older than `period + 1000ms`, measured against the time
    /// the purge runs.
    fn purge(&mut self, now: Instant) {
        let cutoff = self.period + STALE_GRACE;
        self.entries.retain(|_, stat| now.duration_since(stat.time) <= cutoff);
    }

    fn min_worker_id(&self) -> Option<u32> {
        self.entries.keys().copied().min()
    }

    fn live_samples(&self) -> Vec<ResourceSample> {
        self.entries.values().map(|stat| stat.sample.clone()).collect()
    }
}

/// Protocol-version detector. The transition to `ConfirmedLegacy` is
/// one-way: once siblings are known to run the old protocol, no further
/// detection is attempted for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolVersion {
    /// Waiting to see whether siblings speak the broadcast protocol.
    Observing,
    /// A sibling broadcast was seen; cooperative protocol confirmed.
    Cooperative,
    /// Deadline passed without a sibling broadcast; poll pids forever.
    ConfirmedLegacy,
}

/// Handle to the per-process stats coordinator task.
///
/// Dropping the handle requests shutdown, mirroring the task's cooperative
/// cancellation: scheduled work stops, in-flight registry calls finish on
/// their own and their results are discarded.
pub struct ClusterStatsCoordinator {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ClusterStatsCoordinator {
    /// Spawn the coordinator task with the default sysinfo sampler.
    ///
    /// Fails fast with a [`ConfigError`] if the reporting period is not a
    /// positive integer.
    pub fn spawn(
        config: RegistryConfig,
        route: SelfRoute,
        registry: Arc<dyn RegistryApi>,
        bus: Arc<dyn WorkerBus>,
        inbound: mpsc::Receiver<StatsMessage>,
    ) -> Result<Self, ConfigError> {
        Self::spawn_with_sampler(config, route, registry, bus, inbound, Box::new(SysinfoSampler::new()))
    }

    /// Spawn with an injected resource sampler.
    pub fn spawn_with_sampler(
        config: RegistryConfig,
        route: SelfRoute,
        registry: Arc<dyn RegistryApi>,
        bus: Arc<dyn WorkerBus>,
        inbound: mpsc::Receiver<StatsMessage>,
        sampler: Box<dyn ResourceSampler>,
    ) -> Result<Self, ConfigError> {
        if config.period_ms == 0 {
            return Err(ConfigError::InvalidPeriod { value: config.period_ms.to_string() });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = mpsc::channel(8);

        let task = CoordinatorTask {
            identity: bus.identity(),
            period: Duration::from_millis(config.period_ms),
            table: StatsTable::new(Duration::from_millis(config.period_ms)),
            config,
            route,
            registry,
            bus,
            sampler,
            registration: None,
            protocol: ProtocolVersion::Observing,
            report_armed: false,
            outcome_tx,
        };
        let handle = tokio::spawn(task.run(inbound, shutdown_rx, outcome_rx));

        Ok(Self { shutdown_tx, handle: Some(handle) })
    }

    /// Request termination: suppresses further scheduled work, cancels the
    /// timers, and issues a best-effort deregistration.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the coordinator task to exit.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ClusterStatsCoordinator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct CoordinatorTask {
    identity: WorkerIdentity,
    period: Duration,
    table: StatsTable,
    config: RegistryConfig,
    route: SelfRoute,
    registry: Arc<dyn RegistryApi>,
    bus: Arc<dyn WorkerBus>,
    sampler: Box<dyn ResourceSampler>,
    registration: Option<RegistrationRecord>,
    protocol: ProtocolVersion,
    report_armed: bool,
    outcome_tx: mpsc::Sender<Option<RegistrationRecord>>,
}

impl CoordinatorTask {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<StatsMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
        mut outcome_rx: mpsc::Receiver<Option<RegistrationRecord>>,
    ) {
        let mut tick = tokio::time::interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let legacy_deadline = tokio::time::sleep(self.period + LEGACY_GRACE);
        tokio::pin!(legacy_deadline);

        // Re-armed via reset() whenever a report gets scheduled.
        let report_timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(report_timer);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if *shutdown_rx.borrow() {
                        continue;
                    }
                    if self.on_tick() {
                        report_timer.as_mut().reset(tokio::time::Instant::now() + self.period);
                    }
                }
                Some(message) = inbound.recv() => {
                    if *shutdown_rx.borrow() {
                        continue;
                    }
                    if self.on_message(&message) {
                        report_timer.as_mut().reset(tokio::time::Instant::now() + self.period);
                    }
                }
                () = &mut legacy_deadline, if self.protocol == ProtocolVersion::Observing => {
                    self.confirm_legacy();
                }
                () = &mut report_timer, if self.report_armed => {
                    self.report_armed = false;
                    // Leadership may have moved to a smaller id while the
                    // debounce ran.
                    if self.table.min_worker_id() == Some(self.identity.worker_id) {
                        self.start_report(self.table.live_samples());
                    }
                }
                Some(registration) = outcome_rx.recv() => {
                    self.registration = registration;
                }
                _ = shutdown_rx.changed() => {
                    self.deregister();
                    break;
                }
            }
        }
    }

    /// One sampling tick. Returns true when the report debounce timer
    /// should be armed.
    fn on_tick(&mut self) -> bool {
        match self.protocol {
            ProtocolVersion::Observing | ProtocolVersion::Cooperative => {
                let sample = self.sampler.sample_self();
                let now = Instant::now();
                self.table.record(self.identity.worker_id, sample.clone(), now);
                self.bus.broadcast(&StatsMessage::new(
                    self.identity.worker_id,
                    self.identity.pid,
                    sample,
                ));
                self.after_table_update(now)
            }
            ProtocolVersion::ConfirmedLegacy => {
                let pids = self.bus.live_worker_pids();
                let metrics = self.sampler.sample_pids(&pids);
                debug!(workers = pids.len(), "polled sibling resource usage");
                self.start_report(metrics);
                false
            }
        }
    }

    /// A broadcast arrived from the process channel. Returns true when the
    /// report debounce timer should be armed.
    fn on_message(&mut self, message: &StatsMessage) -> bool {
        if !message.is_stats() {
            return false;
        }
        // The legacy switch is one-way: a late broadcast from a rolling
        // upgrade must not resume cooperative accounting next to the
        // polling tick.
        if self.protocol == ProtocolVersion::ConfirmedLegacy {
            return false;
        }
        if self.protocol == ProtocolVersion::Observing
            && message.worker_id != self.identity.worker_id
        {
            debug!("sibling broadcast observed, cooperative protocol confirmed");
            self.protocol = ProtocolVersion::Cooperative;
        }
        let now = Instant::now();
        self.table.record(message.worker_id, message.message.clone(), now);
        self.after_table_update(now)
    }

    /// Purge stale entries, then decide whether to arm the debounced report.
    ///
    /// Election is advisory: each worker computes the minimum purely from
    /// its own locally received broadcasts, so brief windows with zero or
    /// two reporters during membership churn are accepted.
    fn after_table_update(&mut self, now: Instant) -> bool {
        self.table.purge(now);
        if self.report_armed {
            return false;
        }
        if self.table.min_worker_id() == Some(self.identity.worker_id) {
            debug!(worker_id = self.identity.worker_id, "elected reporter, arming report debounce");
            self.report_armed = true;
            return true;
        }
        false
    }

    fn confirm_legacy(&mut self) {
        info!("no sibling stats broadcasts observed, falling back to legacy polling");
        self.protocol = ProtocolVersion::ConfirmedLegacy;
        self.report_armed = false;
    }

    /// Run the registration handshake off the timer loop: a failed or slow
    /// registry call must never stall the next tick.
    fn start_report(&self, metrics: Vec<ResourceSample>) {
        let payload = RouteRegistration {
            url: self.route.url.clone(),
            path: self.route.path.clone(),
            metrics,
            secure_key: self.route.secure_key.clone(),
            scope: self.config.scope.clone(),
        };
        let registry = Arc::clone(&self.registry);
        let current = self.registration.clone();
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let next = submit_report(registry.as_ref(), current, &payload).await;
            let _ = outcome_tx.send(next).await;
        });
    }

    /// Best-effort delete on termination; not awaited before process exit.
    fn deregister(&mut self) {
        if let Some(record) = self.registration.take() {
            info!("deregistering from router");
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                if let Err(error) = registry.delete(&record.id, &record.token).await {
                    debug!(%error, "deregistration failed");
                }
            });
        }
    }
}

/// Run one registration/report handshake and return the record to hold
/// afterwards.
///
/// Unregistered: create and keep the returned credentials; on transport
/// failure stay unregistered and let the next cycle retry with fresh
/// metrics. Registered: update; on failure the record is cleared and the
/// same metrics are immediately retried as a create so the reporting
/// interval is not dropped.
async fn submit_report(
    registry: &dyn RegistryApi,
    current: Option<RegistrationRecord>,
    payload: &RouteRegistration,
) -> Option<RegistrationRecord> {
    match current {
        None => {
            debug!("registering on router");
            match registry.create(payload).await {
                Ok(record) => Some(record),
                Err(error) => {
                    warn!(%error, "router is not available");
                    None
                }
            }
        }
        Some(record) => {
            debug!("updating stats on router");
            match registry.update(&record.id, &record.token, &payload.metrics).await {
                Ok(()) => Some(record),
                Err(error) => {
                    warn!(%error, "stats update failed, re-registering");
                    match registry.create(payload).await {
                        Ok(new_record) => Some(new_record),
                        Err(error) => {
                            warn!(%error, "router is not available");
                            None
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use async_trait::async_trait;
    use meshfw_types::RouteEntry;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn sample(memory_mb: f64) -> ResourceSample {
        ResourceSample { memory_mb, cpu_percent: 1.0, loadavg: [0.1, 0.2, 0.3] }
    }

    fn test_config(period_ms: u64) -> RegistryConfig {
        RegistryConfig {
            base_url: "http://router".to_string(),
            secure_key: "router-key".to_string(),
            period_ms,
            proxy_base_url: "http://proxy".to_string(),
            scope: Some("test".to_string()),
        }
    }

    fn test_route() -> SelfRoute {
        SelfRoute {
            url: "http://10.0.0.1:3000".to_string(),
            path: vec!["task/:id".to_string()],
            secure_key: "self-key".to_string(),
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        creates: Mutex<Vec<RouteRegistration>>,
        updates: Mutex<Vec<Vec<ResourceSample>>>,
        deletes: Mutex<Vec<(String, String)>>,
        fail_create: AtomicBool,
        fail_update: AtomicBool,
    }

    #[async_trait]
    impl RegistryApi for FakeRegistry {
        async fn create(
            &self,
            route: &RouteRegistration,
        ) -> Result<RegistrationRecord, RegistryError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(RegistryError::Transport("connection refused".to_string()));
            }
            self.creates.lock().expect("lock").push(route.clone());
            Ok(RegistrationRecord { id: "r1".to_string(), token: "t1".to_string() })
        }

        async fn update(
            &self,
            _id: &str,
            _token: &str,
            metrics: &[ResourceSample],
        ) -> Result<(), RegistryError> {
            if self.fail_update.load(Ordering::SeqCst) {
                return Err(RegistryError::Transport("410 gone".to_string()));
            }
            self.updates.lock().expect("lock").push(metrics.to_vec());
            Ok(())
        }

        async fn delete(&self, id: &str, token: &str) -> Result<(), RegistryError> {
            self.deletes.lock().expect("lock").push((id.to_string(), token.to_string()));
            Ok(())
        }

        async fn search(&self, _query: &Value) -> Result<Vec<RouteEntry>, RegistryError> {
            Ok(Vec::new())
        }
    }

    struct FakeBus {
        identity: WorkerIdentity,
        pids: Vec<u32>,
        broadcasts: Mutex<Vec<StatsMessage>>,
    }

    impl FakeBus {
        fn new(worker_id: u32) -> Self {
            Self {
                identity: WorkerIdentity { worker_id, pid: 1000 + worker_id },
                pids: vec![1000 + worker_id],
                broadcasts: Mutex::new(Vec::new()),
            }
        }
    }

    impl WorkerBus for FakeBus {
        fn identity(&self) -> WorkerIdentity {
            self.identity
        }

        fn broadcast(&self, message: &StatsMessage) {
            self.broadcasts.lock().expect("lock").push(message.clone());
        }

        fn live_worker_pids(&self) -> Vec<u32> {
            self.pids.clone()
        }
    }

    struct FakeSampler;

    impl ResourceSampler for FakeSampler {
        fn sample_self(&mut self) -> ResourceSample {
            sample(64.0)
        }

        fn sample_pids(&mut self, pids: &[u32]) -> Vec<ResourceSample> {
            pids.iter().map(|_| sample(32.0)).collect()
        }
    }

    fn test_task(
        worker_id: u32,
        registry: Arc<FakeRegistry>,
    ) -> (CoordinatorTask, mpsc::Receiver<Option<RegistrationRecord>>) {
        let bus = Arc::new(FakeBus::new(worker_id));
        let (outcome_tx, outcome_rx) = mpsc::channel(8);
        let task = CoordinatorTask {
            identity: bus.identity(),
            period: Duration::from_millis(500),
            table: StatsTable::new(Duration::from_millis(500)),
            config: test_config(500),
            route: test_route(),
            registry,
            bus,
            sampler: Box::new(FakeSampler),
            registration: None,
            protocol: ProtocolVersion::Observing,
            report_armed: false,
            outcome_tx,
        };
        (task, outcome_rx)
    }

    #[test]
    fn purge_drops_entries_older_than_period_plus_grace() {
        let period = Duration::from_millis(500);
        let mut table = StatsTable::new(period);
        let now = Instant::now();

        let fresh = now - period - STALE_GRACE; // exactly on the boundary
        let stale = now - period - STALE_GRACE - Duration::from_millis(1);
        table.record(1, sample(1.0), stale);
        table.record(2, sample(2.0), fresh);
        table.record(3, sample(3.0), now);

        table.purge(now);

        assert!(!table.entries.contains_key(&1), "stale entry must be purged");
        assert!(table.entries.contains_key(&2), "boundary entry survives");
        assert!(table.entries.contains_key(&3));
        assert_eq!(table.live_samples().len(), 2);
    }

    #[tokio::test]
    async fn only_the_smallest_live_id_arms_the_report() {
        let registry = Arc::new(FakeRegistry::default());
        let now = Instant::now();

        for (own_id, expect_armed) in [(3_u32, false), (5, false), (2, true)] {
            let (mut task, _outcome_rx) = test_task(own_id, Arc::clone(&registry));
            for id in [3_u32, 5, 2] {
                task.table.record(id, sample(1.0), now);
            }
            assert_eq!(
                task.after_table_update(now),
                expect_armed,
                "worker {own_id} armed unexpectedly"
            );
            assert_eq!(task.report_armed, expect_armed);
        }
    }

    #[tokio::test]
    async fn arming_is_level_triggered_not_repeated() {
        let registry = Arc::new(FakeRegistry::default());
        let (mut task, _outcome_rx) = test_task(1, registry);
        let now = Instant::now();
        task.table.record(1, sample(1.0), now);

        assert!(task.after_table_update(now));
        // Already armed: further table updates must not restart the timer.
        assert!(!task.after_table_update(now));
    }

    #[tokio::test]
    async fn legacy_mode_ignores_late_sibling_broadcasts() {
        let registry = Arc::new(FakeRegistry::default());
        let (mut task, _outcome_rx) = test_task(2, registry);
        task.confirm_legacy();

        // A sibling finishing a rolling upgrade starts broadcasting after
        // the switch already happened.
        let armed = task.on_message(&StatsMessage::new(1, 101, sample(16.0)));

        assert!(!armed, "legacy mode must never arm the debounce");
        assert!(!task.report_armed);
        assert!(task.table.entries.is_empty(), "legacy mode stops table accounting");
        assert_eq!(task.protocol, ProtocolVersion::ConfirmedLegacy);
    }

    #[tokio::test]
    async fn first_report_registers_and_keeps_the_record() {
        let registry = FakeRegistry::default();
        let payload = RouteRegistration {
            url: "http://10.0.0.1:3000".to_string(),
            path: vec!["task/:id".to_string()],
            metrics: vec![sample(64.0)],
            secure_key: "self-key".to_string(),
            scope: Some("test".to_string()),
        };

        let record = submit_report(&registry, None, &payload).await;

        assert_eq!(
            record,
            Some(RegistrationRecord { id: "r1".to_string(), token: "t1".to_string() })
        );
        assert_eq!(registry.creates.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn create_failure_stays_unregistered_and_retries_next_cycle() {
        let registry = FakeRegistry::default();
        registry.fail_create.store(true, Ordering::SeqCst);
        let payload = RouteRegistration {
            url: "u".to_string(),
            path: vec![],
            metrics: vec![sample(64.0)],
            secure_key: "k".to_string(),
            scope: None,
        };

        assert_eq!(submit_report(&registry, None, &payload).await, None);

        // Router comes back: the next cycle registers with fresh metrics.
        registry.fail_create.store(false, Ordering::SeqCst);
        assert!(submit_report(&registry, None, &payload).await.is_some());
    }

    #[tokio::test]
    async fn update_failure_clears_record_and_recreates_with_same_metrics() {
        let registry = FakeRegistry::default();
        registry.fail_update.store(true, Ordering::SeqCst);
        let held = RegistrationRecord { id: "old".to_string(), token: "stale".to_string() };
        let payload = RouteRegistration {
            url: "u".to_string(),
            path: vec![],
            metrics: vec![sample(48.0), sample(12.0)],
            secure_key: "k".to_string(),
            scope: None,
        };

        let record = submit_report(&registry, Some(held), &payload).await;

        // A fresh registration replaced the cleared record within the same
        // invocation; the metrics payload was not dropped.
        assert_eq!(record.map(|r| r.id), Some("r1".to_string()));
        let creates = registry.creates.lock().expect("lock");
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].metrics, payload.metrics);
        assert!(registry.updates.lock().expect("lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sole_worker_broadcasts_then_reports_after_debounce() {
        let registry = Arc::new(FakeRegistry::default());
        let bus = Arc::new(FakeBus::new(1));
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);

        let coordinator = ClusterStatsCoordinator::spawn_with_sampler(
            test_config(100),
            test_route(),
            Arc::clone(&registry) as Arc<dyn RegistryApi>,
            Arc::clone(&bus) as Arc<dyn WorkerBus>,
            inbound_rx,
            Box::new(FakeSampler),
        )
        .expect("valid period");

        // First tick fires immediately; the debounce adds one more period.
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert!(bus.broadcasts.lock().expect("lock").len() >= 2, "ticks keep broadcasting");
        let creates = registry.creates.lock().expect("lock");
        assert!(!creates.is_empty(), "sole worker must elect itself and report");
        assert_eq!(creates[0].metrics.len(), 1);
        assert_eq!(creates[0].secure_key, "self-key");
        assert_eq!(creates[0].scope.as_deref(), Some("test"));
        drop(creates);

        coordinator.shutdown();
        coordinator.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sibling_broadcasts_confirm_cooperative_and_shift_reporting() {
        let registry = Arc::new(FakeRegistry::default());
        let bus = Arc::new(FakeBus::new(4));
        let (inbound_tx, inbound_rx) = mpsc::channel(8);

        // A sibling with a smaller id is already live before our first tick.
        inbound_tx
            .send(StatsMessage::new(1, 101, sample(16.0)))
            .await
            .expect("send");

        let coordinator = ClusterStatsCoordinator::spawn_with_sampler(
            test_config(100),
            test_route(),
            Arc::clone(&registry) as Arc<dyn RegistryApi>,
            Arc::clone(&bus) as Arc<dyn WorkerBus>,
            inbound_rx,
            Box::new(FakeSampler),
        )
        .expect("valid period");

        // Keep the sibling fresh through several intervals.
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            inbound_tx
                .send(StatsMessage::new(1, 101, sample(16.0)))
                .await
                .expect("send");
        }

        // Our id (4) is never the minimum, so we broadcast but never report.
        assert!(bus.broadcasts.lock().expect("lock").len() >= 2);
        assert!(registry.creates.lock().expect("lock").is_empty());
        assert!(registry.updates.lock().expect("lock").is_empty());

        coordinator.shutdown();
        coordinator.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_siblings_trigger_permanent_legacy_polling() {
        let registry = Arc::new(FakeRegistry::default());
        let mut bus = FakeBus::new(1);
        bus.pids = vec![101, 102, 103];
        let bus = Arc::new(bus);
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);

        let coordinator = ClusterStatsCoordinator::spawn_with_sampler(
            test_config(100),
            test_route(),
            Arc::clone(&registry) as Arc<dyn RegistryApi>,
            Arc::clone(&bus) as Arc<dyn WorkerBus>,
            inbound_rx,
            Box::new(FakeSampler),
        )
        .expect("valid period");

        // Past period + 3000ms with no sibling broadcast, plus a few ticks
        // of legacy polling.
        tokio::time::sleep(Duration::from_millis(3600)).await;

        let creates = registry.creates.lock().expect("lock");
        let updates = registry.updates.lock().expect("lock");
        let legacy_report = creates
            .iter()
            .map(|c| c.metrics.clone())
            .chain(updates.iter().cloned())
            .find(|metrics| metrics.len() == 3);
        assert!(
            legacy_report.is_some(),
            "legacy mode must report one OS-level sample per live worker pid"
        );
        drop(creates);
        drop(updates);

        coordinator.shutdown();
        coordinator.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_deregisters_best_effort() {
        let registry = Arc::new(FakeRegistry::default());
        let bus = Arc::new(FakeBus::new(1));
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);

        let coordinator = ClusterStatsCoordinator::spawn_with_sampler(
            test_config(100),
            test_route(),
            Arc::clone(&registry) as Arc<dyn RegistryApi>,
            Arc::clone(&bus) as Arc<dyn WorkerBus>,
            inbound_rx,
            Box::new(FakeSampler),
        )
        .expect("valid period");

        // Let the first report land so a registration record is held.
        tokio::time::sleep(Duration::from_millis(300)).await;

        coordinator.shutdown();
        coordinator.join().await;
        // Give the spawned best-effort delete a chance to run.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let deletes = registry.deletes.lock().expect("lock");
        assert_eq!(deletes.as_slice(), [("r1".to_string(), "t1".to_string())]);
    }

    #[tokio::test]
    async fn zero_period_is_a_fatal_construction_error() {
        let registry = Arc::new(FakeRegistry::default());
        let bus = Arc::new(FakeBus::new(1));
        let (_tx, inbound_rx) = mpsc::channel(8);
        let mut config = test_config(100);
        config.period_ms = 0;

        let err = ClusterStatsCoordinator::spawn_with_sampler(
            config,
            test_route(),
            registry,
            bus,
            inbound_rx,
            Box::new(FakeSampler),
        );
        assert!(matches!(err, Err(ConfigError::InvalidPeriod { .. })));
    }
}
