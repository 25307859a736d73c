//! The presence-polling loop.
//!
//! [`BluetoothTracker`] owns the tracking set and runs one poll cycle per
//! tick of its [`PollLoop`](crate::scheduler::PollLoop):
//!
//! 1. if new devices are tracked, run a broad scan and add every unseen
//!    address to the tracking set;
//! 2. for every tracked address, unless the tracker has been disabled in the
//!    meantime, run a targeted lookup and report the device if it answered.
//!
//! Nothing in a cycle can fail: the discovery adapter has already turned
//! transport errors into outcomes, which are only counted here.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

use crate::config::TrackerConfig;
use crate::control::{EnabledFlag, TrackerControl};
use crate::discovery::{Discovery, DiscoveryAdapter, LookupOutcome, ScanOutcome};
use crate::error::Result;
use crate::known_devices;
use crate::presence::{PresenceReporter, PresenceSink};
use crate::scheduler::PollTask;
use crate::state::StateStore;
use crate::tracking::{TrackingSet, TrackingSnapshot};
use crate::types::Observation;

/// Tracker policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Add devices found by broad scans to the tracking set.
    pub track_new: bool,
    /// Timeout of each targeted lookup.
    pub lookup_timeout: Duration,
}

impl From<&TrackerConfig> for TrackerSettings {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            track_new: config.track_new_devices,
            lookup_timeout: config.lookup_timeout(),
        }
    }
}

/// What happened during one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CycleReport {
    /// Time the cycle was invoked with.
    pub started_at: Option<DateTime<Utc>>,
    /// Addresses added to the tracking set by the broad scan.
    pub discovered: usize,
    /// Whether the broad scan failed.
    pub scan_failed: bool,
    /// Targeted lookups performed.
    pub looked_up: usize,
    /// Devices that answered and were reported.
    pub reported: usize,
    /// Devices that did not answer.
    pub absent: usize,
    /// Lookups that failed at the transport level.
    pub failed: usize,
    /// Lookups skipped because the tracker was disabled.
    pub skipped: usize,
}

/// Bluetooth presence tracker.
pub struct BluetoothTracker {
    discovery: DiscoveryAdapter,
    reporter: PresenceReporter,
    flag: EnabledFlag,
    settings: TrackerSettings,
    tracking: Mutex<TrackingSet>,
    last_cycle: Mutex<Option<CycleReport>>,
}

impl BluetoothTracker {
    /// Create a tracker over an already classified tracking set.
    #[must_use]
    pub fn new(
        discovery: DiscoveryAdapter,
        reporter: PresenceReporter,
        flag: EnabledFlag,
        tracking: TrackingSet,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            discovery,
            reporter,
            flag,
            settings,
            tracking: Mutex::new(tracking),
            last_cycle: Mutex::new(None),
        }
    }

    /// Startup burst: when new devices are tracked, scan once, add every
    /// unseen address and report each of them right away.
    ///
    /// Returns the number of devices reported.
    pub async fn start(&self) -> usize {
        if !self.settings.track_new {
            return 0;
        }

        let (added, _) = self.add_unseen().await;
        for observation in &added {
            self.reporter.report(observation);
        }
        if !added.is_empty() {
            info!(count = added.len(), "Tracking newly discovered Bluetooth devices");
        }
        added.len()
    }

    /// Run one poll cycle.
    #[instrument(skip(self))]
    pub async fn poll_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            started_at: Some(now),
            ..CycleReport::default()
        };

        if self.settings.track_new {
            let (added, scan_failed) = self.add_unseen().await;
            report.discovered = added.len();
            report.scan_failed = scan_failed;
        }

        let tracked = self.lock_tracking().tracked().to_vec();
        for address in tracked {
            if !self.flag.is_enabled() {
                report.skipped += 1;
                continue;
            }

            report.looked_up += 1;
            match self
                .discovery
                .lookup(address, self.settings.lookup_timeout)
                .await
            {
                LookupOutcome::Present(observation) => {
                    self.reporter.report(&observation);
                    report.reported += 1;
                }
                LookupOutcome::Absent => report.absent += 1,
                LookupOutcome::Failed { .. } => report.failed += 1,
            }
        }

        debug!(?report, "Poll cycle finished");
        *lock(&self.last_cycle) = Some(report.clone());
        report
    }

    /// Broad scan, then add unseen addresses. Returns the added devices and
    /// whether the scan failed.
    async fn add_unseen(&self) -> (Vec<Observation>, bool) {
        let outcome = self.discovery.scan_new().await;
        let scan_failed = matches!(outcome, ScanOutcome::Failed { .. });

        let mut tracking = self.lock_tracking();
        let added = outcome
            .into_devices()
            .into_iter()
            .filter(|device| tracking.add_discovered(device.address))
            .collect();
        (added, scan_failed)
    }

    /// Copy of the tracking set partitions.
    pub fn tracking_snapshot(&self) -> TrackingSnapshot {
        self.lock_tracking().snapshot()
    }

    /// Number of tracked addresses.
    pub fn tracked_len(&self) -> usize {
        self.lock_tracking().tracked_len()
    }

    /// Report of the most recent cycle.
    pub fn last_cycle(&self) -> Option<CycleReport> {
        lock(&self.last_cycle).clone()
    }

    /// Whether the tracker is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.flag.is_enabled()
    }

    /// Tracker policy.
    pub const fn settings(&self) -> TrackerSettings {
        self.settings
    }

    fn lock_tracking(&self) -> MutexGuard<'_, TrackingSet> {
        lock(&self.tracking)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl PollTask for BluetoothTracker {
    async fn poll(&self, now: DateTime<Utc>) {
        self.poll_cycle(now).await;
    }
}

/// A tracker wired to its collaborators.
pub struct TrackerHandle {
    /// The tracker itself, ready to be handed to a poll loop.
    pub tracker: Arc<BluetoothTracker>,
    /// Enable/disable surface for the service registry.
    pub control: TrackerControl,
}

/// Build a tracker from configuration and run its startup sequence.
///
/// Restores the enabled flag, classifies the persisted device records, and
/// runs the startup burst. The caller arms the poll loop.
///
/// # Errors
///
/// Returns an error if the known-devices file exists but cannot be loaded.
pub async fn setup(
    config: &TrackerConfig,
    radio: Arc<dyn Discovery>,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn PresenceSink>,
) -> Result<TrackerHandle> {
    let flag = EnabledFlag::new(store);
    let control = TrackerControl::new(flag.clone(), Arc::clone(&radio));
    control.restore();

    let devices = known_devices::load(&config.known_devices_path)?;
    let tracking = TrackingSet::from_known_devices(&devices);
    info!(
        tracked = tracking.tracked_len(),
        ignored = tracking.ignored_len(),
        path = %config.known_devices_path.display(),
        "Loaded known Bluetooth devices"
    );

    let tracker = Arc::new(BluetoothTracker::new(
        DiscoveryAdapter::new(radio, flag.clone(), config.inquiry_duration()),
        PresenceReporter::new(sink),
        flag,
        tracking,
        TrackerSettings::from(config),
    ));
    tracker.start().await;

    Ok(TrackerHandle { tracker, control })
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;
    use crate::address::BtAddress;
    use crate::discovery::mock::{MockDevice, MockDiscovery};
    use crate::discovery::BluetoothResult;
    use crate::known_devices::KnownDevice;
    use crate::presence::testing::RecordingSink;
    use crate::scheduler::{ManualScheduler, PollLoop};
    use crate::state::InMemoryStateStore;

    fn addr(s: &str) -> BtAddress {
        s.parse().unwrap()
    }

    /// Formatted log output collected in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    fn record(mac: &str, track: bool) -> KnownDevice {
        KnownDevice {
            mac: mac.to_string(),
            name: None,
            track,
        }
    }

    fn settings(track_new: bool) -> TrackerSettings {
        TrackerSettings {
            track_new,
            lookup_timeout: Duration::from_millis(10),
        }
    }

    struct Fixture {
        tracker: Arc<BluetoothTracker>,
        control: TrackerControl,
        sink: Arc<RecordingSink>,
    }

    fn fixture(radio: Arc<dyn Discovery>, records: &[KnownDevice], track_new: bool) -> Fixture {
        let store = Arc::new(InMemoryStateStore::new());
        let flag = EnabledFlag::new(store);
        let control = TrackerControl::new(flag.clone(), Arc::clone(&radio));
        control.enable();
        let sink = Arc::new(RecordingSink::default());
        let tracker = Arc::new(BluetoothTracker::new(
            DiscoveryAdapter::new(radio, flag.clone(), Duration::from_millis(10)),
            PresenceReporter::new(sink.clone()),
            flag,
            TrackingSet::from_known_devices(records),
            settings(track_new),
        ));
        Fixture {
            tracker,
            control,
            sink,
        }
    }

    #[tokio::test]
    async fn test_startup_scenario() {
        let radio = Arc::new(MockDiscovery::with_devices(vec![MockDevice::new(
            addr("AA:BB:CC:DD:EE:03"),
            "Phone",
        )]));
        let f = fixture(
            radio,
            &[
                record("BT_AA:BB:CC:DD:EE:01", true),
                record("BT_AA:BB:CC:DD:EE:02", false),
            ],
            true,
        );

        assert_eq!(f.tracker.start().await, 1);

        let snapshot = f.tracker.tracking_snapshot();
        assert_eq!(
            snapshot.track,
            vec![addr("AA:BB:CC:DD:EE:01"), addr("AA:BB:CC:DD:EE:03")]
        );
        assert_eq!(snapshot.do_not_track, vec![addr("AA:BB:CC:DD:EE:02")]);
        assert_eq!(
            f.sink.seen(),
            vec![("BT_AA:BB:CC:DD:EE:03".to_string(), Some("Phone".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_startup_without_track_new_does_not_scan() {
        let radio = Arc::new(MockDiscovery::with_devices(vec![MockDevice::new(
            addr("AA:BB:CC:DD:EE:03"),
            "Phone",
        )]));
        let f = fixture(radio.clone(), &[], false);

        assert_eq!(f.tracker.start().await, 0);
        assert_eq!(radio.inquiry_calls(), 0);
        assert_eq!(f.tracker.tracked_len(), 0);
    }

    #[tokio::test]
    async fn test_ignored_device_is_never_tracked_or_reported() {
        let ignored = addr("AA:BB:CC:DD:EE:02");
        let radio = Arc::new(MockDiscovery::with_devices(vec![MockDevice::new(
            ignored, "Neighbour",
        )]));
        let f = fixture(radio, &[record("BT_AA:BB:CC:DD:EE:02", false)], true);

        f.tracker.start().await;
        let report = f.tracker.poll_cycle(Utc::now()).await;

        assert_eq!(report.discovered, 0);
        assert_eq!(report.looked_up, 0);
        assert!(f.sink.seen().is_empty());
        assert!(f.tracker.tracking_snapshot().track.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_discovers_without_reporting_then_looks_up() {
        let phone = addr("AA:BB:CC:DD:EE:01");
        let radio = Arc::new(MockDiscovery::new());
        let f = fixture(radio.clone(), &[], true);
        f.tracker.start().await;

        radio.upsert(MockDevice::new(phone, "Phone"));
        let report = f.tracker.poll_cycle(Utc::now()).await;

        assert_eq!(report.discovered, 1);
        assert_eq!(report.looked_up, 1);
        assert_eq!(report.reported, 1);
        // One report from the lookup, none from the discovery step.
        assert_eq!(f.sink.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_absent_device_is_not_reported() {
        let radio = Arc::new(MockDiscovery::with_devices(vec![MockDevice::new(
            addr("AA:BB:CC:DD:EE:01"),
            "Phone",
        )
        .out_of_range()]));
        let f = fixture(radio, &[record("BT_AA:BB:CC:DD:EE:01", true)], false);
        let (logs, _guard) = capture_logs();

        let report = f.tracker.poll_cycle(Utc::now()).await;

        assert_eq!(report.absent, 1);
        assert_eq!(report.failed, 0);
        assert!(f.sink.seen().is_empty());

        let logs = logs.contents();
        assert!(logs.contains("AA:BB:CC:DD:EE:01"), "lookup not logged: {logs}");
        assert!(!logs.contains("ERROR"), "unexpected error log: {logs}");
    }

    #[tokio::test]
    async fn test_failed_lookup_is_logged_as_error() {
        let broken = addr("AA:BB:CC:DD:EE:01");
        let radio = Arc::new(MockDiscovery::new());
        radio.fail_lookup(broken);
        let f = fixture(radio, &[record("BT_AA:BB:CC:DD:EE:01", true)], false);
        let (logs, _guard) = capture_logs();

        f.tracker.poll_cycle(Utc::now()).await;

        let logs = logs.contents();
        assert!(
            logs.lines()
                .any(|line| line.contains("ERROR") && line.contains("AA:BB:CC:DD:EE:01")),
            "missing error log: {logs}"
        );
    }

    #[tokio::test]
    async fn test_unresolved_name_is_reported_without_name() {
        let phone = addr("AA:BB:CC:DD:EE:01");
        let radio = Arc::new(MockDiscovery::with_devices(vec![
            MockDevice::new(phone, "Phone").hidden().unresolved(),
        ]));
        let f = fixture(radio, &[record("BT_AA:BB:CC:DD:EE:01", true)], false);

        let report = f.tracker.poll_cycle(Utc::now()).await;

        assert_eq!(report.reported, 1);
        assert_eq!(f.sink.seen(), vec![("BT_AA:BB:CC:DD:EE:01".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_stop_cycle() {
        let broken = addr("AA:BB:CC:DD:EE:01");
        let radio = Arc::new(MockDiscovery::with_devices(vec![MockDevice::new(
            addr("AA:BB:CC:DD:EE:02"),
            "Phone",
        )]));
        radio.fail_lookup(broken);
        radio.fail_inquiry(true);
        let f = fixture(
            radio,
            &[
                record("BT_AA:BB:CC:DD:EE:01", true),
                record("BT_AA:BB:CC:DD:EE:02", true),
            ],
            true,
        );

        let report = f.tracker.poll_cycle(Utc::now()).await;

        assert!(report.scan_failed);
        assert_eq!(report.failed, 1);
        assert_eq!(report.reported, 1);
        assert_eq!(f.tracker.last_cycle(), Some(report));
    }

    #[tokio::test]
    async fn test_disabled_cycle_touches_nothing() {
        let radio = Arc::new(MockDiscovery::with_devices(vec![
            MockDevice::new(addr("AA:BB:CC:DD:EE:01"), "Phone"),
            MockDevice::new(addr("AA:BB:CC:DD:EE:09"), "New"),
        ]));
        let f = fixture(radio.clone(), &[record("BT_AA:BB:CC:DD:EE:01", true)], true);
        f.control.disable().await;

        let report = f.tracker.poll_cycle(Utc::now()).await;

        assert_eq!(radio.inquiry_calls(), 0);
        assert_eq!(radio.lookup_calls(), 0);
        assert_eq!(report.skipped, 1);
        assert!(f.sink.seen().is_empty());
        assert_eq!(f.tracker.tracked_len(), 1);
    }

    /// Radio that invokes `disable()` right after a given number of lookups.
    struct DisablingRadio {
        inner: MockDiscovery,
        disable_after: usize,
        control: OnceLock<TrackerControl>,
    }

    #[async_trait]
    impl Discovery for DisablingRadio {
        async fn inquiry(&self, duration: Duration) -> BluetoothResult<Vec<Observation>> {
            self.inner.inquiry(duration).await
        }

        async fn lookup_name(
            &self,
            address: BtAddress,
            timeout: Duration,
        ) -> BluetoothResult<Option<Observation>> {
            let result = self.inner.lookup_name(address, timeout).await;
            if self.inner.lookup_calls() == self.disable_after {
                if let Some(control) = self.control.get() {
                    control.disable().await;
                }
            }
            result
        }

        async fn cancel_inquiry(&self) -> BluetoothResult<()> {
            self.inner.cancel_inquiry().await
        }
    }

    #[tokio::test]
    async fn test_disable_mid_cycle_skips_remaining_lookups() {
        let addresses = [
            addr("AA:BB:CC:DD:EE:01"),
            addr("AA:BB:CC:DD:EE:02"),
            addr("AA:BB:CC:DD:EE:03"),
        ];
        let radio = Arc::new(DisablingRadio {
            inner: MockDiscovery::with_devices(
                addresses
                    .iter()
                    .map(|a| MockDevice::new(*a, "Device"))
                    .collect(),
            ),
            disable_after: 2,
            control: OnceLock::new(),
        });
        let records: Vec<_> = addresses
            .iter()
            .map(|a| record(&format!("BT_{a}"), true))
            .collect();
        let f = fixture(radio.clone(), &records, false);
        let _ = radio.control.set(f.control.clone());

        let scheduler = Arc::new(ManualScheduler::new());
        let poll = PollLoop::new(f.tracker.clone(), scheduler.clone(), Duration::from_secs(12));
        poll.start(Utc::now());

        scheduler.fire_next().await;
        let first = f.tracker.last_cycle().unwrap();
        assert_eq!(first.looked_up, 2);
        assert_eq!(first.skipped, 1);
        assert_eq!(radio.inner.lookups(), addresses[..2].to_vec());
        assert!(!f.tracker.is_enabled());

        scheduler.fire_next().await;
        let second = f.tracker.last_cycle().unwrap();
        assert_eq!(second.looked_up, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(radio.inner.lookup_calls(), 2);
        assert_eq!(f.sink.seen().len(), 2);
        assert_eq!(poll.cycles(), 2);
    }

    #[tokio::test]
    async fn test_setup_loads_known_devices_and_enables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_devices.toml");
        std::fs::write(
            &path,
            "[[device]]\nmac = \"BT_AA:BB:CC:DD:EE:01\"\ntrack = true\n\n\
             [[device]]\nmac = \"BT_AA:BB:CC:DD:EE:02\"\ntrack = false\n",
        )
        .unwrap();
        let config = TrackerConfig {
            known_devices_path: path,
            inquiry_duration_ms: 1_280,
            ..TrackerConfig::default()
        };
        let radio = Arc::new(MockDiscovery::with_devices(vec![MockDevice::new(
            addr("AA:BB:CC:DD:EE:03"),
            "Phone",
        )]));
        let sink = Arc::new(RecordingSink::default());

        let handle = setup(
            &config,
            radio,
            Arc::new(InMemoryStateStore::new()),
            sink.clone(),
        )
        .await
        .unwrap();

        assert!(handle.tracker.is_enabled());
        assert!(handle.control.flag().is_enabled());
        assert_eq!(handle.tracker.tracked_len(), 2);
        assert_eq!(sink.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_rejects_malformed_known_devices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_devices.toml");
        std::fs::write(&path, "[[device]\n").unwrap();
        let config = TrackerConfig {
            known_devices_path: path,
            ..TrackerConfig::default()
        };

        let result = setup(
            &config,
            Arc::new(MockDiscovery::new()),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(RecordingSink::default()),
        )
        .await;

        assert!(matches!(
            result,
            Err(crate::error::PresenceError::KnownDevices(_))
        ));
    }
}
