//! Poll scheduler
//!
//! A single timer thread tracks the next due time of every [`PollJob`] and
//! hands due polls to the owning device's lane. A job whose previous poll is
//! still in flight has its tick skipped, never queued, so polls of one job
//! never overlap and results are published in order.

use super::config::SchedulerConfig;
use super::job::{JobEntry, PollJob, PollJobInfo};
use super::lane::LaneTask;
use crate::error::{PinodeError, PinodeResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on how long the timer sleeps with no job due
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Granularity of the drain wait in `stop`
const DRAIN_POLL: Duration = Duration::from_millis(5);

enum Control {
    Wake,
    Stop,
}

struct Shared {
    jobs: Mutex<BTreeMap<PollJob, JobEntry>>,
    lanes: RwLock<HashMap<String, Sender<LaneTask>>>,
    running: AtomicBool,
}

/// Periodic reader of every polled value
pub struct PollScheduler {
    config: SchedulerConfig,
    shared: Arc<Shared>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    handle: Option<JoinHandle<()>>,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl PollScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (control_tx, control_rx) = channel::unbounded();
        Self {
            config,
            shared: Arc::new(Shared {
                jobs: Mutex::new(BTreeMap::new()),
                lanes: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
            control_tx,
            control_rx,
            handle: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Start the timer thread
    pub fn start(&mut self) -> PinodeResult<()> {
        if self.handle.is_some() {
            return Err(PinodeError::Scheduler(
                "Poll scheduler is already running".to_string(),
            ));
        }
        // Stale wake-ups from a previous run
        while self.control_rx.try_recv().is_ok() {}

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let control_rx = self.control_rx.clone();
        let handle = thread::Builder::new()
            .name("poll-scheduler".to_string())
            .spawn(move || timer_loop(shared, control_rx))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                PinodeError::Scheduler(format!("Failed to spawn scheduler thread: {}", e))
            })?;
        self.handle = Some(handle);
        log::info!("Poll scheduler started");
        Ok(())
    }

    /// Route polls for `device_id` to a lane
    pub(crate) fn attach_lane(&self, device_id: &str, lane: Sender<LaneTask>) {
        self.shared.lanes.write().insert(device_id.to_string(), lane);
    }

    pub(crate) fn detach_lane(&self, device_id: &str) {
        self.shared.lanes.write().remove(device_id);
    }

    /// Register a job. Intervals below the configured minimum are clamped.
    ///
    /// The first poll is due immediately.
    pub fn add_job(&self, device_id: &str, value_id: &str, interval: Duration) -> PinodeResult<()> {
        let job = PollJob::new(device_id, value_id);
        let min = self.config.min_poll_interval();
        let interval = if interval < min {
            log::warn!(
                "Poll interval {:?} for {} is below the minimum, using {:?}",
                interval,
                job,
                min
            );
            min
        } else {
            interval
        };

        {
            let mut jobs = self.shared.jobs.lock();
            if jobs.contains_key(&job) {
                return Err(PinodeError::Scheduler(format!(
                    "{} is already scheduled",
                    job
                )));
            }
            log::debug!("Scheduling {} every {:?}", job, interval);
            jobs.insert(job, JobEntry::new(interval, Instant::now()));
        }
        let _ = self.control_tx.send(Control::Wake);
        Ok(())
    }

    pub fn remove_job(&self, device_id: &str, value_id: &str) -> bool {
        self.shared
            .jobs
            .lock()
            .remove(&PollJob::new(device_id, value_id))
            .is_some()
    }

    /// Drop every job of a device; returns how many were removed
    pub fn remove_device_jobs(&self, device_id: &str) -> usize {
        let mut jobs = self.shared.jobs.lock();
        let before = jobs.len();
        jobs.retain(|job, _| job.device_id != device_id);
        before - jobs.len()
    }

    pub fn job_count(&self) -> usize {
        self.shared.jobs.lock().len()
    }

    /// Snapshot of all jobs, ordered by device then value
    pub fn jobs(&self) -> Vec<PollJobInfo> {
        self.shared
            .jobs
            .lock()
            .iter()
            .map(|(job, entry)| PollJobInfo {
                job: job.clone(),
                interval: entry.interval,
                in_flight: entry.in_flight.load(Ordering::Acquire),
                stats: entry.counters.snapshot(),
            })
            .collect()
    }

    pub fn job_info(&self, device_id: &str, value_id: &str) -> Option<PollJobInfo> {
        let job = PollJob::new(device_id, value_id);
        self.jobs().into_iter().find(|info| info.job == job)
    }

    /// Stop dispatching and drain in-flight polls.
    ///
    /// Returns true when every in-flight poll finished within the shutdown
    /// timeout. Polls still running afterwards are abandoned with a warning.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        self.shared.running.store(false, Ordering::Release);
        let _ = self.control_tx.send(Control::Stop);
        if handle.join().is_err() {
            log::error!("Poll scheduler thread panicked");
        }

        let deadline = Instant::now() + self.config.shutdown_timeout();
        loop {
            let in_flight: Vec<PollJob> = self
                .shared
                .jobs
                .lock()
                .iter()
                .filter(|(_, entry)| entry.in_flight.load(Ordering::Acquire))
                .map(|(job, _)| job.clone())
                .collect();

            if in_flight.is_empty() {
                log::info!("Poll scheduler stopped");
                return true;
            }
            if Instant::now() >= deadline {
                for job in in_flight {
                    log::warn!(
                        "Abandoning in-flight poll of {} after {:?}",
                        job,
                        self.config.shutdown_timeout()
                    );
                }
                return false;
            }
            thread::sleep(DRAIN_POLL);
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn timer_loop(shared: Arc<Shared>, control_rx: Receiver<Control>) {
    while shared.running.load(Ordering::Acquire) {
        let now = Instant::now();
        let mut next_wake = now + IDLE_WAIT;

        {
            let mut jobs = shared.jobs.lock();
            let lanes = shared.lanes.read();
            for (job, entry) in jobs.iter_mut() {
                if entry.next_due <= now {
                    fire(job, entry, &lanes);
                    entry.advance(now);
                }
                next_wake = next_wake.min(entry.next_due);
            }
        }

        match control_rx.recv_deadline(next_wake) {
            Ok(Control::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn fire(job: &PollJob, entry: &JobEntry, lanes: &HashMap<String, Sender<LaneTask>>) {
    if entry.in_flight.swap(true, Ordering::AcqRel) {
        entry.counters.skipped.fetch_add(1, Ordering::Relaxed);
        log::debug!("Skipping tick of {}, previous poll still running", job);
        return;
    }

    let Some(lane) = lanes.get(&job.device_id) else {
        entry.in_flight.store(false, Ordering::Release);
        log::debug!("No lane for {}, tick dropped", job);
        return;
    };

    let task = LaneTask::Poll {
        value_id: job.value_id.clone(),
        in_flight: Arc::clone(&entry.in_flight),
        counters: Arc::clone(&entry.counters),
    };
    if lane.send(task).is_err() {
        entry.in_flight.store(false, Ordering::Release);
        log::warn!("Lane for {} is gone, tick dropped", job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::{EventSink, MemoryPublisher};
    use crate::core::device::{into_handle, AcquisitionState, Capabilities, Device};
    use crate::core::value::{Value, ValueDescriptor, ValueType};
    use crate::scheduling::lane::DeviceLane;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts reads; each read sleeps for `delay` and tracks overlap
    struct SlowCounter {
        open: bool,
        delay: Duration,
        reads: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        overlapped: Arc<AtomicBool>,
        /// Reads that panic before the counter starts answering
        panics_left: usize,
    }

    impl SlowCounter {
        fn new(delay: Duration) -> Self {
            Self {
                open: true,
                panics_left: 0,
                delay,
                reads: Arc::new(AtomicUsize::new(0)),
                active: Arc::new(AtomicUsize::new(0)),
                overlapped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Device for SlowCounter {
        fn id(&self) -> &str {
            "counter"
        }
        fn kind(&self) -> &'static str {
            "test"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::sensor()
        }
        fn state(&self) -> AcquisitionState {
            if self.open {
                AcquisitionState::Free
            } else {
                AcquisitionState::Closed
            }
        }
        fn descriptors(&self) -> Vec<ValueDescriptor> {
            vec![ValueDescriptor::sensor("count", ValueType::int())]
        }
        fn open(&mut self, _events: EventSink) -> PinodeResult<()> {
            self.open = true;
            Ok(())
        }
        fn close(&mut self) -> PinodeResult<()> {
            self.open = false;
            Ok(())
        }
        fn read(&mut self, _value_id: &str) -> PinodeResult<Value> {
            if self.panics_left > 0 {
                self.panics_left -= 1;
                panic!("attempt to divide by zero");
            }
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Value::Int(n as i64))
        }
        fn write(&mut self, value_id: &str, _value: Value) -> PinodeResult<()> {
            Err(PinodeError::UnknownValue(value_id.to_string()))
        }
        fn action(
            &mut self,
            value_id: &str,
            _payload: Option<Value>,
        ) -> PinodeResult<Option<Value>> {
            Err(PinodeError::UnknownValue(value_id.to_string()))
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_min_poll_interval(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let scheduler = PollScheduler::new(fast_config());
        scheduler
            .add_job("bmp", "temperature", Duration::from_secs(1))
            .unwrap();
        assert!(scheduler
            .add_job("bmp", "temperature", Duration::from_secs(5))
            .is_err());
        assert_eq!(scheduler.job_count(), 1);
    }

    #[test]
    fn test_interval_clamped_to_minimum() {
        let scheduler = PollScheduler::new(SchedulerConfig::default());
        scheduler
            .add_job("bmp", "pressure", Duration::from_millis(1))
            .unwrap();
        let info = scheduler.job_info("bmp", "pressure").unwrap();
        assert_eq!(info.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_dynamic_removal() {
        let scheduler = PollScheduler::new(fast_config());
        scheduler.add_job("a", "x", Duration::from_secs(1)).unwrap();
        scheduler.add_job("a", "y", Duration::from_secs(1)).unwrap();
        scheduler.add_job("b", "x", Duration::from_secs(1)).unwrap();

        assert!(scheduler.remove_job("b", "x"));
        assert!(!scheduler.remove_job("b", "x"));
        assert_eq!(scheduler.remove_device_jobs("a"), 2);
        assert_eq!(scheduler.job_count(), 0);
    }

    #[test]
    fn test_one_read_per_interval() {
        let device = SlowCounter::new(Duration::ZERO);
        let reads = Arc::clone(&device.reads);
        let memory = MemoryPublisher::new();
        let mut lane =
            DeviceLane::spawn("counter", into_handle(device), Arc::new(memory.clone())).unwrap();

        let mut scheduler = PollScheduler::new(fast_config());
        scheduler.attach_lane("counter", lane.sender());
        scheduler
            .add_job("counter", "count", Duration::from_millis(100))
            .unwrap();
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(450));
        assert!(scheduler.stop());
        lane.shutdown(Instant::now() + Duration::from_secs(1));

        // Ticks at 0, 100, 200, 300, 400 ms
        let n = reads.load(Ordering::SeqCst);
        assert!((4..=6).contains(&n), "unexpected read count {}", n);

        let values: Vec<Value> = memory
            .messages_for("counter", "count")
            .into_iter()
            .map(|m| m.value)
            .collect();
        let expected: Vec<Value> = (1..=n as i64).map(Value::Int).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_slow_read_skips_instead_of_queueing() {
        let device = SlowCounter::new(Duration::from_millis(120));
        let reads = Arc::clone(&device.reads);
        let overlapped = Arc::clone(&device.overlapped);
        let memory = MemoryPublisher::new();
        let mut lane =
            DeviceLane::spawn("counter", into_handle(device), Arc::new(memory.clone())).unwrap();

        let mut scheduler = PollScheduler::new(fast_config());
        scheduler.attach_lane("counter", lane.sender());
        scheduler
            .add_job("counter", "count", Duration::from_millis(40))
            .unwrap();
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(500));
        assert!(scheduler.stop());
        lane.shutdown(Instant::now() + Duration::from_secs(1));

        let stats = scheduler.job_info("counter", "count").unwrap().stats;
        assert!(stats.skipped > 0, "expected skipped ticks: {:?}", stats);
        assert!(!overlapped.load(Ordering::SeqCst));
        // A queued backlog would keep reading after stop; skipping bounds it
        assert!(reads.load(Ordering::SeqCst) <= 6);

        let timestamps: Vec<_> = memory.messages().iter().map(|m| m.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_panicking_read_does_not_wedge_the_job() {
        let mut device = SlowCounter::new(Duration::ZERO);
        device.panics_left = 2;
        let memory = MemoryPublisher::new();
        let mut lane =
            DeviceLane::spawn("counter", into_handle(device), Arc::new(memory.clone())).unwrap();

        let mut scheduler = PollScheduler::new(fast_config());
        scheduler.attach_lane("counter", lane.sender());
        scheduler
            .add_job("counter", "count", Duration::from_millis(50))
            .unwrap();
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(400));
        assert!(scheduler.stop());
        assert!(lane.shutdown(Instant::now() + Duration::from_secs(1)));

        let info = scheduler.job_info("counter", "count").unwrap();
        assert!(!info.in_flight);
        assert_eq!(info.stats.failed, 2);
        assert!(info.stats.completed >= 2, "stats: {:?}", info.stats);
        assert_eq!(
            memory.messages_for("counter", "count")[0].value,
            Value::Int(1)
        );
    }

    #[test]
    fn test_stop_drains_in_flight_poll() {
        let device = SlowCounter::new(Duration::from_millis(150));
        let reads = Arc::clone(&device.reads);
        let mut lane = DeviceLane::spawn(
            "counter",
            into_handle(device),
            Arc::new(MemoryPublisher::new()),
        )
        .unwrap();

        let mut scheduler = PollScheduler::new(fast_config());
        scheduler.attach_lane("counter", lane.sender());
        scheduler
            .add_job("counter", "count", Duration::from_secs(10))
            .unwrap();
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(30));

        assert!(scheduler.stop());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
        lane.shutdown(Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn test_stop_abandons_after_timeout() {
        let device = SlowCounter::new(Duration::from_millis(400));
        let mut lane = DeviceLane::spawn(
            "counter",
            into_handle(device),
            Arc::new(MemoryPublisher::new()),
        )
        .unwrap();

        let config = fast_config().with_shutdown_timeout(Duration::from_millis(50));
        let mut scheduler = PollScheduler::new(config);
        scheduler.attach_lane("counter", lane.sender());
        scheduler
            .add_job("counter", "count", Duration::from_secs(10))
            .unwrap();
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(30));

        assert!(!scheduler.stop());
        assert!(lane.shutdown(Instant::now() + Duration::from_secs(2)));
    }
}
