//! Duty-cycled scan scheduling.
//!
//! The scheduler alternates the radio between scanning and idle on a fixed
//! period. Each tick flips the radio; `stop_listening` cancels the cycle.
//!
//! State, timer handle and a generation counter share one lock. A tick only
//! acts if its generation is still current, so a timer task that wakes up
//! after `stop_listening` (or after a restart) can neither re-arm nor issue a
//! stray radio request.

use crate::scanner::ScanError;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Default time spent in each half of the scan cycle.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(5000);

/// Shortest period accepted by the scheduler.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(1);

/// Start/stop control over a radio scan.
///
/// Implementations must not block: the scheduler calls them while holding
/// its state lock.
pub trait RadioControl: Send + Sync {
    fn start_scan(&self) -> Result<(), ScanError>;
    fn stop_scan(&self) -> Result<(), ScanError>;
}

/// Errors returned when the scan cycle cannot be started.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("no Tokio runtime available to drive the scan timer")]
    NoRuntime,
}

/// Where the scheduler is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// Not running, no timer armed
    #[default]
    Idle,
    /// Cycle running, radio currently stopped
    ScanOff,
    /// Cycle running, radio currently scanning
    ScanOn,
}

impl ScanState {
    /// `true` while the periodic cycle is running.
    pub fn is_active(self) -> bool {
        !matches!(self, ScanState::Idle)
    }
}

#[derive(Debug, Clone, Copy)]
enum RadioRequest {
    Start,
    Stop,
}

#[derive(Default)]
struct Cycle {
    state: ScanState,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

struct Shared {
    radio: Option<Arc<dyn RadioControl>>,
    cycle: Mutex<Cycle>,
}

impl Shared {
    fn request(&self, request: RadioRequest) {
        let Some(radio) = &self.radio else {
            debug!("No radio available, ignoring {request:?} request");
            return;
        };

        let result = match request {
            RadioRequest::Start => radio.start_scan(),
            RadioRequest::Stop => radio.stop_scan(),
        };
        if let Err(e) = result {
            warn!("Radio {request:?} request failed: {e}");
        }
    }

    /// Advance the cycle by one half-period. Returns `false` once this timer
    /// no longer belongs to the running cycle.
    fn tick(&self, generation: u64) -> bool {
        let mut cycle = self.cycle.lock();
        if cycle.generation != generation {
            return false;
        }

        cycle.state = match cycle.state {
            ScanState::Idle => return false,
            ScanState::ScanOff => {
                self.request(RadioRequest::Start);
                ScanState::ScanOn
            }
            ScanState::ScanOn => {
                self.request(RadioRequest::Stop);
                ScanState::ScanOff
            }
        };
        debug!("Scan cycle now {:?}", cycle.state);
        true
    }
}

/// Periodic scan on/off scheduler.
///
/// The timer runs on the Tokio runtime the scheduler was created in. A
/// scheduler created outside any runtime uses the one current at
/// `start_listening` instead.
pub struct ScanScheduler {
    shared: Arc<Shared>,
    interval: Duration,
    runtime: Option<Handle>,
}

impl ScanScheduler {
    /// Create an idle scheduler.
    ///
    /// # Arguments
    /// * `radio` - Radio to drive; `None` when no adapter is available, in
    ///   which case radio requests are skipped but the cycle still runs
    /// * `interval` - Time spent in each half of the cycle (at least
    ///   [`MIN_SCAN_INTERVAL`])
    pub fn new(radio: Option<Arc<dyn RadioControl>>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                radio,
                cycle: Mutex::new(Cycle::default()),
            }),
            interval: interval.max(MIN_SCAN_INTERVAL),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.shared.cycle.lock().state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the scan cycle. Has no effect if it is already running.
    ///
    /// The first tick fires immediately and turns the radio on; after that
    /// the radio flips every `interval`.
    ///
    /// # Errors
    /// [`ScheduleError::NoRuntime`] when there is no Tokio runtime to run the
    /// timer on. The scheduler stays idle.
    pub fn start_listening(&self) -> Result<(), ScheduleError> {
        let mut cycle = self.shared.cycle.lock();
        if cycle.state.is_active() {
            debug!("Scan cycle already running");
            return Ok(());
        }

        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| ScheduleError::NoRuntime)?,
        };

        cycle.state = ScanState::ScanOff;
        cycle.generation = cycle.generation.wrapping_add(1);

        let generation = cycle.generation;
        let shared = Arc::clone(&self.shared);
        let period = self.interval;
        cycle.timer = Some(runtime.spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !shared.tick(generation) {
                    break;
                }
            }
        }));

        debug!("Scan cycle started with {:?} interval", period);
        Ok(())
    }

    /// Stop the scan cycle.
    ///
    /// Always asks the radio to stop scanning, even when idle. Once this
    /// returns no further tick reaches the radio.
    pub fn stop_listening(&self) {
        let mut cycle = self.shared.cycle.lock();
        self.shared.request(RadioRequest::Stop);

        if let Some(timer) = cycle.timer.take() {
            timer.abort();
        }
        if cycle.state.is_active() {
            debug!("Scan cycle stopped");
        }
        cycle.state = ScanState::Idle;
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        if self.state().is_active() {
            self.stop_listening();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum RadioCall {
        Start,
        Stop,
    }

    /// Radio fake that records every request it receives.
    #[derive(Default)]
    pub(crate) struct RecordingRadio {
        calls: Mutex<Vec<RadioCall>>,
    }

    impl RecordingRadio {
        pub(crate) fn calls(&self) -> Vec<RadioCall> {
            self.calls.lock().clone()
        }
    }

    impl RadioControl for RecordingRadio {
        fn start_scan(&self) -> Result<(), ScanError> {
            self.calls.lock().push(RadioCall::Start);
            Ok(())
        }

        fn stop_scan(&self) -> Result<(), ScanError> {
            self.calls.lock().push(RadioCall::Stop);
            Ok(())
        }
    }

    struct BrokenRadio;

    impl RadioControl for BrokenRadio {
        fn start_scan(&self) -> Result<(), ScanError> {
            Err(ScanError::Bluetooth("adapter gone".into()))
        }

        fn stop_scan(&self) -> Result<(), ScanError> {
            Err(ScanError::Bluetooth("adapter gone".into()))
        }
    }

    fn scheduler(radio: &Arc<RecordingRadio>) -> ScanScheduler {
        let radio: Arc<dyn RadioControl> = radio.clone();
        ScanScheduler::new(Some(radio), DEFAULT_SCAN_INTERVAL)
    }

    // Let the timer task run its immediate first tick.
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_alternates_on_each_tick() {
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = scheduler(&radio);
        assert_eq!(scheduler.state(), ScanState::Idle);

        scheduler.start_listening().unwrap();
        assert_eq!(scheduler.state(), ScanState::ScanOff);

        settle().await;
        assert_eq!(scheduler.state(), ScanState::ScanOn);
        assert_eq!(radio.calls(), vec![RadioCall::Start]);

        time::sleep(DEFAULT_SCAN_INTERVAL).await;
        assert_eq!(scheduler.state(), ScanState::ScanOff);
        assert_eq!(radio.calls(), vec![RadioCall::Start, RadioCall::Stop]);

        time::sleep(DEFAULT_SCAN_INTERVAL).await;
        assert_eq!(scheduler.state(), ScanState::ScanOn);
        assert_eq!(
            radio.calls(),
            vec![RadioCall::Start, RadioCall::Stop, RadioCall::Start]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_future_ticks() {
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = scheduler(&radio);

        scheduler.start_listening().unwrap();
        settle().await;
        assert_eq!(scheduler.state(), ScanState::ScanOn);

        scheduler.stop_listening();
        assert_eq!(scheduler.state(), ScanState::Idle);
        let calls = radio.calls();
        assert_eq!(calls, vec![RadioCall::Start, RadioCall::Stop]);

        time::sleep(DEFAULT_SCAN_INTERVAL * 10).await;
        assert_eq!(scheduler.state(), ScanState::Idle);
        assert_eq!(radio.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_scan_off_still_stops_radio() {
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = scheduler(&radio);

        scheduler.start_listening().unwrap();
        settle().await;
        time::sleep(DEFAULT_SCAN_INTERVAL).await;
        assert_eq!(scheduler.state(), ScanState::ScanOff);

        scheduler.stop_listening();
        assert_eq!(scheduler.state(), ScanState::Idle);
        assert_eq!(
            radio.calls(),
            vec![RadioCall::Start, RadioCall::Stop, RadioCall::Stop]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_only_stops_radio() {
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = scheduler(&radio);

        scheduler.stop_listening();
        scheduler.stop_listening();

        assert_eq!(scheduler.state(), ScanState::Idle);
        assert_eq!(radio.calls(), vec![RadioCall::Stop, RadioCall::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = scheduler(&radio);

        scheduler.start_listening().unwrap();
        scheduler.start_listening().unwrap();
        settle().await;
        scheduler.start_listening().unwrap();

        assert_eq!(scheduler.state(), ScanState::ScanOn);
        assert_eq!(radio.calls(), vec![RadioCall::Start]);

        time::sleep(DEFAULT_SCAN_INTERVAL).await;
        assert_eq!(radio.calls(), vec![RadioCall::Start, RadioCall::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_runs_a_single_cycle() {
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = scheduler(&radio);

        scheduler.start_listening().unwrap();
        settle().await;
        scheduler.stop_listening();
        scheduler.start_listening().unwrap();
        settle().await;

        assert_eq!(
            radio.calls(),
            vec![RadioCall::Start, RadioCall::Stop, RadioCall::Start]
        );

        // Only the new timer ticks; the old one would double every request.
        time::sleep(DEFAULT_SCAN_INTERVAL).await;
        assert_eq!(
            radio.calls(),
            vec![
                RadioCall::Start,
                RadioCall::Stop,
                RadioCall::Start,
                RadioCall::Stop
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_interval() {
        let radio = Arc::new(RecordingRadio::default());
        let dyn_radio: Arc<dyn RadioControl> = radio.clone();
        let scheduler = ScanScheduler::new(Some(dyn_radio), Duration::from_millis(100));
        assert_eq!(scheduler.interval(), Duration::from_millis(100));

        scheduler.start_listening().unwrap();
        settle().await;
        time::sleep(Duration::from_millis(450)).await;

        // Ticks at 0, 100, 200, 300 and 400 ms
        assert_eq!(radio.calls().len(), 5);
        assert_eq!(scheduler.state(), ScanState::ScanOn);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let scheduler = ScanScheduler::new(None, Duration::ZERO);
        assert_eq!(scheduler.interval(), MIN_SCAN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_runs_without_radio() {
        let scheduler = ScanScheduler::new(None, DEFAULT_SCAN_INTERVAL);

        scheduler.start_listening().unwrap();
        settle().await;
        assert_eq!(scheduler.state(), ScanState::ScanOn);

        time::sleep(DEFAULT_SCAN_INTERVAL).await;
        assert_eq!(scheduler.state(), ScanState::ScanOff);

        scheduler.stop_listening();
        assert_eq!(scheduler.state(), ScanState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_survives_radio_errors() {
        let radio: Arc<dyn RadioControl> = Arc::new(BrokenRadio);
        let scheduler = ScanScheduler::new(Some(radio), DEFAULT_SCAN_INTERVAL);

        scheduler.start_listening().unwrap();
        settle().await;
        assert_eq!(scheduler.state(), ScanState::ScanOn);

        time::sleep(DEFAULT_SCAN_INTERVAL).await;
        assert_eq!(scheduler.state(), ScanState::ScanOff);

        scheduler.stop_listening();
        assert_eq!(scheduler.state(), ScanState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_radio() {
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = scheduler(&radio);

        scheduler.start_listening().unwrap();
        settle().await;
        drop(scheduler);

        time::sleep(DEFAULT_SCAN_INTERVAL * 3).await;
        assert_eq!(radio.calls(), vec![RadioCall::Start, RadioCall::Stop]);
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = scheduler(&radio);

        assert_eq!(scheduler.start_listening(), Err(ScheduleError::NoRuntime));
        assert_eq!(scheduler.state(), ScanState::Idle);
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_start_from_thread_without_runtime() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let radio = Arc::new(RecordingRadio::default());
        let scheduler = rt.block_on(async { scheduler(&radio) });

        // Called outside the runtime; the timer goes to the captured one
        scheduler.start_listening().unwrap();
        assert_eq!(scheduler.state(), ScanState::ScanOff);

        rt.block_on(async { time::sleep(Duration::from_millis(50)).await });
        assert_eq!(scheduler.state(), ScanState::ScanOn);
        assert_eq!(radio.calls(), vec![RadioCall::Start]);

        scheduler.stop_listening();
        assert_eq!(radio.calls(), vec![RadioCall::Start, RadioCall::Stop]);
    }

    #[test]
    fn test_state_is_active() {
        assert!(!ScanState::Idle.is_active());
        assert!(ScanState::ScanOff.is_active());
        assert!(ScanState::ScanOn.is_active());
        assert_eq!(ScanState::default(), ScanState::Idle);
    }
}
