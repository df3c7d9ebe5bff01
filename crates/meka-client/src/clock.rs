//! Presentation clock
//!
//! A local ticker that advances a counter on a fixed interval, independent of message
//! arrival. It is not the game turn: it only drives time-based presentation. The server
//! periodically supplies authoritative clock parameters and the clock jumps to them.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

/// Default interval between local ticks
pub const DEFAULT_TICK_TIME: Duration = Duration::from_millis(250);

/// Bounds applied to the ticker period; tokio's interval panics on zero and on
/// deadlines past the end of `Instant`
const MIN_TICK_TIME: Duration = Duration::from_millis(1);
const MAX_TICK_TIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Server-supplied clock parameters (`{tickTime, tickCount}`, tick time in milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockParams {
    pub tick_time: u64,
    pub tick_count: u64,
}

impl ClockParams {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_time)
    }
}

/// Construction options for a [`Clock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSettings {
    pub tick_time: Duration,
    pub tick_count: u64,
    /// Start ticking immediately (requires a Tokio runtime)
    pub auto_start: bool,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            tick_time: DEFAULT_TICK_TIME,
            tick_count: 0,
            auto_start: false,
        }
    }
}

/// Callback invoked with the new count after every local tick
pub type TickObserver = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug)]
struct ClockState {
    tick_time: Duration,
    tick_count: u64,
    /// Bumped on every start/stop so a ticker that outlived its cancellation never counts
    generation: u64,
}

/// Cancellable periodic ticker
pub struct Clock {
    state: Arc<Mutex<ClockState>>,
    task: Option<JoinHandle<()>>,
    on_tick: Option<TickObserver>,
}

impl Clock {
    pub fn new(settings: ClockSettings) -> Self {
        let mut clock = Self {
            state: Arc::new(Mutex::new(ClockState {
                tick_time: settings.tick_time,
                tick_count: settings.tick_count,
                generation: 0,
            })),
            task: None,
            on_tick: None,
        };
        if settings.auto_start {
            clock.start(None);
        }
        clock
    }

    /// Register the callback fired on each local tick
    pub fn with_observer(mut self, on_tick: TickObserver) -> Self {
        self.on_tick = Some(on_tick);
        self
    }

    /// Current tick count
    pub fn tick_count(&self) -> u64 {
        self.lock().tick_count
    }

    /// Current interval between ticks
    pub fn tick_time(&self) -> Duration {
        self.lock().tick_time
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start (or restart) ticking, optionally replacing interval and count first
    ///
    /// Without a Tokio runtime the parameters are still applied but no ticker is spawned.
    pub fn start(&mut self, params: Option<ClockParams>) {
        self.cancel();

        let (generation, period) = {
            let mut state = self.lock();
            if let Some(params) = params {
                state.tick_time = params.tick_duration();
                state.tick_count = params.tick_count;
            }
            state.generation += 1;
            (
                state.generation,
                state.tick_time.clamp(MIN_TICK_TIME, MAX_TICK_TIME),
            )
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Clock started outside a Tokio runtime; local ticks are disabled");
            return;
        };

        self.task = Some(runtime.spawn(run_ticker(
            Arc::clone(&self.state),
            generation,
            period,
            self.on_tick.clone(),
        )));
    }

    /// Stop ticking; the counter keeps its current value
    pub fn stop(&mut self) {
        self.cancel();
        self.lock().generation += 1;
    }

    /// Stop, replace interval and count, and restart
    ///
    /// The visible counter jumps to `tick_count` immediately.
    pub fn resync(&mut self, tick_time: Duration, tick_count: u64) {
        debug!(?tick_time, tick_count, "Resynchronizing clock");
        self.start(Some(ClockParams {
            tick_time: tick_time.as_millis() as u64,
            tick_count,
        }));
    }

    /// Resynchronize from server-supplied parameters
    pub fn sync_with(&mut self, params: ClockParams) {
        self.resync(params.tick_duration(), params.tick_count);
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(ClockSettings::default())
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Clock")
            .field("tick_time", &state.tick_time)
            .field("tick_count", &state.tick_count)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_ticker(
    state: Arc<Mutex<ClockState>>,
    generation: u64,
    period: Duration,
    on_tick: Option<TickObserver>,
) {
    let mut interval = interval_at(Instant::now() + period, period);
    loop {
        interval.tick().await;

        let count = {
            let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.generation != generation {
                return;
            }
            state.tick_count += 1;
            state.tick_count
        };

        if let Some(on_tick) = &on_tick {
            on_tick(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(tick_ms: u64) -> ClockSettings {
        ClockSettings {
            tick_time: Duration::from_millis(tick_ms),
            ..ClockSettings::default()
        }
    }

    #[test]
    fn test_clock_defaults() {
        let clock = Clock::default();
        assert_eq!(clock.tick_time(), DEFAULT_TICK_TIME);
        assert_eq!(clock.tick_count(), 0);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_start_without_runtime_applies_params() {
        let mut clock = Clock::default();
        clock.start(Some(ClockParams {
            tick_time: 100,
            tick_count: 7,
        }));
        assert_eq!(clock.tick_count(), 7);
        assert_eq!(clock.tick_time(), Duration::from_millis(100));
        assert!(!clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_counts_one_per_interval() {
        let mut clock = Clock::new(settings(100));
        clock.start(None);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(clock.tick_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_tick_time_does_not_tick() {
        let mut clock = Clock::default();
        clock.sync_with(ClockParams {
            tick_time: u64::MAX,
            tick_count: 5,
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(clock.is_running());
        assert_eq!(clock.tick_count(), 5);
        assert_eq!(clock.tick_time(), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_start() {
        let clock = Clock::new(ClockSettings {
            auto_start: true,
            ..settings(50)
        });
        assert!(clock.is_running());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(clock.tick_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_counter() {
        let mut clock = Clock::new(settings(100));
        clock.start(None);
        tokio::time::sleep(Duration::from_millis(250)).await;
        clock.stop();
        assert_eq!(clock.tick_count(), 2);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(clock.tick_count(), 2);
        assert!(!clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_jumps_immediately() {
        let mut clock = Clock::new(settings(100));
        clock.start(None);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.tick_count(), 2);

        clock.resync(Duration::from_millis(40), 500);
        assert_eq!(clock.tick_count(), 500);
        assert_eq!(clock.tick_time(), Duration::from_millis(40));

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert_eq!(clock.tick_count(), 502);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_tick() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut clock = Clock::new(settings(10))
            .with_observer(Arc::new(move |count| sink.lock().unwrap().push(count)));

        clock.sync_with(ClockParams {
            tick_time: 10,
            tick_count: 20,
        });
        tokio::time::sleep(Duration::from_millis(35)).await;
        clock.stop();

        assert_eq!(*seen.lock().unwrap(), vec![21, 22, 23]);
    }

    #[test]
    fn test_clock_params_json() {
        let params: ClockParams =
            serde_json::from_str(r#"{"tickTime": 250, "tickCount": 12}"#).unwrap();
        assert_eq!(params.tick_duration(), Duration::from_millis(250));
        assert_eq!(params.tick_count, 12);
    }
}
