//! Phase-locked vsync events per display
//!
//! A [`VsyncTimer`] runs a thread waiting for the vblanks of one display and reports their
//! timestamps. If the hardware can not deliver vblank events, the timer falls back to
//! sleeping until the next vblank would have happened, keeping the phase of the last
//! reported timestamp. Reported timestamps are always taken from the monotonic clock.

use std::{
    fmt, io,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info_span, trace, warn};

use super::kms::KmsDevice;
use crate::utils::{Clock, Monotonic, Time};

/// Refresh rate used while the refresh rate of the display is unknown
pub const DEFAULT_REFRESH_RATE: u64 = 60;

/// Shortest period of synthetic vblanks
pub const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Errors of waiting for a vblank
#[derive(thiserror::Error, Debug)]
pub enum VblankError {
    /// The wait was interrupted by a signal
    #[error("Waiting for vblank was interrupted")]
    Interrupted,
    /// The hardware is not able to deliver the vblank
    #[error("Failed to wait for vblank")]
    Failed(#[source] io::Error),
}

impl From<io::Error> for VblankError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::Interrupted {
            VblankError::Interrupted
        } else {
            VblankError::Failed(err)
        }
    }
}

/// Hardware source of vblank events
pub trait VblankSource: Send + 'static {
    /// Block until the next vblank and return its monotonic timestamp
    fn wait_vblank(&mut self) -> Result<Duration, VblankError>;
}

/// Vblanks of a crtc of a kms device
#[derive(Debug, Clone)]
pub struct DrmVblankSource {
    kms: Arc<dyn KmsDevice>,
    pipe: u32,
}

impl DrmVblankSource {
    /// Wait on the crtc at `pipe` of `kms`
    pub fn new(kms: Arc<dyn KmsDevice>, pipe: u32) -> Self {
        DrmVblankSource { kms, pipe }
    }

    /// Pipe of the crtc
    pub fn pipe(&self) -> u32 {
        self.pipe
    }
}

impl VblankSource for DrmVblankSource {
    fn wait_vblank(&mut self) -> Result<Duration, VblankError> {
        self.kms.wait_vblank(self.pipe).map_err(VblankError::from)
    }
}

#[derive(Debug)]
struct TimerState {
    enabled: bool,
    shutdown: bool,
    // bumped on every control change, a wait started before is stale
    generation: u64,
    last_timestamp: Option<Duration>,
    refresh: f32,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<TimerState>,
    signal: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        // the state stays consistent even if a callback panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Emits the vsync events of one display on a dedicated thread
///
/// The timer starts disabled. Dropping it stops and joins the thread, no callback is
/// invoked afterwards.
pub struct VsyncTimer {
    display: u32,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for VsyncTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VsyncTimer")
            .field("display", &self.display)
            .field("state", &*self.shared.lock())
            .finish_non_exhaustive()
    }
}

impl VsyncTimer {
    /// Spawn the timer thread of `display`
    ///
    /// `callback` is invoked on the timer thread with the timestamp of every vblank
    /// while the timer is enabled.
    pub fn new<S, F>(display: u32, source: S, callback: F) -> io::Result<VsyncTimer>
    where
        S: VblankSource,
        F: FnMut(Duration) + Send + 'static,
    {
        let clock = Clock::<Monotonic>::new()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                enabled: false,
                shutdown: false,
                generation: 0,
                last_timestamp: None,
                refresh: 0.0,
            }),
            signal: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let id = display;
        let thread = thread::Builder::new()
            .name(format!("vsync-{}", id))
            .spawn(move || {
                let span = info_span!("vsync", display = id);
                let _guard = span.enter();
                timer_loop(&thread_shared, source, clock, callback);
                debug!("Vsync timer stopped");
            })?;

        Ok(VsyncTimer {
            display,
            shared,
            thread: Some(thread),
        })
    }

    /// Display of the timer
    pub fn display(&self) -> u32 {
        self.display
    }

    /// Enable or disable vsync events
    ///
    /// Every call forgets the phase of the last event, the next event starts a new phase.
    pub fn vsync_control(&self, enabled: bool) {
        let mut state = self.shared.lock();
        state.enabled = enabled;
        state.last_timestamp = None;
        state.generation += 1;
        drop(state);
        self.shared.signal.notify_all();
    }

    /// Returns true if vsync events are enabled
    pub fn is_enabled(&self) -> bool {
        self.shared.lock().enabled
    }

    /// Set the refresh rate of the active mode, used when the hardware delivers no vblanks
    ///
    /// Rates below 1Hz are treated as unknown, rates above 1kHz are capped.
    pub fn set_refresh_rate(&self, refresh: f32) {
        self.shared.lock().refresh = refresh;
    }
}

impl Drop for VsyncTimer {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.signal.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(display = self.display, "Vsync thread panicked");
            }
        }
    }
}

fn timer_loop<S, F>(shared: &Shared, mut source: S, clock: Clock<Monotonic>, mut callback: F)
where
    S: VblankSource,
    F: FnMut(Duration),
{
    loop {
        let (generation, refresh, last_timestamp) = {
            let mut state = shared.lock();
            while !state.enabled && !state.shutdown {
                state = shared
                    .signal
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if state.shutdown {
                return;
            }
            (state.generation, state.refresh, state.last_timestamp)
        };

        let timestamp = match source.wait_vblank() {
            Ok(timestamp) => timestamp,
            Err(VblankError::Interrupted) => continue,
            Err(VblankError::Failed(err)) => {
                trace!("Hardware vblank unavailable ({}), using synthetic vblank", err);
                match synthetic_wait(&clock, frame_period(refresh), last_timestamp) {
                    Ok(timestamp) => timestamp,
                    Err(err) => {
                        warn!("Synthetic vblank failed: {}", err);
                        continue;
                    }
                }
            }
        };

        {
            let state = shared.lock();
            if state.shutdown {
                return;
            }
            if !state.enabled || state.generation != generation {
                continue;
            }
        }

        callback(timestamp);

        let mut state = shared.lock();
        if state.generation == generation {
            state.last_timestamp = Some(timestamp);
        }
    }
}

/// Duration of one refresh cycle at `refresh` Hz
///
/// The rate is truncated to whole Hz, unknown rates fall back to [`DEFAULT_REFRESH_RATE`].
/// The period never drops below [`MIN_FRAME_PERIOD`].
pub fn frame_period(refresh: f32) -> Duration {
    let hz = match refresh as u64 {
        0 => DEFAULT_REFRESH_RATE,
        hz => hz,
    };
    Duration::from_nanos(NANOS_PER_SEC / hz).max(MIN_FRAME_PERIOD)
}

/// Timestamp of the next vblank after `now` in phase with `last`
///
/// Without a previous timestamp the next vblank is one period from now.
pub fn phased_vsync(period: Duration, now: Duration, last: Option<Duration>) -> Duration {
    let Some(last) = last else {
        return now + period;
    };
    let period_ns = period.as_nanos().max(1);
    let elapsed = now.saturating_sub(last).as_nanos();
    let cycles = elapsed / period_ns + 1;
    last + Duration::from_nanos((period_ns * cycles) as u64)
}

fn synthetic_wait(clock: &Clock<Monotonic>, period: Duration, last: Option<Duration>) -> io::Result<Duration> {
    let now = clock.now().as_duration();
    let deadline = phased_vsync(period, now, last);
    clock.sleep_until(Time::from(deadline))?;
    Ok(deadline)
}
