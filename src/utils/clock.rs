use std::{cmp::Ordering, io, marker::PhantomData, mem::MaybeUninit, time::Duration};

/// Id for a clock according to unix clockid_t
pub trait ClockSource {
    /// Gets the id of the clock source
    fn id() -> libc::clockid_t;
}

/// Monotonic clock
///
/// Vblank timestamps reported by the kernel are taken from this clock.
#[derive(Debug)]
pub struct Monotonic;

impl ClockSource for Monotonic {
    fn id() -> libc::clockid_t {
        libc::CLOCK_MONOTONIC
    }
}

/// Handle to a system clock of a specific kind
#[derive(Debug)]
pub struct Clock<Kind> {
    _kind: PhantomData<Kind>,
}

impl<Kind: ClockSource> Clock<Kind> {
    /// Initialize a new clock, failing if the system does not provide it
    pub fn new() -> io::Result<Self> {
        read_clock(Kind::id())?;
        Ok(Clock { _kind: PhantomData })
    }

    /// Returns the current time
    ///
    /// Falls back to the zero time, if the clock can no longer be read.
    pub fn now(&self) -> Time<Kind> {
        match read_clock(Kind::id()) {
            Ok(tp) => Time::from_timespec(tp),
            Err(err) => {
                tracing::error!(?err, "Failed to read clock {}", Kind::id());
                Time::from(Duration::ZERO)
            }
        }
    }

    /// Sleep until `deadline` has passed on this clock
    ///
    /// The deadline is absolute, signals interrupting the sleep restart it.
    pub fn sleep_until(&self, deadline: Time<Kind>) -> io::Result<()> {
        let tp = deadline.to_timespec();
        loop {
            let res = unsafe { libc::clock_nanosleep(Kind::id(), libc::TIMER_ABSTIME, &tp, std::ptr::null_mut()) };
            match res {
                0 => return Ok(()),
                libc::EINTR => continue,
                errno => return Err(io::Error::from_raw_os_error(errno)),
            }
        }
    }
}

/// A point in time on a clock of a specific kind
pub struct Time<Kind> {
    since_epoch: Duration,
    _kind: PhantomData<Kind>,
}

impl<Kind> Time<Kind> {
    fn from_timespec(tp: libc::timespec) -> Self {
        let since_epoch = if tp.tv_sec < 0 || tp.tv_nsec < 0 {
            Duration::ZERO
        } else {
            Duration::new(tp.tv_sec as u64, tp.tv_nsec as u32)
        };
        Time::from(since_epoch)
    }

    fn to_timespec(self) -> libc::timespec {
        // SAFETY: timespec is plain old data
        let mut tp: libc::timespec = unsafe { MaybeUninit::zeroed().assume_init() };
        tp.tv_sec = self.since_epoch.as_secs() as libc::time_t;
        tp.tv_nsec = self.since_epoch.subsec_nanos() as _;
        tp
    }

    /// Returns the time as duration since the clocks epoch
    pub fn as_duration(&self) -> Duration {
        self.since_epoch
    }
}

impl<Kind> From<Duration> for Time<Kind> {
    fn from(since_epoch: Duration) -> Self {
        Time {
            since_epoch,
            _kind: PhantomData,
        }
    }
}

impl<Kind> From<Time<Kind>> for Duration {
    fn from(time: Time<Kind>) -> Self {
        time.since_epoch
    }
}

impl<Kind> Clone for Time<Kind> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Kind> Copy for Time<Kind> {}

impl<Kind> std::fmt::Debug for Time<Kind> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Time").field(&self.since_epoch).finish()
    }
}

impl<Kind> PartialEq for Time<Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.since_epoch == other.since_epoch
    }
}

impl<Kind> Eq for Time<Kind> {}

impl<Kind> PartialOrd for Time<Kind> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Kind> Ord for Time<Kind> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.since_epoch.cmp(&other.since_epoch)
    }
}

fn read_clock(clk_id: libc::clockid_t) -> io::Result<libc::timespec> {
    let mut tp = MaybeUninit::zeroed();
    unsafe {
        if libc::clock_gettime(clk_id, tp.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(tp.assume_init())
    }
}
