// Weathercheck - Weather station recorder and MQTT scraper
//
// Copyright 2025 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::schedule::{JobRun, PeriodicScheduler};
use chrono::Utc;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::signal::unix::{self, SignalKind};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub const SIGINT: i32 = 2;
pub const SIGTERM: i32 = 15;

/// Exit status for a process stopped by `signal`, following the shell convention.
pub fn signal_exit_code(signal: i32) -> i32 {
    128 + signal
}

/// Latch recording the first termination signal received by the process.
///
/// Cloned handles share the same latch so a signal handler running on the async
/// runtime can stop a control loop running on a blocking thread.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    signal: Arc<AtomicI32>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown because of `signal`. Only the first request is kept.
    pub fn trigger(&self, signal: i32) {
        let _ = self
            .signal
            .compare_exchange(0, signal, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn requested(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            s => Some(s),
        }
    }
}

/// Fatal conditions that stop a control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    AllFeedsFailed,
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoopError::AllFeedsFailed => write!(f, "all data feeds failed"),
        }
    }
}

impl Error for LoopError {}

/// Single threaded loop that wakes at a fixed cadence and ticks a scheduler.
///
/// The wake up times are fixed multiples of the interval from when the loop
/// started so time spent running jobs doesn't accumulate as drift. If jobs
/// overrun a whole interval the loop ticks again immediately and resumes the
/// cadence from there.
#[derive(Debug, Clone)]
pub struct ControlLoop {
    interval: Duration,
    shutdown: Shutdown,
}

impl ControlLoop {
    pub fn new(shutdown: Shutdown) -> Self {
        Self::with_interval(shutdown, TICK_INTERVAL)
    }

    pub fn with_interval(shutdown: Shutdown, interval: Duration) -> Self {
        ControlLoop { interval, shutdown }
    }

    /// Tick `scheduler` with `ctx` until shutdown is requested, returning the signal
    /// that caused it. After each tick `supervise` is called with the jobs that ran; an
    /// error from it stops the loop immediately.
    pub fn run<C, F>(&self, scheduler: &mut PeriodicScheduler<C>, ctx: &mut C, mut supervise: F) -> Result<i32, LoopError>
    where
        F: FnMut(&mut PeriodicScheduler<C>, &mut C, &[JobRun]) -> Result<(), LoopError>,
    {
        let mut next_wake = Instant::now();

        loop {
            if let Some(signal) = self.shutdown.requested() {
                tracing::info!(message = "stopping control loop", signal = signal);
                return Ok(signal);
            }

            let runs = scheduler.tick(Utc::now(), ctx);
            supervise(scheduler, ctx, &runs)?;

            next_wake += self.interval;
            let now = Instant::now();
            if next_wake > now {
                thread::sleep(next_wake - now);
            } else {
                tracing::debug!(message = "control loop overran tick interval", behind = ?(now - next_wake));
                next_wake = now;
            }
        }
    }
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Wait for SIGTERM or SIGINT and return the number of the signal received.
pub async fn wait_for_signal() -> i32 {
    tokio::select! {
        res = sigterm() => {
            if let Err(e) = res {
                tracing::error!(message = "unable to listen for SIGTERM", error = %e);
            }
            SIGTERM
        }
        res = sigint() => {
            if let Err(e) = res {
                tracing::error!(message = "unable to listen for SIGINT", error = %e);
            }
            SIGINT
        }
    }
}

#[cfg(test)]
mod test {
    use super::{signal_exit_code, ControlLoop, LoopError, Shutdown, SIGINT, SIGTERM};
    use crate::schedule::{JobSpec, PeriodicScheduler, Trigger};
    use chrono::Utc;
    use chrono_tz::Tz;
    use std::time::Duration;

    #[test]
    fn test_shutdown_keeps_first_signal() {
        let shutdown = Shutdown::new();
        assert_eq!(None, shutdown.requested());

        let other = shutdown.clone();
        other.trigger(SIGTERM);
        shutdown.trigger(SIGINT);
        assert_eq!(Some(SIGTERM), shutdown.requested());
        assert_eq!(143, signal_exit_code(SIGTERM));
    }

    #[test]
    fn test_loop_stops_on_shutdown() {
        let shutdown = Shutdown::new();
        let control = ControlLoop::with_interval(shutdown.clone(), Duration::from_millis(1));
        let mut scheduler = PeriodicScheduler::<u32>::new(Tz::UTC);
        let mut ticks = 0u32;

        let res = control.run(&mut scheduler, &mut ticks, |_, ticks, _| {
            *ticks += 1;
            if *ticks == 5 {
                shutdown.trigger(SIGINT);
            }
            Ok(())
        });

        assert_eq!(Ok(SIGINT), res);
        assert_eq!(5, ticks);
    }

    #[test]
    fn test_loop_stops_on_supervisor_error() {
        let control = ControlLoop::with_interval(Shutdown::new(), Duration::from_millis(1));
        let mut scheduler = PeriodicScheduler::<u32>::new(Tz::UTC);
        let mut runs = 0u32;
        scheduler.register(
            // Due immediately on the first tick
            JobSpec::new("count", Trigger::every_secs(1).unwrap(), |c: &mut u32, _| {
                *c += 1;
                Ok(())
            }),
            Utc::now() - chrono::Duration::seconds(5),
        );

        let res = control.run(&mut scheduler, &mut runs, |_, _, jobs| {
            if jobs.is_empty() {
                Ok(())
            } else {
                Err(LoopError::AllFeedsFailed)
            }
        });

        assert_eq!(Err(LoopError::AllFeedsFailed), res);
        assert_eq!(1, runs);
    }
}
