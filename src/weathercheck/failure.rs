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

use crate::runtime::LoopError;
use crate::schedule::{JobHandle, JobRun, PeriodicScheduler};
use std::collections::BTreeMap;

/// Number of consecutive failures a job may have before it's disabled.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Result of recording the outcome of a single job invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// The job succeeded or hasn't failed enough times to be disabled.
    Healthy,
    /// The job has just crossed the failure bound. Its schedule should be cancelled.
    Disabled,
    /// The job was disabled by a previous invocation.
    AlreadyDisabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FeedState {
    consecutive_failures: u32,
    disabled: bool,
}

/// Count consecutive failures of independent jobs and disable any job that
/// fails more than [`MAX_CONSECUTIVE_FAILURES`] times in a row.
#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    jobs: BTreeMap<JobHandle, FeedState>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a job. Only tracked jobs count towards [`FailureTracker::all_disabled`].
    pub fn track(&mut self, job: JobHandle) {
        self.jobs.entry(job).or_default();
    }

    /// Record the outcome of one invocation of `job`. A success resets the count
    /// of consecutive failures.
    pub fn record(&mut self, job: JobHandle, success: bool) -> FailureVerdict {
        let state = self.jobs.entry(job).or_default();
        if state.disabled {
            return FailureVerdict::AlreadyDisabled;
        }

        if success {
            state.consecutive_failures = 0;
            return FailureVerdict::Healthy;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures > MAX_CONSECUTIVE_FAILURES {
            state.disabled = true;
            FailureVerdict::Disabled
        } else {
            FailureVerdict::Healthy
        }
    }

    pub fn consecutive_failures(&self, job: JobHandle) -> u32 {
        self.jobs.get(&job).map(|s| s.consecutive_failures).unwrap_or(0)
    }

    pub fn is_disabled(&self, job: JobHandle) -> bool {
        self.jobs.get(&job).map(|s| s.disabled).unwrap_or(false)
    }

    /// True when at least one job is tracked and every tracked job is disabled.
    pub fn all_disabled(&self) -> bool {
        !self.jobs.is_empty() && self.jobs.values().all(|s| s.disabled)
    }

    /// Record the outcome of every job that ran during a tick, cancelling the schedule
    /// of any job that crossed the failure bound. Returns an error once every tracked
    /// job has been disabled since there's nothing left for the process to do.
    pub fn supervise<C>(&mut self, scheduler: &mut PeriodicScheduler<C>, runs: &[JobRun]) -> Result<(), LoopError> {
        for run in runs {
            if self.record(run.handle, run.success) == FailureVerdict::Disabled {
                scheduler.cancel(run.handle);
                tracing::error!(
                    message = "disabling job after repeated failures",
                    job = scheduler.name(run.handle).unwrap_or("unknown"),
                    failures = self.consecutive_failures(run.handle),
                );
            }
        }

        if self.all_disabled() {
            Err(LoopError::AllFeedsFailed)
        } else {
            Ok(())
        }
    }
}
