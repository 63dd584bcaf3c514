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

//! Run recurring jobs from a single control loop.
//!
//! The scheduler doesn't own a clock or a thread. The caller invokes [`PeriodicScheduler::tick`]
//! at a coarse cadence (about once a second) with the current time and a mutable reference to
//! the context that job actions operate on. Every job that is due runs exactly once, in the
//! order it was registered, before `tick` returns.
//!
//! Jobs run one after another so a slow job delays the due check of every job after it in
//! the same tick. Interval jobs are rescheduled relative to the time of the tick that ran
//! them rather than the time they were due, so a slow tick pushes the next run back instead
//! of causing a burst of catch-up runs.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::panic::{self, AssertUnwindSafe};

/// Error building a job trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    ZeroInterval,
    InvalidTimeOfDay(String),
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::ZeroInterval => write!(f, "interval must be greater than zero"),
            ScheduleError::InvalidTimeOfDay(s) => write!(f, "invalid time of day '{}', expected HH:MM", s),
        }
    }
}

impl Error for ScheduleError {}

/// Potential kinds of errors returned by job actions
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum JobErrorKind {
    Sensor,
    Artifact,
    Alert,
    Publish,
    System,
    Panic,
}

impl JobErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            JobErrorKind::Sensor => "sensor",
            JobErrorKind::Artifact => "artifact",
            JobErrorKind::Alert => "alert",
            JobErrorKind::Publish => "publish",
            JobErrorKind::System => "system",
            JobErrorKind::Panic => "panic",
        }
    }
}

/// Failure of a single invocation of a job action
#[derive(Debug)]
pub enum JobError {
    KindMsg(JobErrorKind, &'static str),
    KindMsgCause(JobErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl JobError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            JobError::KindMsg(kind, _) => *kind,
            JobError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JobError::KindMsg(_, msg) => msg.fmt(f),
            JobError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for JobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JobError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Parse a time of day in `HH:MM` or `HH:MM:SS` form.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ScheduleError> {
    let trimmed = s.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| ScheduleError::InvalidTimeOfDay(s.to_owned()))
}

/// When a job should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Every interval, measured from the tick that last ran the job.
    Every(Duration),
    /// Once a day at a wall clock time in the scheduler time zone.
    DailyAt(NaiveTime),
}

impl Trigger {
    pub fn every_secs(secs: u64) -> Result<Self, ScheduleError> {
        if secs == 0 {
            return Err(ScheduleError::ZeroInterval);
        }

        Ok(Trigger::Every(Duration::seconds(secs as i64)))
    }

    pub fn daily_at(s: &str) -> Result<Self, ScheduleError> {
        parse_time_of_day(s).map(Trigger::DailyAt)
    }

    fn next_due(&self, now: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
        match self {
            Trigger::Every(interval) => now + *interval,
            Trigger::DailyAt(time) => next_occurrence(now, tz, *time),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Every(interval) => write!(f, "every {}s", interval.num_seconds()),
            Trigger::DailyAt(time) => write!(f, "daily at {}", time.format("%H:%M:%S")),
        }
    }
}

/// Return the first instant strictly after `now` at which the wall clock in `tz`
/// reads `time`, rolling over to the next day if that time has already passed today.
///
/// Times skipped by a daylight saving transition resolve to an hour later. Times that
/// occur twice resolve to the earlier one.
pub fn next_occurrence<Z: TimeZone>(now: DateTime<Utc>, tz: &Z, time: NaiveTime) -> DateTime<Utc> {
    let mut date = now.with_timezone(tz).date_naive();

    // Today, tomorrow, and one spare day in case today's candidate fell in a gap
    for _ in 0..3 {
        if let Some(candidate) = resolve_local(tz, date.and_time(time)) {
            if candidate > now {
                return candidate;
            }
        }

        date = match date.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }

    now + Duration::days(1)
}

fn resolve_local<Z: TimeZone>(tz: &Z, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

type JobAction<C> = Box<dyn FnMut(&mut C, DateTime<Utc>) -> Result<(), JobError> + Send>;

/// A named recurring job to register with a scheduler.
pub struct JobSpec<C> {
    name: String,
    trigger: Trigger,
    action: JobAction<C>,
}

impl<C> JobSpec<C> {
    pub fn new<N, F>(name: N, trigger: Trigger, action: F) -> Self
    where
        N: Into<String>,
        F: FnMut(&mut C, DateTime<Utc>) -> Result<(), JobError> + Send + 'static,
    {
        JobSpec {
            name: name.into(),
            trigger,
            action: Box::new(action),
        }
    }
}

/// Identifies a registered job. Handles stay valid after the job is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(usize);

/// Outcome of running one job during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRun {
    pub handle: JobHandle,
    pub success: bool,
}

struct ScheduledJob<C> {
    name: String,
    trigger: Trigger,
    next_due: DateTime<Utc>,
    action: JobAction<C>,
    cancelled: bool,
}

/// Scheduler for any number of independently timed recurring jobs that operate
/// on a shared context of type `C`.
pub struct PeriodicScheduler<C> {
    tz: Tz,
    jobs: Vec<ScheduledJob<C>>,
}

impl<C> PeriodicScheduler<C> {
    /// Create a scheduler that evaluates time of day triggers in `tz`.
    pub fn new(tz: Tz) -> Self {
        PeriodicScheduler { tz, jobs: Vec::new() }
    }

    /// Add a job, computing its first due time relative to `now`.
    pub fn register(&mut self, spec: JobSpec<C>, now: DateTime<Utc>) -> JobHandle {
        let next_due = spec.trigger.next_due(now, &self.tz);
        tracing::info!(
            message = "registered job",
            job = %spec.name,
            trigger = %spec.trigger,
            next_due = %next_due
        );

        self.jobs.push(ScheduledJob {
            name: spec.name,
            trigger: spec.trigger,
            next_due,
            action: spec.action,
            cancelled: false,
        });

        JobHandle(self.jobs.len() - 1)
    }

    /// Run every job that isn't cancelled and is due at `now`, then compute its next
    /// due time. Failures of job actions, including panics, are logged and reported
    /// in the returned runs but never interrupt other jobs.
    pub fn tick(&mut self, now: DateTime<Utc>, ctx: &mut C) -> Vec<JobRun> {
        let mut runs = Vec::new();

        for (i, job) in self.jobs.iter_mut().enumerate() {
            if job.cancelled || job.next_due > now {
                continue;
            }

            tracing::debug!(message = "running job", job = %job.name, due = %job.next_due);
            let action = &mut job.action;
            let result = panic::catch_unwind(AssertUnwindSafe(|| action(&mut *ctx, now)))
                .unwrap_or_else(|_| Err(JobError::KindMsg(JobErrorKind::Panic, "job action panicked")));

            let success = match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        message = "job failed",
                        job = %job.name,
                        kind = e.kind().as_label(),
                        error = %e
                    );
                    false
                }
            };

            job.next_due = job.trigger.next_due(now, &self.tz);
            runs.push(JobRun {
                handle: JobHandle(i),
                success,
            });
        }

        runs
    }

    /// Stop running a job. Returns `false` if the job was unknown or already cancelled.
    pub fn cancel(&mut self, handle: JobHandle) -> bool {
        match self.jobs.get_mut(handle.0) {
            Some(job) if !job.cancelled => {
                job.cancelled = true;
                tracing::info!(message = "cancelled job", job = %job.name);
                true
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self, handle: JobHandle) -> bool {
        self.jobs.get(handle.0).map(|j| j.cancelled).unwrap_or(true)
    }

    pub fn next_due(&self, handle: JobHandle) -> Option<DateTime<Utc>> {
        self.jobs.get(handle.0).filter(|j| !j.cancelled).map(|j| j.next_due)
    }

    pub fn name(&self, handle: JobHandle) -> Option<&str> {
        self.jobs.get(handle.0).map(|j| j.name.as_str())
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| !j.cancelled).count()
    }
}

#[cfg(test)]
mod test {
    use super::{
        next_occurrence, parse_time_of_day, JobError, JobErrorKind, JobSpec, PeriodicScheduler, ScheduleError,
        Trigger,
    };
    use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
    use chrono_tz::Tz;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[derive(Default)]
    struct Counts {
        fast: Vec<DateTime<Utc>>,
        slow: Vec<DateTime<Utc>>,
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(Ok(hm(2, 0)), parse_time_of_day("02:00"));
        assert_eq!(Ok(NaiveTime::from_hms_opt(23, 59, 30).unwrap()), parse_time_of_day("23:59:30"));
        assert!(matches!(parse_time_of_day("25:00"), Err(ScheduleError::InvalidTimeOfDay(_))));
        assert!(parse_time_of_day("noon").is_err());
    }

    #[test]
    fn test_every_secs_zero() {
        assert_eq!(Err(ScheduleError::ZeroInterval), Trigger::every_secs(0));
    }

    #[test]
    fn test_next_occurrence_later_today() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 1, 30, 0).unwrap();
        assert_eq!(
            Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap(),
            next_occurrence(now, &Utc, hm(2, 0))
        );
    }

    #[test]
    fn test_next_occurrence_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap();
        assert_eq!(
            Utc.with_ymd_and_hms(2025, 1, 2, 2, 0, 0).unwrap(),
            next_occurrence(now, &Utc, hm(2, 0))
        );

        let now = Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(
            Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap(),
            next_occurrence(now, &Utc, hm(2, 0))
        );
    }

    #[test]
    fn test_next_occurrence_time_zone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 06:00 UTC is 01:00 in New York during winter
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap();
        assert_eq!(
            Utc.with_ymd_and_hms(2025, 1, 15, 7, 0, 0).unwrap(),
            next_occurrence(now, &tz, hm(2, 0))
        );
    }

    #[test]
    fn test_next_occurrence_skipped_by_dst() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 02:30 doesn't exist on 2025-03-09 in New York, clocks jump from 02:00 to 03:00 EDT
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 5, 0, 0).unwrap();
        let next = next_occurrence(now, &tz, hm(2, 30));

        // 03:30 EDT
        assert_eq!(Utc.with_ymd_and_hms(2025, 3, 9, 7, 30, 0).unwrap(), next);
    }

    #[test]
    fn test_interval_jobs_fire_once_per_window() {
        let mut scheduler = PeriodicScheduler::<Counts>::new(Tz::UTC);
        let mut counts = Counts::default();
        let start = epoch();

        scheduler.register(
            JobSpec::new("fast", Trigger::every_secs(3).unwrap(), |c: &mut Counts, now| {
                c.fast.push(now);
                Ok(())
            }),
            start,
        );
        scheduler.register(
            JobSpec::new("slow", Trigger::every_secs(7).unwrap(), |c: &mut Counts, now| {
                c.slow.push(now);
                Ok(())
            }),
            start,
        );

        for s in 0..=60 {
            scheduler.tick(start + Duration::seconds(s), &mut counts);
        }

        let secs = |v: &Vec<DateTime<Utc>>| v.iter().map(|t| (*t - start).num_seconds()).collect::<Vec<_>>();
        assert_eq!((1..=20).map(|i| i * 3).collect::<Vec<_>>(), secs(&counts.fast));
        assert_eq!(vec![7, 14, 21, 28, 35, 42, 49, 56], secs(&counts.slow));
    }

    #[test]
    fn test_late_tick_reschedules_from_now() {
        let mut scheduler = PeriodicScheduler::<Counts>::new(Tz::UTC);
        let mut counts = Counts::default();
        let start = epoch();

        let handle = scheduler.register(
            JobSpec::new("fast", Trigger::every_secs(10).unwrap(), |c: &mut Counts, now| {
                c.fast.push(now);
                Ok(())
            }),
            start,
        );

        // Control loop stalled for 35 seconds: one run, no catch up
        let late = start + Duration::seconds(35);
        let runs = scheduler.tick(late, &mut counts);
        assert_eq!(1, runs.len());
        assert_eq!(Some(late + Duration::seconds(10)), scheduler.next_due(handle));

        let runs = scheduler.tick(late + Duration::seconds(1), &mut counts);
        assert!(runs.is_empty());
        assert_eq!(1, counts.fast.len());
    }

    #[test]
    fn test_daily_job() {
        let mut scheduler = PeriodicScheduler::<Counts>::new(Tz::UTC);
        let mut counts = Counts::default();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 1, 59, 0).unwrap();

        let handle = scheduler.register(
            JobSpec::new("flush", Trigger::daily_at("02:00").unwrap(), |c: &mut Counts, now| {
                c.slow.push(now);
                Ok(())
            }),
            start,
        );

        for m in 0..(60 * 48) {
            scheduler.tick(start + Duration::minutes(m), &mut counts);
        }

        assert_eq!(
            vec![
                Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 2, 2, 0, 0).unwrap(),
            ],
            counts.slow
        );
        assert_eq!(
            Some(Utc.with_ymd_and_hms(2025, 1, 3, 2, 0, 0).unwrap()),
            scheduler.next_due(handle)
        );
    }

    #[test]
    fn test_cancelled_job_skipped_without_disturbing_others() {
        let mut scheduler = PeriodicScheduler::<Counts>::new(Tz::UTC);
        let mut counts = Counts::default();
        let start = epoch();

        let fast = scheduler.register(
            JobSpec::new("fast", Trigger::every_secs(1).unwrap(), |c: &mut Counts, now| {
                c.fast.push(now);
                Ok(())
            }),
            start,
        );
        let slow = scheduler.register(
            JobSpec::new("slow", Trigger::every_secs(5).unwrap(), |c: &mut Counts, now| {
                c.slow.push(now);
                Ok(())
            }),
            start,
        );

        scheduler.tick(start + Duration::seconds(1), &mut counts);
        assert!(scheduler.cancel(fast));
        assert!(!scheduler.cancel(fast));
        assert!(scheduler.is_cancelled(fast));
        assert_eq!(None, scheduler.next_due(fast));
        assert_eq!(Some("fast"), scheduler.name(fast));
        assert_eq!(1, scheduler.active_jobs());

        for s in 2..=10 {
            scheduler.tick(start + Duration::seconds(s), &mut counts);
        }

        assert_eq!(1, counts.fast.len());
        assert_eq!(2, counts.slow.len());
        assert!(!scheduler.is_cancelled(slow));
    }

    #[test]
    fn test_failing_and_panicking_jobs_are_contained() {
        let mut scheduler = PeriodicScheduler::<Counts>::new(Tz::UTC);
        let mut counts = Counts::default();
        let start = epoch();

        let failing = scheduler.register(
            JobSpec::new("failing", Trigger::every_secs(1).unwrap(), |_: &mut Counts, _| {
                Err(JobError::KindMsg(JobErrorKind::Publish, "publish rejected"))
            }),
            start,
        );
        let panicking = scheduler.register(
            JobSpec::new("panicking", Trigger::every_secs(1).unwrap(), |_: &mut Counts, _| {
                panic!("boom");
            }),
            start,
        );
        let ok = scheduler.register(
            JobSpec::new("ok", Trigger::every_secs(1).unwrap(), |c: &mut Counts, now| {
                c.fast.push(now);
                Ok(())
            }),
            start,
        );

        let runs = scheduler.tick(start + Duration::seconds(1), &mut counts);
        assert_eq!(3, runs.len());
        assert_eq!((failing, false), (runs[0].handle, runs[0].success));
        assert_eq!((panicking, false), (runs[1].handle, runs[1].success));
        assert_eq!((ok, true), (runs[2].handle, runs[2].success));
        assert_eq!(1, counts.fast.len());

        // Failed jobs are rescheduled like any other
        assert_eq!(Some(start + Duration::seconds(2)), scheduler.next_due(failing));
    }
}
