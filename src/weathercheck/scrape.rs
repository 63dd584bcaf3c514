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

//! Periodically publish environment readings and host statistics as JSON reports.
//!
//! Reports are published to `<system name>/BME280reading` and
//! `<system name>/compute_status`. Each feed is its own job so a feed that keeps
//! failing can be disabled without affecting the other.

use crate::metrics::{FeedMetrics, SensorMetrics};
use crate::mqtt::ReportSink;
use crate::schedule::{JobError, JobErrorKind, JobHandle, JobSpec, PeriodicScheduler, Trigger};
use crate::sensor::{Reading, Sample, SampleSource};
use crate::system::{SystemSource, SystemStats};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const ENVIRONMENT_TOPIC: &str = "BME280reading";
pub const SYSTEM_TOPIC: &str = "compute_status";

pub const DEFAULT_ENVIRONMENT_SECS: u64 = 600;
pub const DEFAULT_SYSTEM_SECS: u64 = 60;

const ENVIRONMENT_FEED: &str = "environment";
const SYSTEM_FEED: &str = "system";

fn unix_secs(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

/// Report published for each environment reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentReport {
    pub temperature_c: f64,
    pub temperature_f: f64,
    pub dewpoint_c: f64,
    pub dewpoint_f: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub timestamp: f64,
}

impl From<&Reading> for EnvironmentReport {
    fn from(r: &Reading) -> Self {
        EnvironmentReport {
            temperature_c: r.temperature_c(),
            temperature_f: r.temperature_f(),
            dewpoint_c: r.dewpoint_c(),
            dewpoint_f: r.dewpoint_f(),
            humidity: r.humidity(),
            pressure: r.pressure(),
            timestamp: unix_secs(r.timestamp()),
        }
    }
}

/// Report published for each collection of host statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemReport {
    #[serde(flatten)]
    pub stats: SystemStats,
    pub timestamp: f64,
}

/// State shared by the environment and system feed jobs.
pub struct Scraper {
    system_name: String,
    source: Box<dyn SampleSource + Send>,
    system: Box<dyn SystemSource + Send>,
    sink: Box<dyn ReportSink + Send>,
    sensor_metrics: Option<SensorMetrics>,
    metrics: Option<FeedMetrics>,
}

impl Scraper {
    pub fn new<S: Into<String>>(
        system_name: S,
        source: Box<dyn SampleSource + Send>,
        system: Box<dyn SystemSource + Send>,
        sink: Box<dyn ReportSink + Send>,
    ) -> Self {
        Scraper {
            system_name: system_name.into(),
            source,
            system,
            sink,
            sensor_metrics: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, sensor: SensorMetrics, feeds: FeedMetrics) -> Self {
        self.sensor_metrics = Some(sensor);
        self.metrics = Some(feeds);
        self
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.system_name, suffix)
    }

    fn publish<T: Serialize>(&self, feed: &str, suffix: &str, report: &T) -> Result<(), JobError> {
        let payload = serde_json::to_string(report)
            .map_err(|e| JobError::KindMsgCause(JobErrorKind::Publish, "unable to serialize report", Box::new(e)))?;
        let topic = self.topic(suffix);
        let ok = self.sink.publish(&topic, &payload);

        if let Some(m) = &self.metrics {
            m.publish(feed, ok);
        }

        if ok {
            tracing::debug!(message = "published report", topic = %topic, payload = %payload);
            Ok(())
        } else {
            Err(JobError::KindMsg(JobErrorKind::Publish, "report was not accepted by the broker"))
        }
    }

    /// Sample the sensor and publish the reading. A failed read is a failure of the feed.
    pub fn scrape_environment(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        let sample = self.source.sample(now);
        if let Some(m) = &self.sensor_metrics {
            m.update(&sample);
        }

        match sample {
            Sample::Ok(r) => self.publish(ENVIRONMENT_FEED, ENVIRONMENT_TOPIC, &EnvironmentReport::from(&r)),
            Sample::Failed(_, _) => Err(JobError::KindMsg(JobErrorKind::Sensor, "unable to sample sensor")),
        }
    }

    /// Collect host statistics and publish them.
    pub fn scrape_system(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        let stats = self
            .system
            .collect()
            .ok_or(JobError::KindMsg(JobErrorKind::System, "unable to collect system statistics"))?;

        self.publish(
            SYSTEM_FEED,
            SYSTEM_TOPIC,
            &SystemReport {
                stats,
                timestamp: unix_secs(now),
            },
        )
    }
}

/// Register the environment and system feed jobs of `Scraper`, returning their handles.
pub fn register_jobs(
    scheduler: &mut PeriodicScheduler<Scraper>,
    environment: Trigger,
    system: Trigger,
    now: DateTime<Utc>,
) -> (JobHandle, JobHandle) {
    let env = scheduler.register(
        JobSpec::new(ENVIRONMENT_FEED, environment, |s: &mut Scraper, now| {
            s.scrape_environment(now)
        }),
        now,
    );
    let sys = scheduler.register(
        JobSpec::new(SYSTEM_FEED, system, |s: &mut Scraper, now| s.scrape_system(now)),
        now,
    );

    (env, sys)
}
