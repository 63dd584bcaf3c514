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

//! Sample the sensor, keep readings for periodic plots and data files, and send
//! an emergency alert when temperature stays below a threshold.

use crate::alarm::{AlarmAction, ThresholdAlarm};
use crate::artifact::{ArtifactWriter, FlushArtifacts};
use crate::buffer::TimeSeriesBuffer;
use crate::email::AlertSink;
use crate::metrics::{RecorderMetrics, SensorMetrics};
use crate::runtime::{ControlLoop, LoopError};
use crate::schedule::{JobError, JobErrorKind, JobHandle, JobSpec, PeriodicScheduler, Trigger};
use crate::sensor::{Reading, Sample, SampleSource};
use chrono::{DateTime, Utc};

pub const DEFAULT_THRESHOLD_F: f64 = 55.0;

/// Body and recipients of emergency alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertNotice {
    pub message: String,
    pub recipients: Vec<String>,
}

impl AlertNotice {
    pub fn new<S: Into<String>>(message: S, recipients: Vec<String>) -> Self {
        AlertNotice {
            message: message.into(),
            recipients,
        }
    }

    /// Configured message followed by details of the excursion.
    pub fn render(&self, threshold: f64, start: Option<DateTime<Utc>>, latest: Option<&Reading>) -> String {
        let mut out = self.message.clone();
        out.push_str("\n\n");

        if let Some(start) = start {
            out.push_str(&format!(
                "Temperature has been below {:.1}F since {}.\n",
                threshold,
                start.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }

        if let Some(r) = latest {
            out.push_str(&format!(
                "Latest reading: {:.1}F at {}.\n",
                r.temperature_f(),
                r.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }

        out
    }
}

/// State shared by the sampling and flushing jobs of the recorder.
pub struct Recorder {
    threshold: f64,
    source: Box<dyn SampleSource + Send>,
    buffer: TimeSeriesBuffer,
    alarm: ThresholdAlarm,
    artifacts: ArtifactWriter,
    alerts: Box<dyn AlertSink + Send>,
    notice: AlertNotice,
    sensor_metrics: Option<SensorMetrics>,
    metrics: Option<RecorderMetrics>,
}

impl Recorder {
    pub fn new(
        threshold: f64,
        source: Box<dyn SampleSource + Send>,
        alarm: ThresholdAlarm,
        artifacts: ArtifactWriter,
        alerts: Box<dyn AlertSink + Send>,
        notice: AlertNotice,
    ) -> Self {
        Recorder {
            threshold,
            source,
            buffer: TimeSeriesBuffer::new(),
            alarm,
            artifacts,
            alerts,
            notice,
            sensor_metrics: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, sensor: SensorMetrics, recorder: RecorderMetrics) -> Self {
        self.sensor_metrics = Some(sensor);
        self.metrics = Some(recorder);
        self
    }

    pub fn buffer(&self) -> &TimeSeriesBuffer {
        &self.buffer
    }

    pub fn alarm(&self) -> &ThresholdAlarm {
        &self.alarm
    }

    /// Sample the sensor once, buffer the reading, and evaluate the alarm.
    ///
    /// Failed reads are buffered as invalid readings so gaps show up in the data
    /// files, then reported as an error.
    pub fn sample(&mut self, now: DateTime<Utc>) -> Result<AlarmAction, JobError> {
        let sample = self.source.sample(now);
        if let Some(m) = &self.sensor_metrics {
            m.update(&sample);
        }

        let failed = matches!(sample, Sample::Failed(_, _));
        let reading = sample.into_reading();
        let action = self.alarm.observe(&reading, self.threshold, now);
        self.buffer.append(reading);

        if let Some(m) = &self.metrics {
            m.observe(&self.alarm);
        }

        match action {
            AlarmAction::Continue if self.alarm.excursion().len() == 1 => {
                tracing::info!(message = "temperature dropped below threshold", threshold = self.threshold);
            }
            AlarmAction::Resolve => {
                tracing::info!(message = "temperature back above threshold", threshold = self.threshold);
            }
            AlarmAction::Alert => self.send_alert(now)?,
            _ => {}
        }

        if failed {
            Err(JobError::KindMsg(JobErrorKind::Sensor, "unable to sample sensor"))
        } else {
            Ok(action)
        }
    }

    /// Email the emergency alert, attaching a plot of the excursion. When the plot
    /// can't be written the alert is still sent without it and the plot failure is
    /// reported afterwards.
    fn send_alert(&mut self, now: DateTime<Utc>) -> Result<(), JobError> {
        let mut message = self
            .notice
            .render(self.threshold, self.alarm.excursion_start(), self.alarm.excursion().last());

        let plot = self
            .artifacts
            .write_emergency_plot(self.alarm.excursion(), self.threshold, now);
        if let Err(e) = &plot {
            tracing::error!(message = "unable to write emergency plot, sending alert without it", error = %e);
            message.push_str("\nA plot of the readings could not be attached.\n");
        }

        let res = self
            .alerts
            .send(plot.as_ref().ok().map(|p| p.as_path()), &message, &self.notice.recipients);

        if let Some(m) = &self.metrics {
            m.alert(res.is_ok());
        }

        if let Err(e) = res {
            tracing::error!(message = "unable to send emergency alert", kind = e.kind().as_label(), error = %e);
            return Err(JobError::KindMsgCause(JobErrorKind::Alert, "unable to send emergency alert", Box::new(e)));
        }

        tracing::info!(message = "sent emergency alert", recipients = self.notice.recipients.len());
        plot.map(|_| ()).map_err(|e| {
            JobError::KindMsgCause(JobErrorKind::Artifact, "unable to write emergency plot", Box::new(e))
        })
    }

    /// Write a plot and data file for everything buffered since the last flush and
    /// empty the buffer. Nothing is written when the buffer is empty.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Result<Option<FlushArtifacts>, JobError> {
        let readings = self.buffer.flush();
        if readings.is_empty() {
            tracing::debug!(message = "no readings to flush");
            return Ok(None);
        }

        let out = self
            .artifacts
            .write_flush(&readings, now)
            .map_err(|e| JobError::KindMsgCause(JobErrorKind::Artifact, "unable to flush readings", Box::new(e)))?;

        if let Some(m) = &self.metrics {
            m.flush(readings.len());
        }

        tracing::info!(
            message = "flushed readings",
            readings = readings.len(),
            plot = %out.plot.display(),
            data = %out.data.display()
        );
        Ok(Some(out))
    }
}

/// Run the recorder jobs until shutdown is requested, then flush anything sampled
/// since the last scheduled flush so it isn't lost.
pub fn run(
    control: &ControlLoop,
    scheduler: &mut PeriodicScheduler<Recorder>,
    recorder: &mut Recorder,
) -> Result<i32, LoopError> {
    let result = control.run(scheduler, recorder, |_, _, _| Ok(()));

    if let Err(e) = recorder.flush(Utc::now()) {
        tracing::error!(message = "failed to flush readings at shutdown", error = %e);
    }

    result
}

/// Register the sampling and flushing jobs of `Recorder`, returning their handles.
pub fn register_jobs(
    scheduler: &mut PeriodicScheduler<Recorder>,
    sample: Trigger,
    flush: Trigger,
    now: DateTime<Utc>,
) -> (JobHandle, JobHandle) {
    let sample = scheduler.register(
        JobSpec::new("sample", sample, |r: &mut Recorder, now| r.sample(now).map(|_| ())),
        now,
    );
    let flush = scheduler.register(
        JobSpec::new("flush", flush, |r: &mut Recorder, now| r.flush(now).map(|_| ())),
        now,
    );

    (sample, flush)
}
