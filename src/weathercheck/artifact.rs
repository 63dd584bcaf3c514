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

//! Plots and data files written from buffered readings.
//!
//! Every flush produces a pair of files named after the time of the flush, in
//! UTC: an SVG plot of temperature over time and a CSV file containing every
//! field of every reading. Emergency alerts produce a plot of the readings from
//! the current excursion.

use crate::sensor::Reading;
use chrono::{DateTime, Utc};
use plotters::prelude::*;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

const PLOT_SIZE: (u32, u32) = (1000, 800);
const EMERGENCY_PREFIX: &str = "Emergency_Plot";

/// Error writing a plot or data file
#[derive(Debug)]
pub enum ArtifactError {
    Io(PathBuf, io::Error),
    Csv(PathBuf, csv::Error),
    Plot(PathBuf, String),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::Io(path, e) => write!(f, "unable to write {}: {}", path.display(), e),
            ArtifactError::Csv(path, e) => write!(f, "unable to write data to {}: {}", path.display(), e),
            ArtifactError::Plot(path, e) => write!(f, "unable to render plot {}: {}", path.display(), e),
        }
    }
}

impl Error for ArtifactError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ArtifactError::Io(_, e) => Some(e),
            ArtifactError::Csv(_, e) => Some(e),
            ArtifactError::Plot(_, _) => None,
        }
    }
}

/// Base name shared by the files written at `now`, e.g. `2025-01-01T06:00:00`.
pub fn stem(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Paths of the files written by a single flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushArtifacts {
    pub plot: PathBuf,
    pub data: PathBuf,
}

/// Write CSV data files and SVG plots into their respective directories.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    plot_dir: PathBuf,
    data_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new<P: Into<PathBuf>, D: Into<PathBuf>>(plot_dir: P, data_dir: D) -> Self {
        ArtifactWriter {
            plot_dir: plot_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn plot_dir(&self) -> &Path {
        &self.plot_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Write a plot and a data file for `readings`, named after `now`.
    pub fn write_flush(&self, readings: &[Reading], now: DateTime<Utc>) -> Result<FlushArtifacts, ArtifactError> {
        let stem = stem(now);
        let plot = self.plot_dir.join(format!("{}.svg", stem));
        let data = self.data_dir.join(format!("{}.csv", stem));

        render_plot(&plot, readings, &format!("Temperature through {}", stem))?;
        write_csv(&data, readings)?;

        Ok(FlushArtifacts { plot, data })
    }

    /// Plot the readings from an excursion below `threshold` for attaching to an alert.
    pub fn write_emergency_plot(
        &self,
        readings: &[Reading],
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.plot_dir.join(format!("{}{}.svg", EMERGENCY_PREFIX, stem(now)));
        render_plot(&path, readings, &format!("Below {:.1}F through {}", threshold, stem(now)))?;
        Ok(path)
    }
}

/// Write every field of `readings` to a CSV file at `path` with a header row.
pub fn write_csv(path: &Path, readings: &[Reading]) -> Result<(), ArtifactError> {
    let file = File::create(path).map_err(|e| ArtifactError::Io(path.to_path_buf(), e))?;
    let mut writer = csv::Writer::from_writer(file);

    for r in readings {
        writer
            .serialize(r)
            .map_err(|e| ArtifactError::Csv(path.to_path_buf(), e))?;
    }

    writer.flush().map_err(|e| ArtifactError::Io(path.to_path_buf(), e))
}

/// Split readings into runs of consecutive valid readings as (hours since the first
/// reading, temperature in fahrenheit) points. Invalid readings break a line.
fn segments(readings: &[Reading]) -> Vec<Vec<(f64, f64)>> {
    let start = match readings.first() {
        Some(r) => r.timestamp(),
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    let mut current = Vec::new();
    for r in readings {
        if r.is_valid() {
            let hours = (r.timestamp() - start).num_milliseconds() as f64 / 3_600_000.0;
            current.push((hours, r.temperature_f()));
        } else if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        out.push(current);
    }

    out
}

/// Axis ranges for a set of segments, padded so a flat line isn't drawn on the edge.
fn bounds(segments: &[Vec<(f64, f64)>]) -> (f64, f64, f64) {
    let points = segments.iter().flatten();
    let x_max = points.clone().map(|p| p.0).fold(0.0, f64::max);
    let y_min = points.clone().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let y_max = points.map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    if !y_min.is_finite() || !y_max.is_finite() {
        return (1.0, 0.0, 1.0);
    }

    (x_max.max(1.0 / 60.0), y_min - 1.0, y_max + 1.0)
}

/// Render a line plot of temperature in fahrenheit over time to an SVG file.
pub fn render_plot(path: &Path, readings: &[Reading], title: &str) -> Result<(), ArtifactError> {
    let plot_err = |e: &dyn fmt::Display| ArtifactError::Plot(path.to_path_buf(), e.to_string());
    let segments = segments(readings);
    let (x_max, y_min, y_max) = bounds(&segments);
    let x_desc = match readings.first() {
        Some(r) => format!("Hours since {}", stem(r.timestamp())),
        None => "Hours".to_owned(),
    };

    let root = SVGBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_err(&e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..x_max, y_min..y_max)
        .map_err(|e| plot_err(&e))?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("Temperature in F")
        .draw()
        .map_err(|e| plot_err(&e))?;

    for points in segments {
        chart
            .draw_series(LineSeries::new(points, &RED))
            .map_err(|e| plot_err(&e))?;
    }

    root.present().map_err(|e| plot_err(&e))
}

#[cfg(test)]
mod test {
    use super::{segments, stem, write_csv, ArtifactWriter};
    use crate::sensor::{Measurement, Reading};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::fs;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap()
    }

    fn reading(minute: i64, celsius: f64) -> Reading {
        Reading::new(
            Measurement {
                temperature: celsius.into(),
                humidity: 50.0.into(),
                pressure: 1000.0.into(),
            },
            epoch() + Duration::minutes(minute),
        )
        .unwrap()
    }

    #[test]
    fn test_stem() {
        assert_eq!("2025-01-01T06:00:00", stem(epoch()));
    }

    #[test]
    fn test_segments_split_on_invalid() {
        let readings = vec![
            reading(0, 10.0),
            reading(30, 11.0),
            Reading::invalid(epoch() + Duration::minutes(60)),
            reading(90, 12.0),
        ];

        let out = segments(&readings);
        assert_eq!(2, out.len());
        assert_eq!(2, out[0].len());
        assert_eq!((0.5, 51.8), (out[0][1].0, (out[0][1].1 * 10.0).round() / 10.0));
        assert_eq!(1.5, out[1][0].0);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        write_csv(&path, &[reading(0, 20.0), Reading::invalid(epoch() + Duration::minutes(1))]).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            "timestamp,Temperature in C,Temperature in F,Dewpoint in C,Dewpoint in F,Humidity,Pressure",
            lines[0]
        );
        assert!(lines[1].starts_with("2025-01-01T06:00:00Z,20.0,68.0,"), "{}", lines[1]);
        assert!(lines[2].contains("NaN"), "{}", lines[2]);
        assert_eq!(3, lines.len());
    }

    #[test]
    fn test_write_flush() {
        let plots = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(plots.path(), data.path());
        let readings: Vec<Reading> = (0..10).map(|m| reading(m, 5.0 + m as f64)).collect();

        let out = writer.write_flush(&readings, epoch()).unwrap();
        assert_eq!(plots.path().join("2025-01-01T06:00:00.svg"), out.plot);
        assert_eq!(data.path().join("2025-01-01T06:00:00.csv"), out.data);
        assert!(fs::read_to_string(&out.plot).unwrap().contains("<svg"));
        assert_eq!(11, fs::read_to_string(&out.data).unwrap().lines().count());
    }

    #[test]
    fn test_write_emergency_plot() {
        let plots = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(plots.path(), data.path());

        let path = writer.write_emergency_plot(&[reading(0, 1.0)], 55.0, epoch()).unwrap();
        assert_eq!(plots.path().join("Emergency_Plot2025-01-01T06:00:00.svg"), path);
        assert!(path.exists());
    }

    #[test]
    fn test_render_plot_all_invalid() {
        let plots = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(plots.path(), data.path());

        let readings = vec![Reading::invalid(epoch())];
        let out = writer.write_flush(&readings, epoch()).unwrap();
        assert!(out.plot.exists());
    }
}
