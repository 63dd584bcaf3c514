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

use chrono::{DateTime, Utc};
use rppal::i2c::I2c;
use serde::Serialize;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::num::ParseIntError;

// Magnus formula coefficients for dewpoint over water
const MAGNUS_B: f64 = 17.62;
const MAGNUS_C: f64 = 243.12;

/// Sea level pressure used to estimate altitude
pub const SEA_LEVEL_PRESSURE: PressureHpa = PressureHpa(1013.4);

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f64> for TemperatureCelsius {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl From<TemperatureFahrenheit> for TemperatureCelsius {
    fn from(f: TemperatureFahrenheit) -> Self {
        Self((f.0 - 32.0) / 1.8)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}c", self.0)
    }
}

/// Temperature, in degrees fahrenheit
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureFahrenheit(f64);

impl From<TemperatureFahrenheit> for f64 {
    fn from(v: TemperatureFahrenheit) -> Self {
        v.0
    }
}

impl From<TemperatureCelsius> for TemperatureFahrenheit {
    fn from(c: TemperatureCelsius) -> Self {
        Self(c.0 * 1.8 + 32.0)
    }
}

impl fmt::Display for TemperatureFahrenheit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}f", self.0)
    }
}

/// Relative humidity (from 0 to 100)
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Humidity(f64);

impl From<Humidity> for f64 {
    fn from(v: Humidity) -> Self {
        v.0
    }
}

impl From<f64> for Humidity {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.0)
    }
}

/// Barometric pressure, in hectopascals
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct PressureHpa(f64);

impl From<PressureHpa> for f64 {
    fn from(v: PressureHpa) -> Self {
        v.0
    }
}

impl From<f64> for PressureHpa {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for PressureHpa {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}hPa", self.0)
    }
}

/// Compute the dewpoint for a temperature and relative humidity using the
/// Magnus formula.
///
/// The result is not finite when humidity is zero.
pub fn dewpoint(temperature: TemperatureCelsius, humidity: Humidity) -> TemperatureCelsius {
    let t = temperature.0;
    let gamma = (MAGNUS_B * t / (MAGNUS_C + t)) + (humidity.0 / 100.0).ln();
    TemperatureCelsius((MAGNUS_C * gamma) / (MAGNUS_B - gamma))
}

/// Estimate altitude in meters from the barometric formula used by the
/// international standard atmosphere.
pub fn altitude(pressure: PressureHpa, sea_level: PressureHpa) -> f64 {
    44330.0 * (1.0 - (pressure.0 / sea_level.0).powf(0.1903))
}

/// Compensated values from a single sensor measurement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Measurement {
    pub temperature: TemperatureCelsius,
    pub humidity: Humidity,
    pub pressure: PressureHpa,
}

/// One timestamped reading from the sensor with every derived field.
///
/// Either every value is a finite number or every value is NaN. Readings
/// built from failed samples are the NaN variety and keep the time the
/// sample was attempted. Readings can only be built by `Reading::new` and
/// `Reading::invalid` and are never modified afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    #[serde(rename = "timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "Temperature in C")]
    temperature_c: f64,
    #[serde(rename = "Temperature in F")]
    temperature_f: f64,
    #[serde(rename = "Dewpoint in C")]
    dewpoint_c: f64,
    #[serde(rename = "Dewpoint in F")]
    dewpoint_f: f64,
    #[serde(rename = "Humidity")]
    humidity: f64,
    #[serde(rename = "Pressure")]
    pressure: f64,
}

impl Reading {
    /// Build a reading from a measurement, returning `None` if any derived
    /// value isn't a finite number.
    pub fn new(measurement: Measurement, timestamp: DateTime<Utc>) -> Option<Self> {
        let dew = dewpoint(measurement.temperature, measurement.humidity);
        let reading = Reading {
            timestamp,
            temperature_c: measurement.temperature.into(),
            temperature_f: TemperatureFahrenheit::from(measurement.temperature).into(),
            dewpoint_c: dew.into(),
            dewpoint_f: TemperatureFahrenheit::from(dew).into(),
            humidity: measurement.humidity.into(),
            pressure: measurement.pressure.into(),
        };

        if reading.values().iter().all(|v| v.is_finite()) {
            Some(reading)
        } else {
            None
        }
    }

    /// A reading with every value set to NaN, used when the sensor couldn't be read.
    pub fn invalid(timestamp: DateTime<Utc>) -> Self {
        Reading {
            timestamp,
            temperature_c: f64::NAN,
            temperature_f: f64::NAN,
            dewpoint_c: f64::NAN,
            dewpoint_f: f64::NAN,
            humidity: f64::NAN,
            pressure: f64::NAN,
        }
    }

    /// A valid reading at exactly `fahrenheit` degrees, 50% humidity, and
    /// standard pressure.
    #[cfg(test)]
    pub(crate) fn from_fahrenheit(fahrenheit: f64, timestamp: DateTime<Utc>) -> Self {
        let temperature = TemperatureCelsius((fahrenheit - 32.0) / 1.8);
        let humidity = Humidity(50.0);
        let dew = dewpoint(temperature, humidity);

        Reading {
            timestamp,
            temperature_c: temperature.0,
            temperature_f: fahrenheit,
            dewpoint_c: dew.0,
            dewpoint_f: TemperatureFahrenheit::from(dew).0,
            humidity: humidity.0,
            pressure: 1013.25,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.values().iter().any(|v| v.is_nan())
    }

    /// The value alarms are evaluated against: temperature in fahrenheit.
    pub fn primary_value(&self) -> f64 {
        self.temperature_f
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn temperature_f(&self) -> f64 {
        self.temperature_f
    }

    pub fn dewpoint_c(&self) -> f64 {
        self.dewpoint_c
    }

    pub fn dewpoint_f(&self) -> f64 {
        self.dewpoint_f
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    /// Approximate altitude in meters, from pressure relative to `SEA_LEVEL_PRESSURE`.
    pub fn altitude(&self) -> f64 {
        altitude(PressureHpa(self.pressure), SEA_LEVEL_PRESSURE)
    }

    fn values(&self) -> [f64; 6] {
        [
            self.temperature_c,
            self.temperature_f,
            self.dewpoint_c,
            self.dewpoint_f,
            self.humidity,
            self.pressure,
        ]
    }
}

/// Result of attempting to sample the sensor once.
#[derive(Clone, Debug, PartialEq)]
pub enum Sample {
    Ok(Reading),
    Failed(DateTime<Utc>, SensorErrorKind),
}

impl Sample {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Sample::Ok(r) => r.timestamp(),
            Sample::Failed(ts, _) => *ts,
        }
    }

    pub fn reading(&self) -> Option<&Reading> {
        match self {
            Sample::Ok(r) => Some(r),
            Sample::Failed(_, _) => None,
        }
    }

    /// Convert into a reading, failed samples becoming an all-NaN reading
    /// stamped with the capture time.
    pub fn into_reading(self) -> Reading {
        match self {
            Sample::Ok(r) => r,
            Sample::Failed(ts, _) => Reading::invalid(ts),
        }
    }
}

/// Something that can be sampled for a reading on demand.
///
/// Implementations never return errors: a failed read is represented as
/// `Sample::Failed` stamped with `now`.
pub trait SampleSource {
    fn sample(&mut self, now: DateTime<Utc>) -> Sample;
}

/// Potential kinds of errors that can be encountered reading from the sensor
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Initialization,
    Bus,
    ChipId,
    ReadTimeout,
    Range,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::Initialization => "initialization",
            SensorErrorKind::Bus => "bus",
            SensorErrorKind::ChipId => "chip_id",
            SensorErrorKind::ReadTimeout => "timeout",
            SensorErrorKind::Range => "range",
        }
    }
}

/// Error initializing or reading the BME280 sensor via an I2C bus
#[derive(Debug)]
pub enum SensorError {
    ChipId(u8, u8),
    KindMsg(SensorErrorKind, &'static str),
    KindMsgCause(SensorErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::ChipId(_, _) => SensorErrorKind::ChipId,
            SensorError::KindMsg(kind, _) => *kind,
            SensorError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::ChipId(expected, got) => {
                write!(f, "unexpected chip id: expected {:#04x}, got {:#04x}", expected, got)
            }
            SensorError::KindMsg(_, msg) => msg.fmt(f),
            SensorError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// I2C bus of the header pins on a Raspberry PI
pub const DEFAULT_BUS: u8 = 1;
/// Address of a BME280 with SDO pulled high
pub const DEFAULT_ADDRESS: u16 = 0x77;

/// Parse an I2C address given in hex with a `0x` prefix or in decimal.
pub fn parse_address(s: &str) -> Result<u16, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// Open an I2C bus and address the device at `address` on it.
///
/// On a Raspberry PI the sensor header pins SDA and SCL are bus `1`. The
/// BME280 answers on `0x77` or `0x76` depending on how its SDO pin is wired.
pub fn open_bus(bus: u8, address: u16) -> Result<I2c, SensorError> {
    let mut i2c = I2c::with_bus(bus).map_err(|e| {
        SensorError::KindMsgCause(SensorErrorKind::Initialization, "unable to open I2C bus", Box::new(e))
    })?;

    i2c.set_slave_address(address).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to set I2C device address",
            Box::new(e),
        )
    })?;

    Ok(i2c)
}

/// Abstraction around register access on an `rppal::i2c::I2c` bus to allow for easier testing.
pub trait RegisterBus {
    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), SensorError>;
    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError>;
}

impl RegisterBus for I2c {
    fn read_registers(&mut self, start: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.write_read(&[start], buf).map_err(|e| {
            SensorError::KindMsgCause(SensorErrorKind::Bus, "unable to read sensor registers", Box::new(e))
        })
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.smbus_write_byte(register, value).map_err(|e| {
            SensorError::KindMsgCause(SensorErrorKind::Bus, "unable to write sensor register", Box::new(e))
        })
    }
}
