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

mod bme280;
mod core;
pub(crate) mod test;

pub use crate::sensor::bme280::{Bme280Sensor, Bme280Source};
pub use crate::sensor::core::{
    altitude, dewpoint, open_bus, parse_address, Humidity, Measurement, PressureHpa, Reading, RegisterBus, Sample, SampleSource, SensorError,
    SensorErrorKind, TemperatureCelsius, TemperatureFahrenheit, DEFAULT_ADDRESS, DEFAULT_BUS, SEA_LEVEL_PRESSURE,
};
