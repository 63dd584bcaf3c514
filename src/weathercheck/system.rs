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

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Health of the host running the station.
///
/// Field names when serialized match the keys that existing dashboards expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    #[serde(rename = "disksizeGB")]
    pub disk_size_gb: f64,
    #[serde(rename = "useddiskGB")]
    pub disk_used_gb: f64,
    #[serde(rename = "freediskGB")]
    pub disk_free_gb: f64,
    /// Seconds since boot
    pub uptime: f64,
    #[serde(rename = "cpuuse")]
    pub cpu_percent: f64,
    #[serde(rename = "rampercent")]
    pub ram_percent: f64,
    #[serde(rename = "ramuseGB")]
    pub ram_used_gb: f64,
}

/// Something that can report the health of the host on demand.
pub trait SystemSource {
    fn collect(&mut self) -> Option<SystemStats>;
}

fn gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// Index of the mount point that contains `target`, preferring the longest match.
fn containing_mount<'a, I>(mounts: I, target: &Path) -> Option<usize>
where
    I: IntoIterator<Item = &'a Path>,
{
    mounts
        .into_iter()
        .enumerate()
        .filter(|(_, m)| target.starts_with(m))
        .max_by_key(|(_, m)| m.components().count())
        .map(|(i, _)| i)
}

/// Host statistics collected with `sysinfo` for the disk holding `path`.
pub struct HostSystem {
    system: System,
    disks: Disks,
    path: PathBuf,
}

impl HostSystem {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        HostSystem {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            path: path.into(),
        }
    }
}

impl SystemSource for HostSystem {
    fn collect(&mut self) -> Option<SystemStats> {
        // CPU usage is computed from the difference between two refreshes
        self.system.refresh_cpu_usage();
        thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh(true);

        let disk = containing_mount(self.disks.list().iter().map(|d| d.mount_point()), &self.path)
            .and_then(|i| self.disks.list().get(i));
        let disk = match disk {
            Some(d) => d,
            None => {
                tracing::warn!(message = "no disk found for path", path = %self.path.display());
                return None;
            }
        };

        let total_memory = self.system.total_memory();
        let used_memory = self.system.used_memory();
        let ram_percent = if total_memory > 0 {
            used_memory as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        let total = disk.total_space();
        let free = disk.available_space();

        Some(SystemStats {
            disk_size_gb: gb(total),
            disk_used_gb: gb(total.saturating_sub(free)),
            disk_free_gb: gb(free),
            uptime: System::uptime() as f64,
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            ram_percent,
            ram_used_gb: gb(used_memory),
        })
    }
}
