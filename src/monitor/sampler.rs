use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

use super::errors::MonitorError;

/// Host-wide memory and CPU pressure, in percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemReading {
    pub memory_usage: f64,
    pub cpu_usage: f64,
}

/// Usage of the current process
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub memory_bytes: u64,
    pub cpu_percent: f64,
}

/// Source of host pressure readings for the resource monitor
pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> Result<SystemReading, MonitorError>;
}

/// Source of per-process telemetry for worker accounting
pub trait ProcessSampler: Send + Sync {
    fn sample_process(&self) -> Option<ProcessUsage>;
}

/// Real measurements through `sysinfo`.
///
/// CPU usage is a delta between refreshes, so the very first reading is 0.
pub struct SysinfoSampler {
    system: Mutex<System>,
    pid: Pid,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&self) -> Result<SystemReading, MonitorError> {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        sys.refresh_cpu();

        let total = sys.total_memory();
        if total == 0 {
            return Err(MonitorError::Sampling("total memory reported as zero".to_string()));
        }

        Ok(SystemReading {
            memory_usage: sys.used_memory() as f64 / total as f64 * 100.0,
            cpu_usage: sys.global_cpu_info().cpu_usage() as f64,
        })
    }
}

impl ProcessSampler for SysinfoSampler {
    fn sample_process(&self) -> Option<ProcessUsage> {
        let mut sys = self.system.lock();
        if !sys.refresh_process(self.pid) {
            return None;
        }
        sys.process(self.pid).map(|process| ProcessUsage {
            memory_bytes: process.memory(),
            cpu_percent: process.cpu_usage() as f64,
        })
    }
}
