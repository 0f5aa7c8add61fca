pub mod errors;
pub mod resource_monitor;
pub mod sampler;

pub use errors::MonitorError;
pub use resource_monitor::{
    AlertLevel, AverageUsage, MonitorStats, ResourceAlert, ResourceKind, ResourceLimits, ResourceMonitor,
    ResourceMonitorOptions, ResourceSample,
};
pub use sampler::{ProcessSampler, ProcessUsage, SysinfoSampler, SystemReading, SystemSampler};
