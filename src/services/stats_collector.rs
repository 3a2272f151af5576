use anyhow::bail;
use std::path::Path;
use sysinfo::{Disks, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};

use crate::models::{HostSample, ProcessIdentity, ProcessSample};

/// 采样来源。生产环境使用 sysinfo，测试中可以替换为固定快照
pub trait SystemSampler {
    /// 整机指标，单项失败时对应字段为 None
    fn sample_host(&mut self) -> HostSample;

    /// 枚举所有存活进程。失败意味着本周期无法继续
    fn sample_processes(&mut self) -> anyhow::Result<Vec<ProcessSample>>;
}

/// 基于 sysinfo 的采样器。
///
/// 跨周期复用同一个 `System`，因此 CPU 百分比反映的是两次采样之间的窗口。
pub struct StatsCollector {
    system: System,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for StatsCollector {
    fn sample_host(&mut self) -> HostSample {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu_percent = if self.system.cpus().is_empty() {
            log::warn!("Error getting CPU info: no CPUs reported");
            None
        } else {
            Some(f64::from(self.system.global_cpu_usage()))
        };

        let total_memory = self.system.total_memory();
        let memory_percent = if total_memory > 0 {
            Some(self.system.used_memory() as f64 / total_memory as f64 * 100.0)
        } else {
            log::warn!("Error getting memory info: total memory is 0");
            None
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disk_used_percent(
            disks
                .list()
                .iter()
                .map(|d| (d.mount_point(), d.total_space(), d.available_space())),
        );
        if disk_percent.is_none() {
            log::warn!("Error getting disk info: no usable filesystem found");
        }

        HostSample {
            cpu_percent,
            memory_percent,
            disk_percent,
        }
    }

    fn sample_processes(&mut self) -> anyhow::Result<Vec<ProcessSample>> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            bail!("process enumeration is not supported on this platform");
        }

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_user(UpdateKind::OnlyIfNotSet)
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );
        let users = Users::new_with_refreshed_list();

        let samples = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let username = process
                    .user_id()
                    .and_then(|uid| users.get_user_by_id(uid))
                    .map(|u| u.name().to_string())
                    .unwrap_or_default();
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");

                ProcessSample {
                    identity: ProcessIdentity {
                        pid: pid.as_u32(),
                        parent_pid: process.parent().map(|p| p.as_u32()),
                        name: process.name().to_string_lossy().into_owned(),
                        username,
                        cmdline,
                    },
                    cpu_percent: Some(process.cpu_usage()),
                    cpu_seconds: Some(process.accumulated_cpu_time() as f64 / 1000.0),
                    rss_bytes: Some(process.memory()),
                }
            })
            .collect::<Vec<_>>();

        if samples.is_empty() {
            bail!("process list is empty");
        }
        Ok(samples)
    }
}

/// 优先使用根文件系统；没有根挂载点时汇总所有磁盘
fn disk_used_percent<'a>(disks: impl Iterator<Item = (&'a Path, u64, u64)>) -> Option<f64> {
    let disks: Vec<_> = disks.filter(|(_, total, _)| *total > 0).collect();
    let (total, available) = match disks.iter().find(|(mount, _, _)| *mount == Path::new("/")) {
        Some((_, total, available)) => (*total, *available),
        None => disks
            .iter()
            .fold((0u64, 0u64), |(t, a), (_, total, available)| {
                (t + total, a + available)
            }),
    };
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_percent_prefers_root() {
        let disks = [
            (Path::new("/boot"), 1000u64, 0u64),
            (Path::new("/"), 1000u64, 750u64),
        ];
        assert_eq!(disk_used_percent(disks.into_iter()), Some(25.0));
    }

    #[test]
    fn test_disk_percent_aggregates_without_root() {
        let disks = [
            (Path::new("/data"), 100u64, 50u64),
            (Path::new("/srv"), 300u64, 50u64),
        ];
        assert_eq!(disk_used_percent(disks.into_iter()), Some(75.0));
    }

    #[test]
    fn test_disk_percent_none_without_disks() {
        assert_eq!(disk_used_percent(std::iter::empty()), None);
        let empty = [(Path::new("/"), 0u64, 0u64)];
        assert_eq!(disk_used_percent(empty.into_iter()), None);
    }

    #[test]
    fn test_sysinfo_sees_current_process() {
        let mut collector = StatsCollector::new();
        let samples = collector.sample_processes().unwrap();
        let me = std::process::id();
        assert!(samples.iter().any(|s| s.identity.pid == me));

        let host = collector.sample_host();
        assert!(host.memory_percent.is_some());
    }
}
