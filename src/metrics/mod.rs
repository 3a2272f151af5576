use prometheus::{
    Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder,
    register_gauge_vec_with_registry, register_int_counter_vec_with_registry,
};
use lazy_static::lazy_static;
use std::sync::Arc;

use crate::models::{CollectedMetrics, ExecutionStatus, SYSTEM_KEY};

/// 本地 `/metrics` 接口导出的指标，每个周期用最新快照整体替换
pub struct MetricsRegistry {
    registry: Registry,

    // 项目
    pub project_cpu_percent: GaugeVec,
    pub project_cpu_seconds: GaugeVec,
    pub project_memory_bytes: GaugeVec,
    pub project_process_count: GaugeVec,
    pub project_custom_metric: GaugeVec,
    pub project_plugin_error: GaugeVec,

    // 整机
    pub system_cpu_percent: GaugeVec,
    pub system_memory_percent: GaugeVec,
    pub system_disk_percent: GaugeVec,

    // 任务
    pub tasks_total: IntCounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        let project_labels = &["project", "hostname"];
        let system_labels = &["hostname"];

        let project_cpu_percent = register_gauge_vec_with_registry!(
            Opts::new("project_cpu_usage_percent", "Sum of per-process CPU usage percentage in one sampling window"),
            project_labels,
            registry
        ).unwrap();

        let project_cpu_seconds = register_gauge_vec_with_registry!(
            Opts::new("project_cpu_seconds", "Sum of cumulative CPU time of live processes"),
            project_labels,
            registry
        ).unwrap();

        let project_memory_bytes = register_gauge_vec_with_registry!(
            Opts::new("project_memory_bytes", "Resident memory of the project's processes in bytes"),
            project_labels,
            registry
        ).unwrap();

        let project_process_count = register_gauge_vec_with_registry!(
            Opts::new("project_process_count", "Number of processes classified into the project"),
            project_labels,
            registry
        ).unwrap();

        let project_custom_metric = register_gauge_vec_with_registry!(
            Opts::new("project_custom_metric", "Numeric metric reported by the project's plugin"),
            &["project", "metric", "hostname"],
            registry
        ).unwrap();

        let project_plugin_error = register_gauge_vec_with_registry!(
            Opts::new("project_plugin_error", "Plugin failed (1) or succeeded (0) in the last cycle"),
            project_labels,
            registry
        ).unwrap();

        let system_cpu_percent = register_gauge_vec_with_registry!(
            Opts::new("system_cpu_usage_percent", "Host CPU usage percentage"),
            system_labels,
            registry
        ).unwrap();

        let system_memory_percent = register_gauge_vec_with_registry!(
            Opts::new("system_memory_percent", "Host memory usage percentage"),
            system_labels,
            registry
        ).unwrap();

        let system_disk_percent = register_gauge_vec_with_registry!(
            Opts::new("system_disk_percent", "Host disk usage percentage"),
            system_labels,
            registry
        ).unwrap();

        let tasks_total = register_int_counter_vec_with_registry!(
            Opts::new("remote_tasks_total", "Remote tasks executed, by outcome"),
            &["status", "hostname"],
            registry
        ).unwrap();

        Self {
            registry,
            project_cpu_percent,
            project_cpu_seconds,
            project_memory_bytes,
            project_process_count,
            project_custom_metric,
            project_plugin_error,
            system_cpu_percent,
            system_memory_percent,
            system_disk_percent,
            tasks_total,
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// 用新快照替换所有 gauge，已消失的项目不会残留
    pub fn observe_snapshot(&self, metrics: &CollectedMetrics, hostname: &str) {
        self.reset_gauges();

        for (project, data) in metrics {
            if project == SYSTEM_KEY {
                let labels = &[hostname];
                if let Some(cpu) = data.cpu_percent {
                    self.system_cpu_percent.with_label_values(labels).set(cpu);
                }
                if let Some(ram) = data.ram_percent {
                    self.system_memory_percent.with_label_values(labels).set(ram);
                }
                if let Some(disk) = data.disk_percent {
                    self.system_disk_percent.with_label_values(labels).set(disk);
                }
                continue;
            }

            let labels = &[project.as_str(), hostname];
            if let Some(cpu) = data.cpu_percent {
                self.project_cpu_percent.with_label_values(labels).set(cpu);
            }
            if let Some(secs) = data.cpu_seconds {
                self.project_cpu_seconds.with_label_values(labels).set(secs);
            }
            self.project_memory_bytes
                .with_label_values(labels)
                .set(data.ram_bytes as f64);
            self.project_process_count
                .with_label_values(labels)
                .set(data.process_count as f64);

            if data.plugin_error().is_some() {
                self.project_plugin_error.with_label_values(labels).set(1.0);
                continue;
            }
            for (metric, value) in &data.custom_metrics {
                // 只导出数值，字符串等类型仅出现在上报的 JSON 中
                if let Some(v) = value.as_f64() {
                    self.project_custom_metric
                        .with_label_values(&[project.as_str(), metric.as_str(), hostname])
                        .set(v);
                }
            }
            if !data.custom_metrics.is_empty() {
                self.project_plugin_error.with_label_values(labels).set(0.0);
            }
        }
    }

    pub fn observe_task(&self, status: ExecutionStatus, hostname: &str) {
        self.tasks_total
            .with_label_values(&[status.as_str(), hostname])
            .inc();
    }

    fn reset_gauges(&self) {
        self.project_cpu_percent.reset();
        self.project_cpu_seconds.reset();
        self.project_memory_bytes.reset();
        self.project_process_count.reset();
        self.project_custom_metric.reset();
        self.project_plugin_error.reset();
        self.system_cpu_percent.reset();
        self.system_memory_percent.reset();
        self.system_disk_percent.reset();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}
