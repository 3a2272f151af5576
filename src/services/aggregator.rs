use std::collections::HashSet;

use crate::models::{
    CollectedMetrics, HostSample, ProcessSample, ProjectMetrics, ProjectRule, SYSTEM_KEY,
};
use crate::services::classifier::Classifier;
use crate::services::plugin::PluginRunner;
use crate::services::stats_collector::SystemSampler;

/// 每个周期把进程归类并累加到项目上，再叠加插件输出
pub struct MetricsAggregator {
    classifier: Classifier,
    plugins: PluginRunner,
}

impl MetricsAggregator {
    pub fn new(classifier: Classifier, plugins: PluginRunner) -> Self {
        Self {
            classifier,
            plugins,
        }
    }

    /// 完整的一次采集。只有无法枚举进程时返回错误
    pub async fn collect<S>(&self, sampler: &mut S, rules: &[ProjectRule]) -> anyhow::Result<CollectedMetrics>
    where
        S: SystemSampler + ?Sized,
    {
        let host = sampler.sample_host();
        let processes = sampler.sample_processes()?;
        Ok(self.aggregate(&host, &processes, rules).await)
    }

    pub async fn aggregate(
        &self,
        host: &HostSample,
        processes: &[ProcessSample],
        rules: &[ProjectRule],
    ) -> CollectedMetrics {
        let mut metrics = CollectedMetrics::new();
        if host.is_valid() {
            metrics.insert(SYSTEM_KEY.to_string(), ProjectMetrics::from_host(host));
        }

        let mut plugins_seen: HashSet<String> = HashSet::new();
        let mut unclassified = 0usize;

        for sample in processes {
            let classification = self.classifier.classify(&sample.identity, rules);
            let Some(project) = classification.project() else {
                unclassified += 1;
                continue;
            };

            metrics
                .entry(project.to_string())
                .or_default()
                .add_process(sample);

            if plugins_seen.insert(project.to_string()) {
                let plugin = rules
                    .iter()
                    .find(|r| r.name == project)
                    .and_then(|r| r.plugin.as_deref());
                if let Some(plugin) = plugin {
                    let outcome = self.plugins.run(plugin, project).await;
                    let entry = metrics.entry(project.to_string()).or_default();
                    match outcome {
                        Ok(custom) => entry.merge_custom(custom),
                        Err(e) => {
                            log::error!(
                                "Error executing plugin for project {} (first pid {}): {}",
                                project,
                                sample.identity.pid,
                                e
                            );
                            entry.record_plugin_error(e.to_string());
                        }
                    }
                }
            }
        }

        log::info!(
            "Collected metrics for {} projects/entities ({} processes, {} unclassified)",
            metrics.len(),
            processes.len(),
            unclassified
        );
        metrics
    }
}
