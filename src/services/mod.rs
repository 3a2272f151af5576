pub mod aggregator;
pub mod cgroup;
pub mod classifier;
pub mod labels;
pub mod plugin;
pub mod sender;
pub mod stats_collector;
pub mod supervisor;
pub mod tasks;

pub use aggregator::MetricsAggregator;
pub use cgroup::CgroupInspector;
pub use classifier::Classifier;
pub use labels::LabelResolver;
pub use plugin::PluginRunner;
pub use sender::ApiClient;
pub use stats_collector::StatsCollector;
pub use supervisor::Supervisor;
pub use tasks::TaskExecutor;
