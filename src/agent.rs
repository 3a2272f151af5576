use anyhow::{Context, Result};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::metrics::METRICS;
use crate::models::CollectedMetrics;
use crate::services::labels::ToolState;
use crate::services::{
    ApiClient, CgroupInspector, Classifier, LabelResolver, MetricsAggregator, PluginRunner,
    StatsCollector, Supervisor, TaskExecutor,
};
use crate::state::{AppState, Snapshot};

/// 容器检查工具不可用时，每隔这么多个周期重新探测一次
const TOOL_REPROBE_CYCLES: u64 = 10;

/// 周期驱动：采集 -> 发布本地快照 -> 上报 -> 拉取并执行任务。
///
/// 周期之间不重叠；落后的 tick 会被推迟而不是补发。
pub struct Agent {
    config: Config,
    node: String,
    aggregator: MetricsAggregator,
    sampler: StatsCollector,
    tasks: TaskExecutor,
    api: ApiClient,
    labels: Arc<LabelResolver>,
    state: AppState,
    cycles: u64,
}

impl Agent {
    pub fn new(config: Config, node: &str, state: AppState) -> Result<Self> {
        Self::with_labels(config, node, state, Arc::new(LabelResolver::docker()))
    }

    fn with_labels(
        config: Config,
        node: &str,
        state: AppState,
        labels: Arc<LabelResolver>,
    ) -> Result<Self> {
        let settings = &config.agent_settings;
        let supervisor = Supervisor::new();

        let classifier = Classifier::new(CgroupInspector::new(), labels.clone());
        let aggregator = MetricsAggregator::new(
            classifier,
            PluginRunner::new(supervisor.clone(), settings.plugin_timeout()),
        );
        let tasks = TaskExecutor::new(supervisor, settings.task_timeout());
        let api = ApiClient::new(&config.api_gateway, node)?;

        Ok(Self {
            node: node.to_string(),
            aggregator,
            sampler: StatsCollector::new(),
            tasks,
            api,
            labels,
            state,
            config,
            cycles: 0,
        })
    }

    pub async fn collect(&mut self) -> Result<CollectedMetrics> {
        self.aggregator
            .collect(&mut self.sampler, &self.config.projects)
            .await
    }

    pub async fn run_cycle(&mut self) {
        self.cycles += 1;
        self.reprobe_label_tool();

        log::info!("Agent tick: Collecting metrics...");
        match self.collect().await {
            Ok(metrics) => {
                self.publish(&metrics);
                if let Err(e) = self.api.send_metrics(metrics).await {
                    log::error!("Error sending metrics: {:#}", e);
                }
            }
            Err(e) => log::error!("Error collecting metrics, skipping this cycle: {:#}", e),
        }

        log::info!("Agent tick: Checking for tasks...");
        self.process_tasks().await;
        log::info!("Agent tick: Cycle complete.");
    }

    fn reprobe_label_tool(&self) {
        if self.cycles % TOOL_REPROBE_CYCLES == 0
            && self.labels.tool_state() == ToolState::Unavailable
        {
            log::info!(
                "Container inspection tool was unavailable, probing again (cycle {})",
                self.cycles
            );
            self.labels.reset_tool_state();
        }
    }

    /// 逐个执行任务并按拉取顺序回报结果
    async fn process_tasks(&self) {
        let tasks = match self.api.fetch_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                log::error!("Error fetching tasks: {:#}", e);
                return;
            }
        };

        for task in tasks {
            let result = self.tasks.execute(&task).await;
            METRICS.observe_task(result.status, &self.node);
            if let Err(e) = self.api.send_task_result(&task.id, &result).await {
                log::error!("Error sending task result for task ID {}: {:#}", task.id, e);
            }
        }
    }

    fn publish(&self, metrics: &CollectedMetrics) {
        METRICS.observe_snapshot(metrics, &self.node);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.cycles += 1;
        state.last_snapshot = Some(Snapshot {
            timestamp,
            node: self.node.clone(),
            cycle: state.cycles,
            metrics: metrics.clone(),
        });
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.agent_settings.interval();
        log::info!(
            "Agent driver started: node={}, interval={:?}, projects={}",
            self.node,
            interval,
            self.config.projects.len()
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
            // 周期内也响应停止信号；被丢弃的子进程由 kill_on_drop 终止
            tokio::select! {
                _ = self.run_cycle() => {}
                _ = shutdown_requested(&mut shutdown) => {
                    log::warn!("Shutdown requested during a cycle, abandoning it");
                    break;
                }
            }
        }
        log::info!("Agent driver stopped.");
    }

    /// 在独立线程上运行驱动循环，使用自己的单线程 runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build agent runtime")?;

        std::thread::Builder::new()
            .name("agent-driver".to_string())
            .spawn(move || runtime.block_on(self.run(shutdown)))
            .context("failed to spawn agent driver thread")
    }
}

/// 停止标志被置位，或者发送端已经关闭
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::labels::tests::{FakeInspector, Reply};
    use crate::services::sender::tests::{FakeGateway, Replies};
    use crate::state::new_state;
    use std::time::{Duration, Instant};

    fn config_for(url: &str) -> Config {
        Config::parse(&format!(
            r#"
api_gateway:
  url: {}
  token: t
agent_settings:
  collection_interval: 3600
projects:
  - name: me
    match:
      cmdline: vps_agent
"#,
            url
        ))
        .unwrap()
    }

    fn config() -> Config {
        config_for("http://127.0.0.1:9")
    }

    #[tokio::test]
    async fn test_cycle_publishes_snapshot_even_when_gateway_is_down() {
        let state = new_state("node-1");
        let mut agent = Agent::new(config(), "node-1", state.clone()).unwrap();
        agent.run_cycle().await;

        let state = state.lock().unwrap();
        assert_eq!(state.cycles, 1);
        let snapshot = state.last_snapshot.as_ref().unwrap();
        assert_eq!(snapshot.node, "node-1");
        assert!(snapshot.metrics.contains_key(crate::models::SYSTEM_KEY));
    }

    #[test]
    fn test_driver_thread_stops_on_shutdown() {
        let state = new_state("node-1");
        let agent = Agent::new(config(), "node-1", state.clone()).unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = agent.spawn(rx).unwrap();

        // 第一个 tick 立即触发；等到第一个周期结束再发送停止信号
        for _ in 0..100 {
            if state.lock().unwrap().cycles > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        tx.send(true).unwrap();
        handle.join().unwrap();
        assert_eq!(state.lock().unwrap().cycles, 1);
    }

    #[actix_rt::test]
    async fn test_tasks_reported_in_fetch_order() {
        let gw = FakeGateway::start(Replies {
            tasks: (
                200,
                r#"[{"id":"a","cmd":"echo first"},{"id":"b","cmd":"echo second; exit 3"}]"#,
            ),
            ..Replies::default()
        });
        let state = new_state("node-1");
        let mut agent = Agent::new(config_for(&gw.url), "node-1", state).unwrap();
        agent.run_cycle().await;

        let requests = gw.requests();
        let paths: Vec<_> = requests.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            ["/metrics", "/tasks", "/tasks/a/result", "/tasks/b/result"]
        );

        let first = requests[2].json();
        assert_eq!(first["status"], "completed");
        assert!(first["output"].as_str().unwrap().contains("first"));
        let second = requests[3].json();
        assert_eq!(second["status"], "failed");
        assert!(second["output"].as_str().unwrap().contains("second"));
    }

    #[actix_rt::test]
    async fn test_shutdown_interrupts_running_task() {
        let gw = FakeGateway::start(Replies {
            tasks: (200, r#"[{"id":"slow","cmd":"sleep 60"}]"#),
            ..Replies::default()
        });
        let state = new_state("node-1");
        let agent = Agent::new(config_for(&gw.url), "node-1", state).unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = agent.spawn(rx).unwrap();

        for _ in 0..100 {
            if gw.requests().iter().any(|r| r.path == "/tasks") {
                break;
            }
            actix_rt::time::sleep(Duration::from_millis(100)).await;
        }
        // 给任务一点时间真正开始运行
        actix_rt::time::sleep(Duration::from_millis(300)).await;

        let started = Instant::now();
        tx.send(true).unwrap();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!gw.requests().iter().any(|r| r.path.ends_with("/result")));
    }

    #[test]
    fn test_unavailable_tool_is_probed_again_periodically() {
        let labels = Arc::new(LabelResolver::new(FakeInspector::new(Reply::Missing)));
        assert!(labels.labels("abcdef123456").is_err());
        assert_eq!(labels.tool_state(), ToolState::Unavailable);

        let mut agent =
            Agent::with_labels(config(), "node-1", new_state("node-1"), labels.clone()).unwrap();
        agent.cycles = TOOL_REPROBE_CYCLES - 1;
        agent.reprobe_label_tool();
        assert_eq!(labels.tool_state(), ToolState::Unavailable);

        agent.cycles = TOOL_REPROBE_CYCLES;
        agent.reprobe_label_tool();
        assert_eq!(labels.tool_state(), ToolState::Unknown);
    }
}
