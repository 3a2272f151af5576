use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::models::CollectedMetrics;

/// 最近一次周期的快照，供本地状态接口读取
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Unix 时间戳（秒）
    pub timestamp: u64,
    pub node: String,
    pub cycle: u64,
    pub metrics: CollectedMetrics,
}

pub struct AppStateInner {
    pub node: String,
    pub cycles: u64,
    pub last_snapshot: Option<Snapshot>,
}

pub type AppState = Arc<Mutex<AppStateInner>>;

pub fn new_state(node: &str) -> AppState {
    Arc::new(Mutex::new(AppStateInner {
        node: node.to_string(),
        cycles: 0,
        last_snapshot: None,
    }))
}
