use serde::Serialize;

/// 单次采样中的进程身份信息（每个周期重新采集，不持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessIdentity {
    /// 进程 ID
    pub pid: u32,
    /// 父进程 ID
    pub parent_pid: Option<u32>,
    /// 进程名称
    pub name: String,
    /// 所属用户名（无法解析时为空字符串）
    pub username: String,
    /// 完整命令行，参数以空格连接
    pub cmdline: String,
}

/// 一个进程的身份 + 资源采样
#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub identity: ProcessIdentity,
    /// 本采样窗口内的 CPU 使用率 (百分比，100 = 一个核满载)
    pub cpu_percent: Option<f32>,
    /// 累计 CPU 时间 (秒)
    pub cpu_seconds: Option<f64>,
    /// 常驻内存 (字节)
    pub rss_bytes: Option<u64>,
}

/// 整机采样。任何字段采样失败时为 None，不影响其余字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSample {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
}

impl HostSample {
    /// 是否至少有一项整机指标采样成功
    pub fn is_valid(&self) -> bool {
        self.cpu_percent.is_some() || self.memory_percent.is_some() || self.disk_percent.is_some()
    }
}
