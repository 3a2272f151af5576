use clap::Parser;
use std::path::PathBuf;

/// VPS Agent - 按项目归类进程、采集指标并执行远程任务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 配置文件路径
    #[arg(short, long, env = "AGENT_CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// 本地状态接口监听端口
    #[arg(short, long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// 本地状态接口监听地址
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// 只执行一次采集，以 JSON 打印结果后退出（不上报，不执行任务）
    #[arg(long)]
    pub once: bool,
}
