use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::path::PathBuf;

lazy_static! {
    /// 12:pids:/docker/ab3580...9085
    /// 0::/docker/ab3580...9085.scope
    static ref DOCKER_PATH: Regex =
        Regex::new(r"/docker/([0-9a-fA-F]{12,64})(?:\.scope)?$").unwrap();
    /// systemd cgroup driver: 0::/system.slice/docker-ab3580...9085.scope
    static ref DOCKER_SCOPE: Regex =
        Regex::new(r"/docker-([0-9a-fA-F]{12,64})\.scope$").unwrap();
    static ref SERVICE_UNIT: Regex = Regex::new(r"^[A-Za-z0-9_.@:\\-]+\.service$").unwrap();
}

/// 读取 `<proc_root>/<pid>/cgroup`，从中解析 systemd unit 和容器 ID
#[derive(Debug, Clone)]
pub struct CgroupInspector {
    proc_root: PathBuf,
}

impl CgroupInspector {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: root.into(),
        }
    }

    /// 文件不存在（进程已退出、非 Linux）不算错误，返回空列表
    pub fn read_lines(&self, pid: u32) -> io::Result<Vec<String>> {
        let path = self.proc_root.join(pid.to_string()).join("cgroup");
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

impl Default for CgroupInspector {
    fn default() -> Self {
        Self::new()
    }
}

/// 取 `hierarchy-ID:controllers:path` 中的 path
fn cgroup_path(line: &str) -> Option<&str> {
    line.splitn(3, ':').nth(2)
}

/// 从 cgroup 行中找出最具体的 `*.service`。
///
/// 0::/system.slice/my-app.service                                  -> my-app.service
/// 0::/user.slice/user-1000.slice/user@1000.service/app.slice/x.service -> x.service
/// 0::/user.slice/user-1000.slice/user@1000.service/init.scope       -> None
pub fn systemd_unit_from_lines(lines: &[String]) -> Option<String> {
    for line in lines {
        let Some(path) = cgroup_path(line) else {
            continue;
        };
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if !components
            .iter()
            .any(|c| *c == "system.slice" || *c == "user.slice")
        {
            continue;
        }

        // 最后一个 .service 组件最具体，app.slice 下的嵌套 unit 因此优先于 user@<uid>.service
        let unit = components
            .iter()
            .rev()
            .find(|c| SERVICE_UNIT.is_match(c))
            .copied();

        if let Some(unit) = unit {
            if is_generic_unit(unit) {
                log::trace!("Skipping generic systemd unit {}", unit);
                continue;
            }
            return Some(unit.to_string());
        }
    }
    None
}

/// 登录会话 / 用户管理器本身不代表某个应用
fn is_generic_unit(unit: &str) -> bool {
    unit == "user.slice" || unit.starts_with("user@") || unit.starts_with("session-")
}

/// 返回原始的容器 ID 子串（长短形式取决于运行时），不做截断
pub fn container_id_from_lines(lines: &[String]) -> Option<String> {
    for line in lines {
        let Some(path) = cgroup_path(line) else {
            continue;
        };
        if let Some(caps) = DOCKER_PATH
            .captures(path)
            .or_else(|| DOCKER_SCOPE.captures(path))
        {
            return Some(caps[1].to_string());
        }
    }
    None
}
