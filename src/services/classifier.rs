use std::fmt;
use std::sync::Arc;

use crate::models::{MatchSpec, ProcessIdentity, ProjectRule};
use crate::services::cgroup::{container_id_from_lines, systemd_unit_from_lines, CgroupInspector};
use crate::services::labels::{InspectError, LabelResolver};

/// 单条匹配条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    SystemdUnit,
    ContainerLabel,
    ProcessName,
    Username,
    Cmdline,
}

/// 每条规则内的求值顺序。第一个命中的条件决定归属
pub const CRITERIA_ORDER: [Criterion; 5] = [
    Criterion::SystemdUnit,
    Criterion::ContainerLabel,
    Criterion::ProcessName,
    Criterion::Username,
    Criterion::Cmdline,
];

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SystemdUnit => "systemd unit",
            Self::ContainerLabel => "docker label",
            Self::ProcessName => "process name",
            Self::Username => "username",
            Self::Cmdline => "command line",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Project { name: String, criterion: Criterion },
    Unclassified,
}

impl Classification {
    pub fn project(&self) -> Option<&str> {
        match self {
            Self::Project { name, .. } => Some(name),
            Self::Unclassified => None,
        }
    }
}

/// 单个进程的 cgroup 信息，按需读取且每次 classify 最多读一次
struct CgroupView<'a> {
    inspector: &'a CgroupInspector,
    pid: u32,
    lines: Option<Vec<String>>,
}

impl<'a> CgroupView<'a> {
    fn new(inspector: &'a CgroupInspector, pid: u32) -> Self {
        Self {
            inspector,
            pid,
            lines: None,
        }
    }

    fn lines(&mut self) -> &[String] {
        let (inspector, pid) = (self.inspector, self.pid);
        self.lines.get_or_insert_with(|| match inspector.read_lines(pid) {
            Ok(lines) => lines,
            Err(e) => {
                log::warn!("PID {}: failed to read cgroup info: {}", pid, e);
                Vec::new()
            }
        })
    }
}

/// 进程 -> 项目 归类器
pub struct Classifier {
    cgroups: CgroupInspector,
    labels: Arc<LabelResolver>,
}

impl Classifier {
    pub fn new(cgroups: CgroupInspector, labels: Arc<LabelResolver>) -> Self {
        Self { cgroups, labels }
    }

    /// 按规则顺序求值，永远返回项目名或 Unclassified，不返回错误
    pub fn classify(&self, identity: &ProcessIdentity, rules: &[ProjectRule]) -> Classification {
        let mut cgroup = CgroupView::new(&self.cgroups, identity.pid);

        for rule in rules {
            for criterion in CRITERIA_ORDER {
                if self.matches(criterion, &rule.matcher, identity, &mut cgroup) {
                    log::debug!(
                        "PID {} ({}) matched project '{}' by {}",
                        identity.pid,
                        identity.name,
                        rule.name,
                        criterion
                    );
                    return Classification::Project {
                        name: rule.name.clone(),
                        criterion,
                    };
                }
            }
        }

        Classification::Unclassified
    }

    fn matches(
        &self,
        criterion: Criterion,
        spec: &MatchSpec,
        identity: &ProcessIdentity,
        cgroup: &mut CgroupView<'_>,
    ) -> bool {
        match criterion {
            Criterion::SystemdUnit => match &spec.systemd_unit {
                Some(unit) => systemd_unit_from_lines(cgroup.lines()).as_deref() == Some(unit.as_str()),
                None => false,
            },
            Criterion::ContainerLabel => match &spec.docker_label {
                Some(selector) => {
                    let Some(container_id) = container_id_from_lines(cgroup.lines()) else {
                        return false;
                    };
                    match self.labels.labels(&container_id) {
                        Ok(labels) => selector.matches(&labels),
                        Err(InspectError::ToolUnavailable(_)) => false,
                        Err(e) => {
                            log::warn!(
                                "PID {}: label lookup for container {} failed: {}",
                                identity.pid,
                                container_id,
                                e
                            );
                            false
                        }
                    }
                }
                None => false,
            },
            Criterion::ProcessName => spec.process_name.as_deref() == Some(identity.name.as_str()),
            Criterion::Username => spec.username.as_deref() == Some(identity.username.as_str()),
            Criterion::Cmdline => match spec.cmdline.as_deref() {
                Some(needle) => identity.cmdline.contains(needle),
                None => false,
            },
        }
    }
}
