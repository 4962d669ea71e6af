//! 进程编排数据模型 - 启动选项与状态快照

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 默认自动重启
pub const DEFAULT_AUTORESTART: bool = true;
/// 默认最大重启次数
pub const DEFAULT_MAX_RESTARTS: u32 = 10;
/// 默认重启退避（毫秒）
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1000;
/// 默认强杀前宽限期（毫秒）
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 5000;

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// 单进程
    Fork,
    /// 多进程（支持零停机 reload）
    Cluster,
}

impl Default for ExecMode {
    fn default() -> Self {
        Self::Fork
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Fork => write!(f, "fork"),
            ExecMode::Cluster => write!(f, "cluster"),
        }
    }
}

/// 文件变更监控配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WatchMode {
    /// 开/关
    Enabled(bool),
    /// 指定监控路径列表
    Paths(Vec<String>),
}

impl Default for WatchMode {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

impl WatchMode {
    /// 是否启用了监控
    pub fn is_enabled(&self) -> bool {
        match self {
            WatchMode::Enabled(on) => *on,
            WatchMode::Paths(paths) => !paths.is_empty(),
        }
    }
}

/// 规范化的进程启动请求
///
/// `name` 在 fleet 内唯一；对已存在的 name 重复 start 是错误，
/// 幂等启动请走 [`ProcessSupervisor::ensure`](super::ProcessSupervisor::ensure)。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProcessOptions {
    /// 入口脚本（必填）
    pub script: String,
    /// fleet 内唯一标识
    pub name: String,
    /// 解释器（如 node、python3）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    /// 工作目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// 注入的环境变量
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// 实例数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<u32>,
    /// 执行模式
    #[serde(default)]
    pub exec_mode: ExecMode,
    /// 崩溃后自动重启
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,
    /// 最大重启次数
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// 重启退避（毫秒）
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// 内存超限重启阈值（如 "500M"）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_restart: Option<String>,
    /// 文件变更触发重启
    #[serde(default)]
    pub watch: WatchMode,
    /// 强杀前宽限期（毫秒）
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
}

fn default_autorestart() -> bool {
    DEFAULT_AUTORESTART
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_restart_delay_ms() -> u64 {
    DEFAULT_RESTART_DELAY_MS
}

fn default_kill_timeout_ms() -> u64 {
    DEFAULT_KILL_TIMEOUT_MS
}

impl AgentProcessOptions {
    /// 创建带默认值的启动请求
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            name: name.into(),
            interpreter: None,
            cwd: None,
            env: HashMap::new(),
            instances: None,
            exec_mode: ExecMode::default(),
            autorestart: DEFAULT_AUTORESTART,
            max_restarts: DEFAULT_MAX_RESTARTS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            max_memory_restart: None,
            watch: WatchMode::default(),
            kill_timeout_ms: DEFAULT_KILL_TIMEOUT_MS,
        }
    }
}

/// 进程状态（外部管理器的状态词汇）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "errored")]
    Errored,
    #[serde(rename = "launching")]
    Launching,
    #[serde(rename = "one-launch-status")]
    OneLaunchStatus,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Online => write!(f, "online"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Errored => write!(f, "errored"),
            ProcessStatus::Launching => write!(f, "launching"),
            ProcessStatus::OneLaunchStatus => write!(f, "one-launch-status"),
        }
    }
}

/// 资源监控快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Monit {
    /// 内存占用（字节）
    #[serde(default)]
    pub memory: u64,
    /// CPU 占用（百分比）
    #[serde(default)]
    pub cpu: f32,
}

/// 进程环境块（由外部管理器维护）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEnv {
    /// 当前状态
    pub status: ProcessStatus,
    /// 累计重启次数
    #[serde(default)]
    pub restart_count: u32,
    /// 启动时刻（epoch 毫秒）
    #[serde(default)]
    pub started_at_ms: i64,
    /// 实际执行路径
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_path: Option<String>,
    /// 工作目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// 注入的环境变量
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// 进程状态快照
///
/// 在 supervisor 发出 start 时创建，由外部进程管理器随状态迁移更新，
/// 只有显式 delete 才会移除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDescription {
    /// fleet 内唯一名称
    pub name: String,
    /// 操作系统 PID（停止时为 None）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// 外部管理器的内部 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<i64>,
    /// 资源监控
    #[serde(default)]
    pub monit: Monit,
    /// 执行模式
    #[serde(default)]
    pub exec_mode: ExecMode,
    /// 环境块
    pub env: ProcessEnv,
}

impl ProcessDescription {
    /// 当前状态
    pub fn status(&self) -> ProcessStatus {
        self.env.status
    }

    /// 是否在线
    pub fn is_online(&self) -> bool {
        self.env.status == ProcessStatus::Online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let opts = AgentProcessOptions::new("svc-a", "boot.js");
        assert!(opts.autorestart);
        assert_eq!(opts.max_restarts, 10);
        assert_eq!(opts.restart_delay_ms, 1000);
        assert_eq!(opts.kill_timeout_ms, 5000);
        assert_eq!(opts.exec_mode, ExecMode::Fork);
        assert!(!opts.watch.is_enabled());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProcessStatus::Online).unwrap(),
            "\"online\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessStatus::OneLaunchStatus).unwrap(),
            "\"one-launch-status\""
        );
        let status: ProcessStatus = serde_json::from_str("\"errored\"").unwrap();
        assert_eq!(status, ProcessStatus::Errored);
    }

    #[test]
    fn test_watch_mode_untagged() {
        let watch: WatchMode = serde_json::from_str("true").unwrap();
        assert!(watch.is_enabled());
        let watch: WatchMode = serde_json::from_str("[\"src\", \"config\"]").unwrap();
        assert!(watch.is_enabled());
        let watch: WatchMode = serde_json::from_str("[]").unwrap();
        assert!(!watch.is_enabled());
    }
}
