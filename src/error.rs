//! 错误类型定义 - 进程编排层的错误分类

use std::path::PathBuf;
use thiserror::Error;

/// 进程编排层统一 Result 类型
pub type Result<T> = std::result::Result<T, FleetError>;

/// 进程编排层错误
///
/// 传播策略：
/// - 变更类操作（start/stop/restart/delete/trigger_daemon_sync）原样传播错误
/// - 存在性检查（is_running/get/is_daemon_running）吞掉错误返回否定结果
#[derive(Debug, Error)]
pub enum FleetError {
    /// Supervisor 在 connect 之前被调用
    #[error("supervisor is not connected, call connect() first")]
    NotConnected,

    /// 目标进程名未注册
    #[error("process not found: {0}")]
    NotFound(String),

    /// 外部进程管理器拒绝了启动请求
    #[error("failed to start process: {0}")]
    StartFailed(String),

    /// 外部进程管理器的传输/IPC 错误
    #[error("process manager error: {0}")]
    Supervisor(String),

    /// 操作在当前执行模式下不可用（如 fork 模式下 reload）
    #[error("operation not supported in current exec mode: {0}")]
    UnsupportedMode(String),

    /// 目录中没有找到任何候选配置文件
    #[error("no agent config found in {0}")]
    ConfigNotFound(PathBuf),

    /// 配置文件存在但内容非法
    #[error("invalid agent config: {0}")]
    InvalidConfig(String),

    /// 显式触发 daemon 同步失败
    #[error("failed to trigger daemon sync: {0}")]
    SyncTriggerFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
