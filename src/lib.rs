//! Agent Fleet Manager - 管理长驻 AI agent 进程的编排层
//!
//! 四个核心组件：
//! - [`supervisor`]：把外部进程管理器包成幂等的生命周期 API
//! - [`config`]：声明式 agent 定义的加载与转换
//! - [`server`]：每个 agent 内置的 HTTP 控制平面
//! - [`daemon`]：后台同步 daemon 的健康探测与 fallback 同步

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod server;
pub mod supervisor;

pub use config::{find_config_path, load_config, to_process_options, AgentDefinition, AgentProcessConfig};
pub use daemon::{
    fallback_sync, handle_session_end, handle_session_start, DaemonClient, SessionEndResult,
    SessionStartOptions, SessionStartResult, SyncOutcome,
};
pub use error::{FleetError, Result};
pub use server::{AgentServer, AgentServerConfig, AgentStatus, ServiceStatus, StatusProvider};
pub use supervisor::{
    AgentProcessOptions, ExecMode, MockManager, Pm2Manager, ProcessDescription, ProcessManager,
    ProcessStatus, ProcessSupervisor, WatchMode,
};
