//! Daemon 健康探测与 fallback 同步
//!
//! 会话开始时的两条路径：
//! - 快路径：后台同步 daemon 健在，直接信任它，不做同步动作
//! - 慢路径（fallback）：daemon 不可达，跑一次有界超时的一次性同步
//!
//! 探测类接口（`is_daemon_running`/`get_daemon_status`）吞掉一切错误
//! 返回否定结果；`trigger_daemon_sync` 是显式请求，失败必须让调用方知道。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};

/// Daemon 默认监听地址
pub const DEFAULT_DAEMON_HOST: &str = "127.0.0.1";
/// Daemon 默认端口
pub const DEFAULT_DAEMON_PORT: u16 = 8765;
/// 健康/状态探测默认超时（毫秒）
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;
/// 显式触发同步默认超时（毫秒）
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 5000;
/// fallback 同步默认超时（毫秒）
pub const DEFAULT_FALLBACK_TIMEOUT_MS: u64 = 30_000;

/// 记忆文档文件名（相对 base path）
pub const MEMORY_FILE: &str = "memory.md";
/// 每日日志目录名（相对 base path）
pub const LOGS_DIR: &str = "logs";

/// `GET /health` 响应体
#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    healthy: bool,
}

/// fallback 同步结果；从不抛错，调用方可以带着过期本地状态继续
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 会话开始参数
#[derive(Debug, Clone)]
pub struct SessionStartOptions {
    pub host: String,
    pub port: u16,
    /// daemon 不可达时是否执行 fallback 同步
    pub use_fallback: bool,
    /// 记忆文档与日志所在目录
    pub base_path: PathBuf,
    /// fallback 同步命令（argv 形式），第一个元素是程序名
    pub sync_command: Vec<String>,
}

impl Default for SessionStartOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_DAEMON_HOST.to_string(),
            port: DEFAULT_DAEMON_PORT,
            use_fallback: true,
            base_path: PathBuf::from("."),
            sync_command: Vec::new(),
        }
    }
}

/// 会话开始的复合结果
///
/// `memory`/`daily_log` 对缺失文件归一化为空字符串，调用方不需要判空。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartResult {
    pub daemon_running: bool,
    pub memory: String,
    pub daily_log: String,
    pub memory_path: PathBuf,
    pub daily_log_path: PathBuf,
}

/// 会话结束结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndResult {
    /// true 表示 daemon 健在，同步已由它负责
    pub daemon_handled: bool,
}

/// Daemon 健康探测客户端
///
/// 每次调用独立携带超时，无跨调用状态，可并发重复执行。
pub struct DaemonClient {
    client: reqwest::Client,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// daemon 是否健在
    ///
    /// 仅当响应 2xx 且 JSON 里 `healthy` 恰为 true 时返回 true；
    /// 网络错误、非 2xx、非法 JSON、超时一律返回 false，从不抛错。
    pub async fn is_daemon_running(&self, host: &str, port: u16, timeout_ms: u64) -> bool {
        let url = format!("http://{}:{}/health", host, port);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<HealthBody>().await {
                Ok(body) => body.healthy,
                Err(e) => {
                    debug!(error = %e, "daemon health body not parseable");
                    false
                }
            },
            Ok(resp) => {
                debug!(status = %resp.status(), "daemon health probe non-success");
                false
            }
            Err(e) => {
                debug!(error = %e, "daemon health probe failed");
                false
            }
        }
    }

    /// 读取 daemon 状态；与健康探测相同的吞错策略
    pub async fn get_daemon_status(
        &self,
        host: &str,
        port: u16,
        timeout_ms: u64,
    ) -> Option<serde_json::Value> {
        let url = format!("http://{}:{}/status", host, port);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<serde_json::Value>().await.ok()
    }

    /// 显式触发 daemon 同步
    ///
    /// 不吞错：非 2xx 或网络失败返回 [`FleetError::SyncTriggerFailed`]，
    /// 调用方需要知道同步没有发生。
    pub async fn trigger_daemon_sync(
        &self,
        host: &str,
        port: u16,
        timeout_ms: u64,
    ) -> Result<serde_json::Value> {
        let url = format!("http://{}:{}/sync", host, port);
        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| FleetError::SyncTriggerFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FleetError::SyncTriggerFailed(format!(
                "daemon returned {}",
                status
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FleetError::SyncTriggerFailed(e.to_string()))
    }
}

/// 运行项目自带的同步入口命令，超时有界
///
/// 非零退出或超时返回 `success=false` 与捕获到的错误输出，从不抛错。
pub async fn fallback_sync(
    command: &[String],
    base_path: &Path,
    timeout_ms: u64,
) -> SyncOutcome {
    let Some((program, args)) = command.split_first() else {
        return SyncOutcome {
            success: false,
            output: None,
            error: Some("no sync command configured".to_string()),
        };
    };

    info!(program = %program, "running fallback sync");
    // 超时丢弃 output future 时必须连带杀掉子进程，
    // 否则同步会在超时上界之外继续改动远端状态
    let run = Command::new(program)
        .args(args)
        .current_dir(base_path)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            if output.status.success() {
                SyncOutcome {
                    success: true,
                    output: Some(stdout),
                    error: None,
                }
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let error = if stderr.is_empty() {
                    format!("sync command exited with {}", output.status)
                } else {
                    stderr
                };
                SyncOutcome {
                    success: false,
                    output: Some(stdout),
                    error: Some(error),
                }
            }
        }
        Ok(Err(e)) => SyncOutcome {
            success: false,
            output: None,
            error: Some(format!("failed to run sync command: {}", e)),
        },
        Err(_) => SyncOutcome {
            success: false,
            output: None,
            error: Some(format!("sync command timed out after {}ms", timeout_ms)),
        },
    }
}

/// 读取本地文件：缺失是正常状态返回 None，其他 I/O 失败照常传播
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 当天日志文件路径
pub fn daily_log_path(base_path: &Path) -> PathBuf {
    let today = chrono::Local::now().format("%Y-%m-%d");
    base_path.join(LOGS_DIR).join(format!("{}.md", today))
}

/// 会话开始编排
///
/// 1. 探测 daemon：健在则走快路径，只拉状态做诊断日志
/// 2. 不可达且启用 fallback：执行一次 fallback 同步，失败只记日志不阻断会话
/// 3. 不可达且禁用 fallback：直接读本地状态
/// 4. 无条件加载记忆文档和当天日志，缺失归一化为空字符串
pub async fn handle_session_start(options: &SessionStartOptions) -> Result<SessionStartResult> {
    let client = DaemonClient::new();
    let daemon_running = client
        .is_daemon_running(&options.host, options.port, DEFAULT_PROBE_TIMEOUT_MS)
        .await;

    if daemon_running {
        // 快路径：状态仅用于诊断
        if let Some(status) = client
            .get_daemon_status(&options.host, options.port, DEFAULT_PROBE_TIMEOUT_MS)
            .await
        {
            let uptime = status
                .pointer("/stats/uptime")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let files_watched = status
                .pointer("/stats/filesWatched")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            info!(uptime_ms = uptime, files_watched, "daemon healthy, fast path");
        } else {
            info!("daemon healthy, fast path");
        }
    } else if options.use_fallback {
        let outcome = fallback_sync(
            &options.sync_command,
            &options.base_path,
            DEFAULT_FALLBACK_TIMEOUT_MS,
        )
        .await;
        if outcome.success {
            info!("fallback sync completed");
        } else {
            // 同步失败不阻断会话，继续用过期的本地状态
            warn!(error = ?outcome.error, "fallback sync failed, continuing with local state");
        }
    } else {
        debug!("daemon unreachable and fallback disabled, loading local state directly");
    }

    let memory_path = options.base_path.join(MEMORY_FILE);
    let daily_log_path = daily_log_path(&options.base_path);
    let memory = read_optional(&memory_path)?.unwrap_or_default();
    let daily_log = read_optional(&daily_log_path)?.unwrap_or_default();

    Ok(SessionStartResult {
        daemon_running,
        memory,
        daily_log,
        memory_path,
        daily_log_path,
    })
}

/// 会话结束编排：daemon 健在则同步已由它负责，否则提示调用方考虑手动同步
pub async fn handle_session_end(host: &str, port: u16) -> SessionEndResult {
    let client = DaemonClient::new();
    let daemon_handled = client
        .is_daemon_running(host, port, DEFAULT_PROBE_TIMEOUT_MS)
        .await;
    if !daemon_handled {
        info!("daemon unreachable at session end, manual sync may be needed");
    }
    SessionEndResult { daemon_handled }
}
