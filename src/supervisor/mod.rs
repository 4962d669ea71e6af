//! 进程编排层 - 把回调式外部进程管理器包成幂等的生命周期 API

pub mod backend;
pub mod mock;
pub mod pm2;
pub mod types;

pub use backend::ProcessManager;
pub use mock::MockManager;
pub use pm2::Pm2Manager;
pub use types::{
    AgentProcessOptions, ExecMode, Monit, ProcessDescription, ProcessEnv, ProcessStatus, WatchMode,
};

use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};

/// 与外部管理器的会话句柄
///
/// 显式持有，而不是进程级全局状态，方便用假实现做测试。
#[derive(Debug, Clone, Copy)]
struct Session {
    standalone: bool,
}

/// 进程 fleet supervisor
///
/// 所有操作要求先 `connect`；未连接时返回 [`FleetError::NotConnected`]。
/// 针对同一 name 的并发 start/stop/delete 需要调用方自行串行化。
pub struct ProcessSupervisor<M: ProcessManager> {
    manager: M,
    session: Option<Session>,
}

impl<M: ProcessManager> ProcessSupervisor<M> {
    /// 用给定后端创建 supervisor（未连接状态）
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            session: None,
        }
    }

    /// 建立与外部管理器的会话
    ///
    /// `standalone=true` 表示使用私有、非共享的管理器实例。
    /// 私有/共享在后端构造时就已固定（见 [`Pm2Manager::new`]），
    /// 这里的标志只记录在会话句柄上，两处必须传同一个值
    /// （参见 CLI 的 `connect_supervisor`）。
    /// 已连接时再次调用是无操作（不报错，文档化的选择）。
    pub fn connect(&mut self, standalone: bool) {
        if self.session.is_some() {
            debug!("supervisor already connected, connect() is a no-op");
            return;
        }
        self.session = Some(Session { standalone });
        info!(standalone, "supervisor connected");
    }

    /// 释放会话；不会停止任何受管进程
    pub fn disconnect(&mut self) {
        if self.session.take().is_some() {
            info!("supervisor disconnected");
        }
    }

    /// 是否已连接
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn require_session(&self) -> Result<Session> {
        self.session.ok_or(FleetError::NotConnected)
    }

    /// 启动进程
    ///
    /// 重名或非法选项由外部管理器拒绝，映射为 [`FleetError::StartFailed`]。
    pub async fn start(
        &self,
        options: &AgentProcessOptions,
    ) -> Result<Vec<ProcessDescription>> {
        self.require_session()?;
        info!(name = %options.name, script = %options.script, mode = %options.exec_mode, "starting process");
        self.manager.start(options).await
    }

    /// 停止进程（保留注册项）
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.require_session()?;
        info!(name, "stopping process");
        self.manager.stop(name).await
    }

    /// 重启进程
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.require_session()?;
        info!(name, "restarting process");
        self.manager.restart(name).await
    }

    /// 零停机滚动重启，仅 cluster 模式可用
    pub async fn reload(&self, name: &str) -> Result<()> {
        self.require_session()?;
        let described = self.manager.describe(name).await?;
        let desc = described
            .first()
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;
        if desc.exec_mode != ExecMode::Cluster {
            return Err(FleetError::UnsupportedMode(format!(
                "reload requires cluster mode, {} is running in {} mode",
                name, desc.exec_mode
            )));
        }
        info!(name, "reloading process");
        self.manager.reload(name).await
    }

    /// 删除注册项
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.require_session()?;
        info!(name, "deleting process");
        self.manager.delete(name).await
    }

    /// 列出所有注册进程
    pub async fn list(&self) -> Result<Vec<ProcessDescription>> {
        self.require_session()?;
        self.manager.list().await
    }

    /// 查询指定名称的快照；未注册时返回空列表而不是错误
    pub async fn describe(&self, name: &str) -> Result<Vec<ProcessDescription>> {
        self.require_session()?;
        self.manager.describe(name).await
    }

    /// 进程是否在线
    ///
    /// 仅当快照存在且状态为 `online` 时为 true；
    /// 查询错误一律吞成 false（调用方只关心存在性，不诊断管理器健康）。
    pub async fn is_running(&self, name: &str) -> bool {
        match self.get(name).await {
            Some(desc) => desc.is_online(),
            None => false,
        }
    }

    /// 按名称取快照；未注册或查询失败都返回 None
    pub async fn get(&self, name: &str) -> Option<ProcessDescription> {
        if self.session.is_none() {
            return None;
        }
        match self.manager.describe(name).await {
            Ok(mut described) => {
                if described.is_empty() {
                    None
                } else {
                    Some(described.remove(0))
                }
            }
            Err(e) => {
                debug!(name, error = %e, "describe failed, treating as absent");
                None
            }
        }
    }

    /// 幂等启动：不存在则启动，在线则原样返回，掉线则重启后重新查询
    ///
    /// 保证同名至多一个活实例；崩溃/停止的注册项被复活而不是复制。
    pub async fn ensure(&self, options: &AgentProcessOptions) -> Result<ProcessDescription> {
        self.require_session()?;

        let existing = self.manager.describe(&options.name).await?;
        match existing.into_iter().next() {
            None => {
                let mut started = self.manager.start(options).await?;
                if started.is_empty() {
                    return Err(FleetError::StartFailed(format!(
                        "no description returned for {}",
                        options.name
                    )));
                }
                info!(name = %options.name, "ensure: started new process");
                Ok(started.remove(0))
            }
            Some(desc) if desc.is_online() => {
                debug!(name = %options.name, "ensure: already online, no action");
                Ok(desc)
            }
            Some(desc) => {
                warn!(name = %options.name, status = %desc.status(), "ensure: reviving process");
                self.manager.restart(&options.name).await?;
                let mut described = self.manager.describe(&options.name).await?;
                if described.is_empty() {
                    return Err(FleetError::NotFound(options.name.clone()));
                }
                Ok(described.remove(0))
            }
        }
    }

    /// 幂等移除：在线先停再删，掉线直接删，不存在则无操作
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.require_session()?;

        let existing = self.manager.describe(name).await?;
        match existing.first() {
            None => {
                debug!(name, "remove: not registered, nothing to do");
                Ok(())
            }
            Some(desc) => {
                if desc.is_online() {
                    self.manager.stop(name).await?;
                }
                self.manager.delete(name).await?;
                info!(name, "process removed");
                Ok(())
            }
        }
    }

    /// 运行时长（毫秒），钳到非负
    pub fn get_uptime(&self, desc: &ProcessDescription) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        (now - desc.env.started_at_ms).max(0)
    }

    /// 单行状态摘要，仅用于展示
    pub fn format_status(&self, desc: &ProcessDescription) -> String {
        let pid = desc
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let memory_mb = desc.monit.memory as f64 / (1024.0 * 1024.0);
        let uptime_secs = self.get_uptime(desc) / 1000;
        format!(
            "{} | {} | pid {} | {:.1} MB | {:.1}% cpu | up {}s | {} restarts",
            desc.name,
            desc.status(),
            pid,
            memory_mb,
            desc.monit.cpu,
            uptime_secs,
            desc.env.restart_count
        )
    }
}
