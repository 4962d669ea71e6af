//! 外部进程管理器抽象 - 可替换的窄接口
//!
//! 把底层 OS 级进程管理器（pm2 等）收窄成六个生命周期原语，
//! supervisor 只依赖这个边界，便于用内存实现做测试替身。

use async_trait::async_trait;

use super::types::{AgentProcessOptions, ProcessDescription};
use crate::error::Result;

/// 外部进程管理器能力接口
///
/// 实现约定：
/// - `start` 对重名/非法脚本返回 `StartFailed`
/// - `stop`/`restart`/`reload`/`delete` 对未注册名称返回 `NotFound`
/// - `describe` 对未注册名称返回空列表而不是错误
/// - 传输/IPC 失败统一映射为 `Supervisor`
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// 启动进程，返回新建实例的快照（cluster 模式可能多个）
    async fn start(&self, options: &AgentProcessOptions) -> Result<Vec<ProcessDescription>>;

    /// 停止进程（保留注册项）
    async fn stop(&self, name: &str) -> Result<()>;

    /// 重启进程
    async fn restart(&self, name: &str) -> Result<()>;

    /// 零停机滚动重启（仅 cluster 模式有意义）
    async fn reload(&self, name: &str) -> Result<()>;

    /// 删除注册项
    async fn delete(&self, name: &str) -> Result<()>;

    /// 列出所有注册进程
    async fn list(&self) -> Result<Vec<ProcessDescription>>;

    /// 查询指定名称的快照，未注册时返回空列表
    async fn describe(&self, name: &str) -> Result<Vec<ProcessDescription>>;
}
