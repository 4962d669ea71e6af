//! 内存进程管理器 - 测试替身
//!
//! 实现 [`ProcessManager`] 的全部语义约定，不真正派生进程。
//! 集成测试和单元测试共用。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::backend::ProcessManager;
use super::types::{AgentProcessOptions, Monit, ProcessDescription, ProcessEnv, ProcessStatus};
use crate::error::{FleetError, Result};

/// 内存进程管理器
#[derive(Clone, Default)]
pub struct MockManager {
    processes: Arc<Mutex<HashMap<String, ProcessDescription>>>,
    restart_calls: Arc<AtomicUsize>,
}

impl MockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// restart 被调用的次数（验证 ensure 的幂等性用）
    pub fn restart_calls(&self) -> usize {
        self.restart_calls.load(Ordering::SeqCst)
    }

    /// 直接篡改进程状态，模拟崩溃/停止
    pub async fn set_status(&self, name: &str, status: ProcessStatus) {
        let mut processes = self.processes.lock().await;
        if let Some(desc) = processes.get_mut(name) {
            desc.env.status = status;
            if status != ProcessStatus::Online {
                desc.pid = None;
            }
        }
    }

    fn describe_from(options: &AgentProcessOptions, internal_id: i64) -> ProcessDescription {
        ProcessDescription {
            name: options.name.clone(),
            pid: Some(10_000 + internal_id as u32),
            internal_id: Some(internal_id),
            monit: Monit {
                memory: 32 * 1024 * 1024,
                cpu: 0.5,
            },
            exec_mode: options.exec_mode,
            env: ProcessEnv {
                status: ProcessStatus::Online,
                restart_count: 0,
                started_at_ms: chrono::Utc::now().timestamp_millis(),
                exec_path: Some(options.script.clone()),
                cwd: options.cwd.clone(),
                env: options.env.clone(),
            },
        }
    }
}

#[async_trait]
impl ProcessManager for MockManager {
    async fn start(&self, options: &AgentProcessOptions) -> Result<Vec<ProcessDescription>> {
        let mut processes = self.processes.lock().await;
        if processes.contains_key(&options.name) {
            return Err(FleetError::StartFailed(format!(
                "process name already registered: {}",
                options.name
            )));
        }
        if options.script.is_empty() {
            return Err(FleetError::StartFailed("script path is empty".to_string()));
        }
        let desc = Self::describe_from(options, processes.len() as i64);
        processes.insert(options.name.clone(), desc.clone());
        Ok(vec![desc])
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut processes = self.processes.lock().await;
        let desc = processes
            .get_mut(name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;
        desc.env.status = ProcessStatus::Stopped;
        desc.pid = None;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.restart_calls.fetch_add(1, Ordering::SeqCst);
        let mut processes = self.processes.lock().await;
        let desc = processes
            .get_mut(name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;
        desc.env.status = ProcessStatus::Online;
        desc.env.restart_count += 1;
        desc.env.started_at_ms = chrono::Utc::now().timestamp_millis();
        desc.pid = Some(20_000 + desc.env.restart_count);
        Ok(())
    }

    async fn reload(&self, name: &str) -> Result<()> {
        // reload 的 cluster 限制由 supervisor 层负责，这里等同 restart
        self.restart(name).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut processes = self.processes.lock().await;
        processes
            .remove(name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProcessDescription>> {
        let processes = self.processes.lock().await;
        Ok(processes.values().cloned().collect())
    }

    async fn describe(&self, name: &str) -> Result<Vec<ProcessDescription>> {
        let processes = self.processes.lock().await;
        Ok(processes.get(name).cloned().into_iter().collect())
    }
}
