//! Agent 声明式配置 - 加载与转换
//!
//! 配置文件按固定顺序在目录中查找：`agent.config.json`、`agent.json`。
//! 定义只被转换成启动选项，从不被改写。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{FleetError, Result};
use crate::supervisor::types::{
    AgentProcessOptions, WatchMode, DEFAULT_AUTORESTART, DEFAULT_KILL_TIMEOUT_MS,
    DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_DELAY_MS,
};

/// 候选配置文件名，按优先级排列
pub const CONFIG_CANDIDATES: &[&str] = &["agent.config.json", "agent.json"];

/// 进程相关配置子集（restart/backoff/watch），字段缺省时用文档化默认值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProcessConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorestart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_restart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<WatchMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_timeout_ms: Option<u64>,
    /// 额外注入的环境变量
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Agent 声明式定义
///
/// 由调用 fleet manager 的项目持有；启动时转换为
/// [`AgentProcessOptions`]，转换不修改原定义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// fleet 内唯一名称
    #[serde(default)]
    pub name: String,
    /// 控制平面端口
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// 子服务名称列表
    #[serde(default)]
    pub services: Vec<String>,
    /// 入口覆盖；缺省时用调用方提供的 boot 脚本
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// 进程配置子集
    #[serde(default)]
    pub process: AgentProcessConfig,
}

/// 在目录中查找第一个存在的候选配置文件；从不报错
pub fn find_config_path(dir: &Path) -> Option<PathBuf> {
    CONFIG_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// 加载目录中的 agent 定义
///
/// 没有任何候选文件 → `ConfigNotFound`；
/// 文件存在但解析失败或缺 `name` → `InvalidConfig`。
pub fn load_config(dir: &Path) -> Result<AgentDefinition> {
    let path = find_config_path(dir).ok_or_else(|| FleetError::ConfigNotFound(dir.to_path_buf()))?;

    let content = std::fs::read_to_string(&path)?;
    let definition: AgentDefinition = serde_json::from_str(&content)
        .map_err(|e| FleetError::InvalidConfig(format!("{}: {}", path.display(), e)))?;

    if definition.name.trim().is_empty() {
        return Err(FleetError::InvalidConfig(format!(
            "{}: missing required field `name`",
            path.display()
        )));
    }

    debug!(path = %path.display(), name = %definition.name, "loaded agent config");
    Ok(definition)
}

/// 把声明式定义转换成启动选项
///
/// `script` 取 `definition.entrypoint`，缺省回退到 `boot_script`；
/// 进程字段按文档化默认值合并；注入 `AGENT_NAME`、`AGENT_PORT`、
/// `AGENT_CONFIG_DIR`，被启动的进程无需重读配置即可自我识别。
pub fn to_process_options(
    definition: &AgentDefinition,
    boot_script: &Path,
    config_dir: &Path,
) -> AgentProcessOptions {
    let process = &definition.process;
    let mut options = AgentProcessOptions::new(
        &definition.name,
        definition
            .entrypoint
            .clone()
            .unwrap_or_else(|| boot_script.to_string_lossy().into_owned()),
    );

    options.autorestart = process.autorestart.unwrap_or(DEFAULT_AUTORESTART);
    options.max_restarts = process.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS);
    options.restart_delay_ms = process.restart_delay_ms.unwrap_or(DEFAULT_RESTART_DELAY_MS);
    options.kill_timeout_ms = process.kill_timeout_ms.unwrap_or(DEFAULT_KILL_TIMEOUT_MS);
    options.max_memory_restart = process.max_memory_restart.clone();
    options.watch = process.watch.clone().unwrap_or_default();

    options.env.extend(process.env.clone());
    options
        .env
        .insert("AGENT_NAME".to_string(), definition.name.clone());
    if let Some(port) = definition.port {
        options.env.insert("AGENT_PORT".to_string(), port.to_string());
    }
    options.env.insert(
        "AGENT_CONFIG_DIR".to_string(),
        config_dir.to_string_lossy().into_owned(),
    );

    options
}
