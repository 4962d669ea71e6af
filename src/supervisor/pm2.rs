//! pm2 后端 - 通过 pm2 CLI 驱动外部进程管理器
//!
//! 所有命令走 `tokio::process::Command`，列表/查询用 `pm2 jlist` 的 JSON 输出。
//! standalone 模式通过私有 `PM2_HOME` 目录隔离出一个非共享的管理器实例。

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

use super::backend::ProcessManager;
use super::types::{
    AgentProcessOptions, ExecMode, Monit, ProcessDescription, ProcessEnv, ProcessStatus, WatchMode,
};
use crate::error::{FleetError, Result};

/// pm2 jlist 输出的单个进程条目
#[derive(Debug, Deserialize)]
struct Pm2ListEntry {
    name: String,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    pm_id: Option<i64>,
    #[serde(default)]
    monit: Option<Pm2Monit>,
    pm2_env: Pm2Env,
}

#[derive(Debug, Deserialize, Default)]
struct Pm2Monit {
    #[serde(default)]
    memory: u64,
    #[serde(default)]
    cpu: f32,
}

#[derive(Debug, Deserialize)]
struct Pm2Env {
    status: ProcessStatus,
    #[serde(default)]
    restart_time: u32,
    #[serde(default)]
    pm_uptime: i64,
    #[serde(default)]
    pm_exec_path: Option<String>,
    #[serde(default)]
    pm_cwd: Option<String>,
    #[serde(default)]
    exec_mode: Option<String>,
    #[serde(default)]
    env: HashMap<String, serde_json::Value>,
}

impl Pm2ListEntry {
    fn into_description(self) -> ProcessDescription {
        let monit = self.monit.unwrap_or_default();
        let exec_mode = match self.pm2_env.exec_mode.as_deref() {
            Some("cluster_mode") | Some("cluster") => ExecMode::Cluster,
            _ => ExecMode::Fork,
        };
        // pm2 把所有继承变量都塞进 env，这里只保留字符串值
        let env = self
            .pm2_env
            .env
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect();

        ProcessDescription {
            name: self.name,
            pid: self.pid.filter(|p| *p != 0),
            internal_id: self.pm_id,
            monit: Monit {
                memory: monit.memory,
                cpu: monit.cpu,
            },
            exec_mode,
            env: ProcessEnv {
                status: self.pm2_env.status,
                restart_count: self.pm2_env.restart_time,
                started_at_ms: self.pm2_env.pm_uptime,
                exec_path: self.pm2_env.pm_exec_path,
                cwd: self.pm2_env.pm_cwd,
                env,
            },
        }
    }
}

/// pm2 CLI 后端
pub struct Pm2Manager {
    /// pm2 可执行文件路径
    pm2_bin: PathBuf,
    /// 私有 PM2_HOME（standalone 模式），None 表示共享系统实例
    pm2_home: Option<PathBuf>,
}

impl Pm2Manager {
    /// 查找 pm2 可执行文件并创建后端
    ///
    /// `standalone=true` 时使用 `~/.agent-fleet/pm2` 作为私有 PM2_HOME，
    /// 与系统级 pm2 daemon 完全隔离。
    pub fn new(standalone: bool) -> Result<Self> {
        let pm2_bin = which::which("pm2")
            .map_err(|e| FleetError::Supervisor(format!("pm2 binary not found: {}", e)))?;

        let pm2_home = if standalone {
            let home = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".agent-fleet")
                .join("pm2");
            std::fs::create_dir_all(&home)?;
            Some(home)
        } else {
            None
        };

        debug!(pm2 = %pm2_bin.display(), standalone, "pm2 backend ready");
        Ok(Self { pm2_bin, pm2_home })
    }

    /// 测试用：指定 PM2_HOME 的私有实例
    pub fn new_for_test(pm2_home: PathBuf) -> Result<Self> {
        let pm2_bin = which::which("pm2")
            .map_err(|e| FleetError::Supervisor(format!("pm2 binary not found: {}", e)))?;
        std::fs::create_dir_all(&pm2_home)?;
        Ok(Self {
            pm2_bin,
            pm2_home: Some(pm2_home),
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.pm2_bin);
        if let Some(home) = &self.pm2_home {
            cmd.env("PM2_HOME", home);
        }
        cmd
    }

    /// 执行 pm2 子命令，非零退出码映射为 Supervisor 错误
    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| FleetError::Supervisor(format!("failed to run pm2: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::Supervisor(format!(
                "pm2 {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn jlist(&self) -> Result<Vec<ProcessDescription>> {
        let stdout = self.run(&["jlist"]).await?;
        // pm2 偶尔会在 JSON 前输出 daemon 启动横幅，取最后一个 '[' 起始的片段
        let json = stdout
            .rfind("\n[")
            .map(|i| &stdout[i + 1..])
            .or_else(|| stdout.find('[').map(|i| &stdout[i..]))
            .unwrap_or("[]");

        let entries: Vec<Pm2ListEntry> = serde_json::from_str(json)
            .map_err(|e| FleetError::Supervisor(format!("failed to parse pm2 jlist: {}", e)))?;

        Ok(entries.into_iter().map(Pm2ListEntry::into_description).collect())
    }

    /// 把启动选项展开成 pm2 start 的命令行参数
    fn start_args(options: &AgentProcessOptions) -> Vec<String> {
        let mut args = vec![
            "start".to_string(),
            options.script.clone(),
            "--name".to_string(),
            options.name.clone(),
            "--max-restarts".to_string(),
            options.max_restarts.to_string(),
            "--restart-delay".to_string(),
            options.restart_delay_ms.to_string(),
            "--kill-timeout".to_string(),
            options.kill_timeout_ms.to_string(),
        ];

        if let Some(interpreter) = &options.interpreter {
            args.push("--interpreter".to_string());
            args.push(interpreter.clone());
        }
        if let Some(cwd) = &options.cwd {
            args.push("--cwd".to_string());
            args.push(cwd.clone());
        }
        if options.exec_mode == ExecMode::Cluster {
            // pm2 用 -i 隐式进入 cluster 模式
            args.push("-i".to_string());
            args.push(
                options
                    .instances
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "max".to_string()),
            );
        } else if let Some(instances) = options.instances {
            if instances > 1 {
                args.push("-i".to_string());
                args.push(instances.to_string());
            }
        }
        if !options.autorestart {
            args.push("--no-autorestart".to_string());
        }
        if let Some(limit) = &options.max_memory_restart {
            args.push("--max-memory-restart".to_string());
            args.push(limit.clone());
        }
        match &options.watch {
            WatchMode::Enabled(true) => args.push("--watch".to_string()),
            WatchMode::Paths(paths) if !paths.is_empty() => {
                args.push("--watch".to_string());
                for path in paths {
                    args.push(path.clone());
                }
            }
            _ => {}
        }

        args
    }

    /// 存在性检查失败时按 NotFound 处理
    async fn require_registered(&self, name: &str) -> Result<()> {
        let found = self.describe(name).await?;
        if found.is_empty() {
            return Err(FleetError::NotFound(name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessManager for Pm2Manager {
    async fn start(&self, options: &AgentProcessOptions) -> Result<Vec<ProcessDescription>> {
        // 重名启动是调用方错误，幂等路径应走 ensure
        if !self.describe(&options.name).await?.is_empty() {
            return Err(FleetError::StartFailed(format!(
                "process name already registered: {}",
                options.name
            )));
        }

        let args = Self::start_args(options);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self
            .command()
            .args(&arg_refs)
            .envs(&options.env)
            .output()
            .await
            .map_err(|e| FleetError::Supervisor(format!("failed to run pm2: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::StartFailed(stderr.trim().to_string()));
        }

        let described = self.describe(&options.name).await?;
        if described.is_empty() {
            warn!(name = %options.name, "pm2 start succeeded but process not listed");
            return Err(FleetError::StartFailed(format!(
                "process {} not registered after start",
                options.name
            )));
        }
        Ok(described)
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.require_registered(name).await?;
        self.run(&["stop", name]).await?;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.require_registered(name).await?;
        self.run(&["restart", name]).await?;
        Ok(())
    }

    async fn reload(&self, name: &str) -> Result<()> {
        self.require_registered(name).await?;
        self.run(&["reload", name]).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.require_registered(name).await?;
        self.run(&["delete", name]).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProcessDescription>> {
        self.jlist().await
    }

    async fn describe(&self, name: &str) -> Result<Vec<ProcessDescription>> {
        // pm2 describe 没有稳定的 JSON 输出，这里用 jlist 过滤
        let all = self.jlist().await?;
        Ok(all.into_iter().filter(|d| d.name == name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_options() -> AgentProcessOptions {
        let mut opts = AgentProcessOptions::new("svc-a", "boot.js");
        opts.interpreter = Some("node".to_string());
        opts.cwd = Some("/srv/svc-a".to_string());
        opts.max_memory_restart = Some("500M".to_string());
        opts
    }

    #[test]
    fn test_start_args_fork_defaults() {
        let args = Pm2Manager::start_args(&sample_options());
        assert_eq!(args[0], "start");
        assert_eq!(args[1], "boot.js");
        assert!(args.windows(2).any(|w| w == ["--name", "svc-a"]));
        assert!(args.windows(2).any(|w| w == ["--max-restarts", "10"]));
        assert!(args.windows(2).any(|w| w == ["--restart-delay", "1000"]));
        assert!(args.windows(2).any(|w| w == ["--kill-timeout", "5000"]));
        assert!(args.windows(2).any(|w| w == ["--max-memory-restart", "500M"]));
        assert!(!args.contains(&"-i".to_string()));
        assert!(!args.contains(&"--no-autorestart".to_string()));
    }

    #[test]
    fn test_start_args_cluster_and_no_autorestart() {
        let mut opts = sample_options();
        opts.exec_mode = ExecMode::Cluster;
        opts.instances = Some(4);
        opts.autorestart = false;
        let args = Pm2Manager::start_args(&opts);
        assert!(args.windows(2).any(|w| w == ["-i", "4"]));
        assert!(args.contains(&"--no-autorestart".to_string()));
    }

    #[test]
    fn test_start_args_watch_paths() {
        let mut opts = sample_options();
        opts.watch = WatchMode::Paths(vec!["src".to_string(), "config".to_string()]);
        let args = Pm2Manager::start_args(&opts);
        let pos = args.iter().position(|a| a == "--watch").unwrap();
        assert_eq!(args[pos + 1], "src");
        assert_eq!(args[pos + 2], "config");
    }

    #[test]
    fn test_jlist_entry_mapping() {
        let raw = r#"{
            "name": "svc-a",
            "pid": 4242,
            "pm_id": 0,
            "monit": {"memory": 52428800, "cpu": 1.5},
            "pm2_env": {
                "status": "online",
                "restart_time": 3,
                "pm_uptime": 1700000000000,
                "pm_exec_path": "/srv/svc-a/boot.js",
                "pm_cwd": "/srv/svc-a",
                "exec_mode": "fork_mode",
                "env": {"AGENT_NAME": "svc-a", "PM2_USAGE": {"nested": true}}
            }
        }"#;
        let entry: Pm2ListEntry = serde_json::from_str(raw).unwrap();
        let desc = entry.into_description();
        assert_eq!(desc.name, "svc-a");
        assert_eq!(desc.pid, Some(4242));
        assert_eq!(desc.status(), ProcessStatus::Online);
        assert_eq!(desc.env.restart_count, 3);
        assert_eq!(desc.monit.memory, 52428800);
        // 非字符串环境值被丢弃
        assert_eq!(desc.env.env.get("AGENT_NAME").unwrap(), "svc-a");
        assert!(!desc.env.env.contains_key("PM2_USAGE"));
    }
}
