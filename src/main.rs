//! Agent Fleet Manager CLI
//!
//! 管理长驻 AI agent 进程：启动、停止、重启、幂等 ensure、状态查询，
//! 以及会话开始/结束时的 daemon 探测与 fallback 同步。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use agent_fleet_manager::{
    cli::format_output,
    config, daemon,
    daemon::{DaemonClient, SessionStartOptions},
    error::FleetError,
    supervisor::{Pm2Manager, ProcessSupervisor},
};

#[derive(Parser)]
#[command(name = "afm")]
#[command(about = "Agent Fleet Manager - 管理长驻 AI agent 进程")]
#[command(version)]
struct Cli {
    /// 使用私有的进程管理器实例（不接入系统级 daemon）
    #[arg(long, global = true)]
    standalone: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 从配置目录启动 agent（重名报错，幂等启动用 ensure）
    Start {
        /// 包含 agent.config.json / agent.json 的目录
        dir: PathBuf,
        /// entrypoint 缺省时使用的 boot 脚本
        #[arg(long, default_value = "boot.js")]
        boot_script: PathBuf,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 幂等启动：不存在则启动，在线则不动，掉线则复活
    Ensure {
        /// 包含 agent.config.json / agent.json 的目录
        dir: PathBuf,
        /// entrypoint 缺省时使用的 boot 脚本
        #[arg(long, default_value = "boot.js")]
        boot_script: PathBuf,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 停止 agent（保留注册项）
    Stop {
        /// 进程名称
        name: String,
    },
    /// 重启 agent
    Restart {
        /// 进程名称
        name: String,
    },
    /// 零停机滚动重启（仅 cluster 模式）
    Reload {
        /// 进程名称
        name: String,
    },
    /// 幂等移除：在线先停再删，不存在则无操作
    Remove {
        /// 进程名称
        name: String,
    },
    /// 列出所有受管进程
    List {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 查询指定进程的状态
    Status {
        /// 进程名称
        name: String,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 显式触发 daemon 同步
    Sync {
        #[arg(long, default_value = daemon::DEFAULT_DAEMON_HOST)]
        host: String,
        #[arg(long, default_value_t = daemon::DEFAULT_DAEMON_PORT)]
        port: u16,
    },
    /// 会话开始钩子：探测 daemon，必要时 fallback 同步并加载本地状态
    SessionStart {
        #[arg(long, default_value = daemon::DEFAULT_DAEMON_HOST)]
        host: String,
        #[arg(long, default_value_t = daemon::DEFAULT_DAEMON_PORT)]
        port: u16,
        /// 记忆文档与日志所在目录
        #[arg(long, default_value = ".")]
        base_path: PathBuf,
        /// 禁用 fallback 同步
        #[arg(long)]
        no_fallback: bool,
        /// fallback 同步命令（argv 形式）
        #[arg(long = "sync-command", num_args = 1.., allow_hyphen_values = true)]
        sync_command: Vec<String>,
    },
    /// 会话结束钩子：daemon 健在则同步已由它负责
    SessionEnd {
        #[arg(long, default_value = daemon::DEFAULT_DAEMON_HOST)]
        host: String,
        #[arg(long, default_value_t = daemon::DEFAULT_DAEMON_PORT)]
        port: u16,
    },
}

/// 创建已连接的 pm2 supervisor
fn connect_supervisor(standalone: bool) -> Result<ProcessSupervisor<Pm2Manager>> {
    let manager = Pm2Manager::new(standalone)?;
    let mut supervisor = ProcessSupervisor::new(manager);
    supervisor.connect(standalone);
    Ok(supervisor)
}

/// stop/restart 对不存在的进程按"无事可做"处理，其余错误照常上抛
fn report_lifecycle(result: agent_fleet_manager::Result<()>, name: &str, action: &str) -> Result<()> {
    match result {
        Ok(()) => {
            println!("{} {}", action, name);
            Ok(())
        }
        Err(FleetError::NotFound(_)) => {
            println!("进程 {} 不存在，无需{}", name, action);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化 tracing 日志系统
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=debug afm list
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_fleet_manager=info,afm=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let standalone = cli.standalone;

    match cli.command {
        Commands::Start {
            dir,
            boot_script,
            json,
        } => {
            let definition = config::load_config(&dir)?;
            let options = config::to_process_options(&definition, &boot_script, &dir);
            let supervisor = connect_supervisor(standalone)?;
            let started = supervisor.start(&options).await?;

            if json {
                println!("{}", format_output(&started));
            } else {
                for desc in &started {
                    println!("{}", supervisor.format_status(desc));
                }
            }
        }
        Commands::Ensure {
            dir,
            boot_script,
            json,
        } => {
            let definition = config::load_config(&dir)?;
            let options = config::to_process_options(&definition, &boot_script, &dir);
            let supervisor = connect_supervisor(standalone)?;
            let desc = supervisor.ensure(&options).await?;

            if json {
                println!("{}", format_output(&desc));
            } else {
                println!("{}", supervisor.format_status(&desc));
            }
        }
        Commands::Stop { name } => {
            let supervisor = connect_supervisor(standalone)?;
            report_lifecycle(supervisor.stop(&name).await, &name, "停止")?;
        }
        Commands::Restart { name } => {
            let supervisor = connect_supervisor(standalone)?;
            report_lifecycle(supervisor.restart(&name).await, &name, "重启")?;
        }
        Commands::Reload { name } => {
            let supervisor = connect_supervisor(standalone)?;
            supervisor.reload(&name).await?;
            println!("已滚动重启 {}", name);
        }
        Commands::Remove { name } => {
            let supervisor = connect_supervisor(standalone)?;
            supervisor.remove(&name).await?;
            println!("已移除 {}", name);
        }
        Commands::List { json } => {
            let supervisor = connect_supervisor(standalone)?;
            let processes = supervisor.list().await?;

            if json {
                println!("{}", format_output(&processes));
            } else {
                println!("共 {} 个受管进程:\n", processes.len());
                for desc in &processes {
                    println!("  {}", supervisor.format_status(desc));
                }
            }
        }
        Commands::Status { name, json } => {
            let supervisor = connect_supervisor(standalone)?;
            match supervisor.get(&name).await {
                Some(desc) => {
                    if json {
                        println!("{}", format_output(&desc));
                    } else {
                        println!("{}", supervisor.format_status(&desc));
                    }
                }
                None => eprintln!("进程 {} 不存在", name),
            }
        }
        Commands::Sync { host, port } => {
            let client = DaemonClient::new();
            let result = client
                .trigger_daemon_sync(&host, port, daemon::DEFAULT_SYNC_TIMEOUT_MS)
                .await?;
            println!("{}", format_output(&result));
        }
        Commands::SessionStart {
            host,
            port,
            base_path,
            no_fallback,
            sync_command,
        } => {
            let options = SessionStartOptions {
                host,
                port,
                use_fallback: !no_fallback,
                base_path,
                sync_command,
            };
            let result = daemon::handle_session_start(&options).await?;
            println!("{}", format_output(&result));
        }
        Commands::SessionEnd { host, port } => {
            let result = daemon::handle_session_end(&host, port).await;
            println!("{}", format_output(&result));
        }
    }

    Ok(())
}
