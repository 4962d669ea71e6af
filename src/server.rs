//! Agent 控制平面 - 每个受管进程内置的 HTTP 端点
//!
//! 提供 `/health`、`/status`、`/` 三个内置路由和任意注册路由，
//! 可选 Bearer token 鉴权。请求分发优先级（高到低）：
//! 鉴权 → 内置路由 → 注册路由 → 404。
//! 用户 handler 的错误被捕获转成 500，服务器本身不会因此崩溃。

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{FleetError, Result};

/// 子服务状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

/// Agent 运行时状态
///
/// 由宿主 agent 注册的 status provider 按需提供，
/// 服务器只做转发，自己从不计算。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub services: HashMap<String, ServiceStatus>,
}

/// 状态提供者能力接口
///
/// `/status` 和 `/health` 的唯一事实来源；未注册 provider 是合法状态
/// （`/status` 返回 503，`/health` 默认健康）。
pub trait StatusProvider: Send + Sync {
    fn provide(&self) -> AgentStatus;
}

impl<F> StatusProvider for F
where
    F: Fn() -> AgentStatus + Send + Sync,
{
    fn provide(&self) -> AgentStatus {
        self()
    }
}

/// 控制平面配置，构造后不可变
#[derive(Debug, Clone)]
pub struct AgentServerConfig {
    /// 监听端口（0 表示由系统分配）
    pub port: u16,
    /// 监听地址
    pub hostname: String,
    /// Bearer token；None 表示不鉴权
    pub api_token: Option<String>,
    /// 免鉴权路径
    pub public_paths: Vec<String>,
}

impl AgentServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            hostname: "localhost".to_string(),
            api_token: None,
            public_paths: vec!["/".to_string(), "/health".to_string()],
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>>;
type RouteHandler = Arc<dyn Fn(Bytes) -> HandlerFuture + Send + Sync>;

struct ServerState {
    config: AgentServerConfig,
    routes: HashMap<(Method, String), RouteHandler>,
    route_names: Vec<String>,
    status_provider: Option<Arc<dyn StatusProvider>>,
}

/// Agent 控制平面服务器
pub struct AgentServer {
    config: AgentServerConfig,
    routes: HashMap<(Method, String), RouteHandler>,
    status_provider: Option<Arc<dyn StatusProvider>>,
    serve_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl AgentServer {
    pub fn new(config: AgentServerConfig) -> Self {
        Self {
            config,
            routes: HashMap::new(),
            status_provider: None,
            serve_task: None,
            local_addr: None,
        }
    }

    /// 注册自定义路由（按 method + path 精确匹配）
    ///
    /// 相同 (method, path) 重复注册时后注册者生效（last-wins，见测试）。
    /// 必须在 `start()` 之前调用。
    pub fn add_route<F, Fut>(&mut self, method: Method, path: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        let path = path.into();
        let wrapped: RouteHandler = Arc::new(move |body| {
            let fut: HandlerFuture = Box::pin(handler(body));
            fut
        });
        let previous = self.routes.insert((method.clone(), path.clone()), wrapped);
        if previous.is_some() {
            warn!(%method, %path, "route re-registered, last registration wins");
        }
    }

    /// 注册状态提供者
    pub fn set_status_provider(&mut self, provider: impl StatusProvider + 'static) {
        self.status_provider = Some(Arc::new(provider));
    }

    /// 绑定端口并开始服务，返回实际监听地址
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.serve_task.is_some() {
            return Err(FleetError::Supervisor(
                "agent server already started".to_string(),
            ));
        }

        let mut route_names: Vec<String> = vec![
            "GET /".to_string(),
            "GET /health".to_string(),
            "GET /status".to_string(),
        ];
        let mut custom: Vec<String> = self
            .routes
            .keys()
            .map(|(method, path)| format!("{} {}", method, path))
            .collect();
        custom.sort();
        route_names.extend(custom);

        let state = Arc::new(ServerState {
            config: self.config.clone(),
            routes: self.routes.clone(),
            route_names,
            status_provider: self.status_provider.clone(),
        });

        let app = Router::new().fallback(dispatch).with_state(state);

        let listener = TcpListener::bind((self.config.hostname.as_str(), self.config.port))
            .await
            .map_err(|e| {
                FleetError::Supervisor(format!(
                    "failed to bind {}:{}: {}",
                    self.config.hostname, self.config.port, e
                ))
            })?;
        let addr = listener.local_addr()?;

        info!(%addr, "agent control plane listening");
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "agent control plane exited");
            }
        });

        self.serve_task = Some(task);
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// 实际监听地址（start 之后可用）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 立即关闭监听 socket
    ///
    /// 有意不做优雅排空：进行中的连接会被直接掐断（文档化的取舍）。
    pub fn stop(&mut self) {
        if let Some(task) = self.serve_task.take() {
            task.abort();
            info!("agent control plane stopped");
        }
        self.local_addr = None;
    }
}

impl Drop for AgentServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// 统一分发入口，实现文档化的优先级顺序
async fn dispatch(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();

    // 1. 鉴权：配了 token 且路径不在 public_paths 时要求 Bearer
    if let Some(token) = &state.config.api_token {
        if !state.config.public_paths.iter().any(|p| p == &path) {
            let expected = format!("Bearer {}", token);
            let authorized = headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(|v| v == expected)
                .unwrap_or(false);
            if !authorized {
                return json_error(StatusCode::UNAUTHORIZED, "Unauthorized");
            }
        }
    }

    // 2. 内置路由
    if method == Method::GET {
        match path.as_str() {
            "/health" => {
                // 没有 provider 时默认健康
                let running = state
                    .status_provider
                    .as_ref()
                    .map(|p| p.provide().running)
                    .unwrap_or(true);
                let status = if running {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                let body = json!({
                    "healthy": running,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                });
                return (status, Json(body)).into_response();
            }
            "/status" => {
                return match &state.status_provider {
                    Some(provider) => Json(provider.provide()).into_response(),
                    None => json_error(StatusCode::SERVICE_UNAVAILABLE, "Status not available"),
                };
            }
            "/" => {
                let body = json!({
                    "runtime": "agent-fleet-manager",
                    "version": env!("CARGO_PKG_VERSION"),
                    "routes": state.route_names,
                });
                return Json(body).into_response();
            }
            _ => {}
        }
    }

    // 3. 注册路由（method + path 精确匹配）
    if let Some(handler) = state.routes.get(&(method, path)) {
        return match handler(body).await {
            Ok(value) => Json(value).into_response(),
            Err(e) => {
                warn!(error = %e, "route handler failed");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        };
    }

    // 4. 兜底
    json_error(StatusCode::NOT_FOUND, "Not found")
}
