use agent_fleet_manager::{AgentServer, AgentServerConfig, AgentStatus};
use axum::http::Method;
use serde_json::json;
use std::collections::HashMap;

fn running_status() -> AgentStatus {
    AgentStatus {
        name: "svc-a".to_string(),
        running: true,
        pid: Some(4242),
        uptime_ms: Some(12_000),
        started_at: Some(chrono::Utc::now()),
        services: HashMap::new(),
    }
}

async fn started(mut server: AgentServer) -> (AgentServer, String) {
    let addr = server.start().await.unwrap();
    (server, format!("http://{}", addr))
}

#[tokio::test]
async fn test_health_default_healthy_without_provider() {
    let (server, base) = started(AgentServer::new(AgentServerConfig::new(0))).await;

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["healthy"], json!(true));
    assert!(body["timestamp"].is_string());

    drop(server);
}

#[tokio::test]
async fn test_status_503_before_provider_then_healthy() {
    let (server, base) = started(AgentServer::new(AgentServerConfig::new(0))).await;

    let resp = reqwest::get(format!("{}/status", base)).await.unwrap();
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
    drop(server);

    // 注册 provider 之后 /health 和 /status 都反映它
    let mut server = AgentServer::new(AgentServerConfig::new(0));
    server.set_status_provider(running_status);
    let (server, base) = started(server).await;

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["healthy"], json!(true));

    let resp = reqwest::get(format!("{}/status", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let status: AgentStatus = resp.json().await.unwrap();
    assert_eq!(status.name, "svc-a");
    assert!(status.running);

    drop(server);
}

#[tokio::test]
async fn test_health_503_when_not_running() {
    let mut server = AgentServer::new(AgentServerConfig::new(0));
    server.set_status_provider(|| AgentStatus {
        running: false,
        ..running_status()
    });
    let (server, base) = started(server).await;

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["healthy"], json!(false));

    drop(server);
}

#[tokio::test]
async fn test_root_lists_builtin_and_custom_routes() {
    let mut server = AgentServer::new(AgentServerConfig::new(0));
    server.add_route(Method::GET, "/data", |_| async { Ok(json!({"ok": true})) });
    let (server, base) = started(server).await;

    let resp = reqwest::get(format!("{}/", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["runtime"], json!("agent-fleet-manager"));
    assert!(body["version"].is_string());
    let routes: Vec<String> = serde_json::from_value(body["routes"].clone()).unwrap();
    assert!(routes.contains(&"GET /health".to_string()));
    assert!(routes.contains(&"GET /status".to_string()));
    assert!(routes.contains(&"GET /data".to_string()));

    drop(server);
}

#[tokio::test]
async fn test_bearer_auth_on_non_public_paths() {
    let mut config = AgentServerConfig::new(0);
    config.api_token = Some("secret".to_string());
    let mut server = AgentServer::new(config);
    server.add_route(Method::GET, "/data", |_| async { Ok(json!({"value": 7})) });
    let (server, base) = started(server).await;

    let client = reqwest::Client::new();

    // 无 Authorization 头 → 401
    let resp = client.get(format!("{}/data", base)).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], json!("Unauthorized"));

    // 错误 token → 401
    let resp = client
        .get(format!("{}/data", base))
        .header("Authorization", "Bearer wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // 正确 token → 到达 handler
    let resp = client
        .get(format!("{}/data", base))
        .header("Authorization", "Bearer secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["value"], json!(7));

    // public paths 免鉴权
    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client.get(format!("{}/", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    // /status 不在默认 public_paths 里
    let resp = client.get(format!("{}/status", base)).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    drop(server);
}

#[tokio::test]
async fn test_unmatched_route_404() {
    let (server, base) = started(AgentServer::new(AgentServerConfig::new(0))).await;

    let resp = reqwest::get(format!("{}/nope", base)).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], json!("Not found"));

    // 内置路径只匹配 GET
    let client = reqwest::Client::new();
    let resp = client.post(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    drop(server);
}

#[tokio::test]
async fn test_handler_error_becomes_500() {
    let mut server = AgentServer::new(AgentServerConfig::new(0));
    server.add_route(Method::GET, "/boom", |_| async {
        anyhow::bail!("handler exploded")
    });
    let (server, base) = started(server).await;

    let resp = reqwest::get(format!("{}/boom", base)).await.unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("handler exploded"));

    // handler 崩了服务器还活着
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);

    drop(server);
}

#[tokio::test]
async fn test_duplicate_route_last_wins() {
    let mut server = AgentServer::new(AgentServerConfig::new(0));
    server.add_route(Method::GET, "/data", |_| async { Ok(json!({"version": 1})) });
    server.add_route(Method::GET, "/data", |_| async { Ok(json!({"version": 2})) });
    let (server, base) = started(server).await;

    let resp = reqwest::get(format!("{}/data", base)).await.unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["version"], json!(2));

    drop(server);
}

#[tokio::test]
async fn test_custom_post_route_receives_body() {
    let mut server = AgentServer::new(AgentServerConfig::new(0));
    server.add_route(Method::POST, "/echo", |body| async move {
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        Ok(json!({ "echo": value }))
    });
    let (server, base) = started(server).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/echo", base))
        .json(&json!({"hello": "fleet"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["echo"]["hello"], json!("fleet"));

    drop(server);
}

#[tokio::test]
async fn test_stop_releases_listener() {
    let mut server = AgentServer::new(AgentServerConfig::new(0));
    let addr = server.start().await.unwrap();
    server.stop();

    // 关闭后连接被拒绝
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let result = reqwest::Client::new()
        .get(format!("http://{}/health", addr))
        .timeout(std::time::Duration::from_millis(500))
        .send()
        .await;
    assert!(result.is_err());
}
