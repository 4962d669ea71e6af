use agent_fleet_manager::{
    AgentProcessOptions, ExecMode, FleetError, MockManager, ProcessStatus, ProcessSupervisor,
};

fn connected_pair() -> (MockManager, ProcessSupervisor<MockManager>) {
    let manager = MockManager::new();
    let mut supervisor = ProcessSupervisor::new(manager.clone());
    supervisor.connect(true);
    (manager, supervisor)
}

#[tokio::test]
async fn test_full_lifecycle_workflow() {
    let (_, supervisor) = connected_pair();

    // 1. 启动
    let opts = AgentProcessOptions::new("svc-a", "boot.js");
    let started = supervisor.start(&opts).await.unwrap();
    assert!(matches!(
        started[0].status(),
        ProcessStatus::Launching | ProcessStatus::Online
    ));

    // 2. describe 能看到
    let described = supervisor.describe("svc-a").await.unwrap();
    assert!(described.iter().any(|d| d.name == "svc-a"));

    // 3. 停止后不在线但仍注册
    supervisor.stop("svc-a").await.unwrap();
    assert!(!supervisor.is_running("svc-a").await);
    assert!(!supervisor.describe("svc-a").await.unwrap().is_empty());

    // 4. 重启恢复在线
    supervisor.restart("svc-a").await.unwrap();
    assert!(supervisor.is_running("svc-a").await);

    // 5. 移除后彻底消失
    supervisor.remove("svc-a").await.unwrap();
    assert!(supervisor.describe("svc-a").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ensure_is_idempotent_across_fleet() {
    let (manager, supervisor) = connected_pair();

    for name in ["svc-a", "svc-b", "svc-c"] {
        let opts = AgentProcessOptions::new(name, "boot.js");
        supervisor.ensure(&opts).await.unwrap();
        supervisor.ensure(&opts).await.unwrap();
    }

    assert_eq!(supervisor.list().await.unwrap().len(), 3);
    assert_eq!(manager.restart_calls(), 0);
}

#[tokio::test]
async fn test_ensure_revives_instead_of_duplicating() {
    let (manager, supervisor) = connected_pair();

    let opts = AgentProcessOptions::new("svc-a", "boot.js");
    supervisor.ensure(&opts).await.unwrap();
    manager.set_status("svc-a", ProcessStatus::Stopped).await;

    let revived = supervisor.ensure(&opts).await.unwrap();
    assert!(revived.is_online());
    assert_eq!(supervisor.list().await.unwrap().len(), 1);
    assert_eq!(manager.restart_calls(), 1);
}

#[tokio::test]
async fn test_remove_absent_is_noop() {
    let (_, supervisor) = connected_pair();
    supervisor.remove("ghost").await.unwrap();
    supervisor.remove("ghost").await.unwrap();
}

#[tokio::test]
async fn test_reload_mode_guard() {
    let (_, supervisor) = connected_pair();

    let fork = AgentProcessOptions::new("fork-svc", "boot.js");
    supervisor.start(&fork).await.unwrap();
    assert!(matches!(
        supervisor.reload("fork-svc").await.unwrap_err(),
        FleetError::UnsupportedMode(_)
    ));

    let mut cluster = AgentProcessOptions::new("cluster-svc", "boot.js");
    cluster.exec_mode = ExecMode::Cluster;
    cluster.instances = Some(2);
    supervisor.start(&cluster).await.unwrap();
    supervisor.reload("cluster-svc").await.unwrap();
}

#[tokio::test]
async fn test_uptime_resets_after_restart() {
    let (_, supervisor) = connected_pair();

    let opts = AgentProcessOptions::new("svc-a", "boot.js");
    supervisor.start(&opts).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let before = supervisor.get("svc-a").await.unwrap();
    assert!(supervisor.get_uptime(&before) >= 50);

    supervisor.restart("svc-a").await.unwrap();
    let after = supervisor.get("svc-a").await.unwrap();
    // 重启后 uptime 回落到接近零
    assert!(supervisor.get_uptime(&after) < 50);
}

#[tokio::test]
async fn test_disconnect_blocks_operations() {
    let (_, mut supervisor) = connected_pair();
    let opts = AgentProcessOptions::new("svc-a", "boot.js");
    supervisor.start(&opts).await.unwrap();

    supervisor.disconnect();
    assert!(matches!(
        supervisor.list().await.unwrap_err(),
        FleetError::NotConnected
    ));
    // disconnect 不停止受管进程
    supervisor.connect(true);
    assert!(supervisor.is_running("svc-a").await);
}
