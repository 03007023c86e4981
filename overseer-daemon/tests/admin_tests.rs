use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use overseer_core::config::{ProcessConfig, SupervisorConfig};
use overseer_core::provider::ConfigProvider;
use overseer_daemon::{Supervisord, build_router};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn proc_config(name: &str, command: &str, args: &[&str]) -> ProcessConfig {
    ProcessConfig {
        name: name.into(),
        command: command.into(),
        args: args.iter().map(|s| s.to_string()).collect(),
        stdout: vec!["/dev/null".into()],
        stderr: vec!["/dev/null".into()],
        ..Default::default()
    }
}

fn setup(cnf: &SupervisorConfig) -> (Arc<Supervisord>, Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("supervisord.conf");
    std::fs::write(&file, cnf.to_toml().unwrap()).unwrap();
    let provider = Arc::new(ConfigProvider::from_file(&file, true).unwrap());
    let sup = Supervisord::new(provider);
    let router = build_router(sup.clone());
    (sup, router, dir)
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_json_empty_table() {
    let (_sup, router, _dir) = setup(&SupervisorConfig::default());
    let resp = router
        .oneshot(Request::get("/status?format=json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "[]");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_unknown_process_is_an_error_envelope() {
    let (_sup, router, _dir) = setup(&SupervisorConfig::default());
    let resp = router
        .oneshot(Request::get("/start?name=ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body["code"], -1);
    assert!(body["message"].as_str().unwrap().contains("no exist"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_disabled_rce_is_unauthorized() {
    let cnf = SupervisorConfig {
        disable_rce: true,
        ..Default::default()
    };
    let (_sup, router, _dir) = setup(&cnf);
    let resp = router
        .oneshot(
            Request::post("/command")
                .body(Body::from("(println \"hi\")"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_evaluates_when_enabled() {
    let (_sup, router, _dir) = setup(&SupervisorConfig::default());
    let resp = router
        .oneshot(
            Request::post("/command?capture_stdout=true")
                .body(Body::from("echo hi"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await.trim(), "hi");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_add_process_validation() {
    let (_sup, router, _dir) = setup(&SupervisorConfig::default());

    let resp = router
        .clone()
        .oneshot(Request::post("/add_process").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("no body found"));

    let resp = router
        .clone()
        .oneshot(
            Request::post("/add_process")
                .body(Body::from(r#"{"command":"/bin/true"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("bad proc"));

    let resp = router
        .clone()
        .oneshot(
            Request::post("/add_process")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_add_process_then_status_shows_it() {
    let (_sup, router, _dir) = setup(&SupervisorConfig::default());
    let resp = router
        .clone()
        .oneshot(
            Request::post("/add_process")
                .body(Body::from(
                    r#"{"name":"t1","command":"/bin/sleep","args":["30"],"stdout":["/dev/null"]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body["code"], 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let resp = router
        .clone()
        .oneshot(Request::get("/status?format=json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let states: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(states[0]["config"]["name"], "t1");
    assert_eq!(states[0]["state"], "Running");

    let resp = router
        .oneshot(Request::get("/stop?name=t1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_all_and_text_status() {
    let cnf = SupervisorConfig {
        process: vec![proc_config("web", "/bin/sleep", &["30"])],
        ..Default::default()
    };
    let (sup, router, _dir) = setup(&cnf);

    let resp = router
        .clone()
        .oneshot(Request::get("/start?all=true").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await.trim(), "OK");

    let resp = router
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let table = body_text(resp).await;
    assert!(table.contains("name"));
    assert!(table.contains("web"));
    sup.stop_all().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_trips_stop_chan() {
    let (sup, router, _dir) = setup(&SupervisorConfig::default());
    let resp = router
        .oneshot(Request::get("/shutdown?now=true").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    tokio::time::timeout(Duration::from_secs(2), sup.stop_chan().stopped())
        .await
        .expect("shutdown endpoint must stop the coordinator");
}

// The single-instance probe: a second supervisor GETs /status on the
// configured dial address and treats success as "already running".
#[tokio::test(flavor = "multi_thread")]
async fn test_status_probe_over_network() {
    let (_sup, router, _dir) = setup(&SupervisorConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = overseer_http::AdminClient::new(overseer_http::AdminAddr::Tcp {
        bind_ip: "127.0.0.1".into(),
        port,
    });
    let body = client.get("/status").await.unwrap();
    assert!(body.contains("name"));
}
