//! End-to-end execution scenarios
//!
//! These require a Docker daemon plus the isol8 base images (build them
//! with `ImageBuilder::build_all`), so they are ignored by default:
//!
//! ```sh
//! cargo test --test engine -- --ignored
//! ```

use std::collections::HashMap;
use std::time::Instant;

use isol8::config::{EngineOptions, NetworkFilter, NetworkMode};
use isol8::engine::{Engine, Executor};
use isol8::models::{ExecutionRequest, PolicyAction, StreamEvent};

async fn engine(options: EngineOptions) -> Engine {
    Engine::new(options).await.expect("docker daemon reachable")
}

fn python(code: &str) -> ExecutionRequest {
    ExecutionRequest::new(code, "python")
}

#[tokio::test]
#[ignore] // Requires Docker and the isol8 base images
async fn test_basic_python_execution() {
    let engine = engine(EngineOptions::default()).await;

    let result = engine.execute(python("print(1+1)")).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains('2'));
    assert!(!result.truncated);

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_timeout_kills_and_marks() {
    let engine = engine(EngineOptions::default()).await;

    let mut req = python("import time; time.sleep(5)");
    req.timeout_ms = 1_000;

    let started = Instant::now();
    let result = engine.execute(req).await.unwrap();

    assert!(started.elapsed().as_secs() < 5);
    assert_ne!(result.exit_code, 0);
    assert_eq!(result.exit_code, 137);
    assert!(result.stderr.contains("EXECUTION TIMED OUT"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_oom_is_nonzero_exit_without_timeout_marker() {
    let engine = engine(EngineOptions::default()).await;

    let mut req = python("x = 'a' * 1024 * 1024 * 100");
    req.memory_limit = Some("32m".to_string());

    let result = engine.execute(req).await.unwrap();
    assert_ne!(result.exit_code, 0);
    assert!(!result.stderr.contains("EXECUTION TIMED OUT"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_consecutive_executions_do_not_share_sandbox() {
    let engine = engine(EngineOptions::default()).await;

    let write = python("open('/sandbox/secret.txt', 'w').write('leak')");
    assert_eq!(engine.execute(write).await.unwrap().exit_code, 0);

    let check = python("import os; print(os.path.exists('/sandbox/secret.txt'))");
    let result = engine.execute(check).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains("False"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_background_processes_do_not_survive() {
    let engine = engine(EngineOptions::default()).await;

    let spawn = python(
        "import subprocess; subprocess.Popen(['sleep', '600']); print('spawned')",
    );
    assert_eq!(engine.execute(spawn).await.unwrap().exit_code, 0);

    let check = python(
        "import subprocess; out = subprocess.run(['ps', '-o', 'comm='], capture_output=True, text=True).stdout; print('sleep' in out)",
    );
    let result = engine.execute(check).await.unwrap();
    assert!(result.stdout.contains("False"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_network_none_blocks_connect() {
    let engine = engine(EngineOptions::default()).await;

    let req = python(
        "import socket\ns = socket.socket()\ns.settimeout(3)\ntry:\n    s.connect(('1.1.1.1', 80))\n    print('connected')\nexcept OSError:\n    print('blocked')",
    );
    let result = engine.execute(req).await.unwrap();
    assert!(result.stdout.contains("blocked"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker and a proxy-enabled image
async fn test_filtered_blacklist_blocks_and_logs() {
    let mut options = EngineOptions::default();
    options.network = NetworkMode::Filtered;
    options.network_filter = NetworkFilter {
        whitelist: vec![],
        blacklist: vec![r"^example\.com$".to_string()],
    };
    options.log_network = true;
    let engine = engine(options).await;

    let req = python(
        "import urllib.request\ntry:\n    urllib.request.urlopen('http://example.com/', timeout=10)\nexcept Exception as e:\n    print(e)",
    );
    let result = engine.execute(req).await.unwrap();
    assert!(result.stdout.contains("403"));

    let logs = result.network_logs.expect("filtered + logNetwork");
    let blocked: Vec<_> = logs
        .iter()
        .filter(|entry| entry.host == "example.com")
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].action, PolicyAction::Block);
    assert_eq!(blocked[0].method, "GET");
    assert_eq!(blocked[0].path.as_deref(), Some("/"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_secret_values_are_masked() {
    let engine = engine(EngineOptions::default()).await;

    let mut req = python("import os; print(os.environ['K'])");
    req.secrets = HashMap::from([("K".to_string(), "my-super-secret-12345".to_string())]);

    let result = engine.execute(req).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains("***"));
    assert!(!result.stdout.contains("my-super-secret-12345"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_stdin_is_piped() {
    let engine = engine(EngineOptions::default()).await;

    let mut req = python("import sys; print(sys.stdin.read().upper())");
    req.stdin = Some(b"hello".to_vec());

    let result = engine.execute(req).await.unwrap();
    assert!(result.stdout.contains("HELLO"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_stream_matches_collected_output() {
    let engine = engine(EngineOptions::default()).await;

    let code = "for i in range(5): print(i)";
    let mut rx = engine.execute_stream(python(code)).await.unwrap();

    let mut stdout = String::new();
    let mut exit_code = None;
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Stdout(chunk) => stdout.push_str(&chunk),
            StreamEvent::Stderr(_) => {}
            StreamEvent::Exit(code) => {
                exit_code = Some(code);
                break;
            }
        }
    }

    assert_eq!(exit_code, Some(0));
    let collected = engine.execute(python(code)).await.unwrap();
    assert_eq!(stdout, collected.stdout);

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_injected_files_are_visible() {
    let engine = engine(EngineOptions::default()).await;

    let mut req = python("print(open('/sandbox/data/input.txt').read())");
    req.files = HashMap::from([(
        "/sandbox/data/input.txt".to_string(),
        b"from the outside".to_vec(),
    )]);

    let result = engine.execute(req).await.unwrap();
    assert!(result.stdout.contains("from the outside"));

    engine.stop().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_output_truncation_sets_flag() {
    let mut options = EngineOptions::default();
    options.max_output_bytes = 1024;
    let engine = engine(options).await;

    let result = engine
        .execute(python("print('x' * 10000)"))
        .await
        .unwrap();
    assert!(result.truncated);
    assert!(result.stdout.contains("[output truncated]"));
    assert!(result.stdout.len() <= 1024 + "\n[output truncated]".len());

    engine.stop().await;
}
