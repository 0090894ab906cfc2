//! Reload behaviour of the supervisor against real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use signing_daemon::lifecycle::{control_channel, ConsoleChange, Supervisor, SupervisorError, SupervisorState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

use common::Fixture;

async fn start(fx: &Fixture) -> Supervisor {
    let vault = fx.vault(&[("gpg", "secret"), ("mar", "")]);
    Supervisor::start(&fx.config_path, vault, common::hash_pool())
        .await
        .expect("supervisor start")
}

async fn status_code(port: u16) -> Option<u16> {
    let res = common::client()
        .get(format!("http://127.0.0.1:{port}/status"))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .ok()?;
    Some(res.status().as_u16())
}

async fn refuses(port: u16) -> bool {
    TcpStream::connect(("127.0.0.1", port)).await.is_err()
}

#[tokio::test]
async fn unrelated_change_keeps_listener() {
    let fx = Fixture::new();
    fx.write_config(29110, None, "");
    let mut supervisor = start(&fx).await;
    let addr = supervisor.local_addr().unwrap();

    // Opened before the reload, used after it.
    let mut stream = TcpStream::connect(addr).await.unwrap();

    fx.write_config(29110, None, "request_timeout_secs = 60");
    let outcome = supervisor.reload().await.unwrap();

    assert!(!outcome.listener_replaced);
    assert_eq!(outcome.console, ConsoleChange::Unchanged);
    assert_eq!(supervisor.local_addr(), Some(addr));
    assert_eq!(supervisor.app().settings().request_timeout, Duration::from_secs(60));

    stream
        .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(response.starts_with(b"HTTP/1.1 200"), "in-flight connection should survive");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn port_change_moves_listener() {
    let fx = Fixture::new();
    fx.write_config(29120, None, "");
    let mut supervisor = start(&fx).await;
    assert_eq!(status_code(29120).await, Some(200));

    fx.write_config(29121, None, "");
    let outcome = supervisor.reload().await.unwrap();

    assert!(outcome.listener_replaced);
    assert_eq!(supervisor.local_addr().map(|a| a.port()), Some(29121));
    assert_eq!(supervisor.listen_key().map(|k| k.port), Some(29121));
    assert_eq!(status_code(29121).await, Some(200));
    assert!(refuses(29120).await, "old listener must be closed");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn broken_config_keeps_previous_listener() {
    let fx = Fixture::new();
    fx.write_config(29130, None, "");
    let mut supervisor = start(&fx).await;

    fx.write_broken_config();
    let err = supervisor.reload().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Config(_)));

    assert!(supervisor.is_accepting());
    assert_eq!(supervisor.state(), SupervisorState::Serving);
    assert_eq!(supervisor.failed_reloads(), 1);
    assert_eq!(supervisor.reloads(), 0);
    assert_eq!(status_code(29130).await, Some(200));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn unbindable_port_keeps_previous_listener() {
    let fx = Fixture::new();
    fx.write_config(29132, None, "");
    let mut supervisor = start(&fx).await;

    let _squatter = std::net::TcpListener::bind("127.0.0.1:29133").unwrap();
    fx.write_config(29133, None, "request_timeout_secs = 60");

    let err = supervisor.reload().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Listener(_)));

    // Nothing from the rejected configuration was applied.
    assert_eq!(supervisor.local_addr().map(|a| a.port()), Some(29132));
    assert_eq!(supervisor.app().settings().request_timeout, Duration::from_secs(300));
    assert_eq!(status_code(29132).await, Some(200));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn unbindable_console_abandons_whole_reload() {
    let fx = Fixture::new();
    fx.write_config(29170, None, "");
    let mut supervisor = start(&fx).await;

    // The new signing port is free but the new console port is taken.
    let _squatter = std::net::TcpListener::bind("127.0.0.1:29172").unwrap();
    fx.write_config(29171, Some(29172), "request_timeout_secs = 60");

    let err = supervisor.reload().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Listener(_)));
    assert_eq!(supervisor.failed_reloads(), 1);

    assert_eq!(supervisor.local_addr().map(|a| a.port()), Some(29170));
    assert_eq!(supervisor.console_addr(), None);
    assert_eq!(supervisor.app().settings().request_timeout, Duration::from_secs(300));
    assert_eq!(supervisor.app().config_loads(), 1);
    assert_eq!(status_code(29170).await, Some(200));
    assert!(refuses(29171).await, "prepared listener must be closed again");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn vault_survives_reloads() {
    let fx = Fixture::new();
    fx.write_config(29140, None, "");
    let vault = fx.vault(&[("gpg", "secret"), ("mar", "")]);
    let mut supervisor = Supervisor::start(&fx.config_path, Arc::clone(&vault), common::hash_pool())
        .await
        .unwrap();

    for round in 0..5u16 {
        fx.write_config(29140 + (round % 2) * 5, None, &format!("max_connections = {}", 10 + round));
        supervisor.reload().await.unwrap();
    }
    assert_eq!(supervisor.reloads(), 5);

    let app_vault = supervisor.app().vault();
    assert!(Arc::ptr_eq(app_vault, &vault));
    assert_eq!(app_vault.formats().collect::<Vec<_>>(), vec!["gpg", "mar"]);
    assert_eq!(
        app_vault.get("gpg").flatten().map(|s| s.expose_secret().to_string()),
        Some("secret".to_string())
    );
    assert!(matches!(app_vault.get("mar"), Some(None)));
    assert_eq!(supervisor.app().config_loads(), 6);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn console_follows_backdoor_port() {
    let fx = Fixture::new();
    fx.write_config(29150, None, "");
    let mut supervisor = start(&fx).await;
    assert_eq!(supervisor.console_addr(), None);

    fx.write_config(29150, Some(29151), "");
    let outcome = supervisor.reload().await.unwrap();
    assert_eq!(outcome.console, ConsoleChange::Started);
    assert!(!outcome.listener_replaced);

    let status: serde_json::Value = common::client()
        .get("http://127.0.0.1:29151/debug/status")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "serving");
    assert_eq!(status["reloads"], 1);
    assert_eq!(status["signing"]["key"]["port"], 29150);

    fx.write_config(29150, Some(29152), "");
    assert_eq!(supervisor.reload().await.unwrap().console, ConsoleChange::Replaced);
    assert!(refuses(29151).await);
    let console: SocketAddr = supervisor.console_addr().unwrap();
    assert_eq!(console.port(), 29152);
    assert!(console.ip().is_loopback());

    fx.write_config(29150, None, "");
    assert_eq!(supervisor.reload().await.unwrap().console, ConsoleChange::Stopped);
    assert!(refuses(29152).await);
    assert_eq!(supervisor.console_addr(), None);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn control_events_drive_the_loop() {
    let fx = Fixture::new();
    fx.write_config(29160, None, "");
    let supervisor = start(&fx).await;
    let (handle, events) = control_channel();
    let task = tokio::spawn(supervisor.run(events));

    fx.write_config(29161, None, "");
    handle.reload();

    let mut moved = false;
    for _ in 0..50 {
        if status_code(29161).await == Some(200) {
            moved = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(moved, "reload event should rebind to the new port");

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("supervisor exits on shutdown")
        .unwrap();

    assert!(refuses(29160).await);
    assert!(refuses(29161).await);
}
