//! End-to-end signing requests through a supervised listener.

use std::time::Duration;

use signing_daemon::http::X_SHA256;
use signing_daemon::lifecycle::Supervisor;

mod common;

use common::Fixture;

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

async fn start(fx: &Fixture) -> Supervisor {
    let vault = fx.vault(&[("gpg", "secret"), ("mar", "")]);
    Supervisor::start(&fx.config_path, vault, common::hash_pool())
        .await
        .expect("supervisor start")
}

#[tokio::test]
async fn signs_uploaded_artifact() {
    let fx = Fixture::new();
    fx.write_config(29210, Some(29211), "");
    let supervisor = start(&fx).await;
    let client = common::client();

    let res = client
        .post("http://127.0.0.1:29210/sign/gpg")
        .body("hello")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()[X_SHA256], HELLO_SHA256);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "hellosigned-gpg");

    // Format without a passphrase.
    let res = client
        .post("http://127.0.0.1:29210/sign/mar")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hellosigned-mar");

    let app: serde_json::Value = client
        .get("http://127.0.0.1:29211/debug/app")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(app["requests"][0]["format"], "gpg");
    assert_eq!(app["requests"][0]["signed"], 1);
    assert_eq!(app["unlocked_formats"], serde_json::json!(["gpg", "mar"]));

    let pool: serde_json::Value = client
        .get("http://127.0.0.1:29211/debug/pool")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pool["workers"], 2);
    assert_eq!(pool["completed"], 2);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn status_lists_formats_without_secrets() {
    let fx = Fixture::new();
    fx.write_config(29220, None, "");
    let supervisor = start(&fx).await;

    let body = common::client()
        .get("http://127.0.0.1:29220/status")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let status: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(status["formats"], serde_json::json!(["gpg", "mar"]));
    assert!(!body.contains("secret"));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn unknown_format_is_not_found() {
    let fx = Fixture::new();
    fx.write_config(29230, None, "");
    let supervisor = start(&fx).await;

    let res = common::client()
        .post("http://127.0.0.1:29230/sign/deb")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let fx = Fixture::new();
    fx.write_config(29240, None, "max_body_size = 4");
    let supervisor = start(&fx).await;

    let res = common::client()
        .post("http://127.0.0.1:29240/sign/gpg")
        .body("far too large")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn script_failure_returns_its_log() {
    let fx = Fixture::new();
    fx.write_config(29250, None, "");
    let supervisor = start(&fx).await;

    // Passphrases are verified; from now on the signer refuses everything.
    common::write_script(fx.dir.path(), "signscript.sh", "echo 'hsm offline' >&2\nexit 3");

    let res = common::client()
        .post("http://127.0.0.1:29250/sign/gpg")
        .body("hello")
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert!(res.text().await.unwrap().contains("hsm offline"));

    let stats = supervisor.app().stats();
    assert_eq!(stats[0].format, "gpg");
    assert_eq!(stats[0].failed, 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn slow_signer_times_out() {
    let fx = Fixture::new();
    fx.write_config(29260, None, "request_timeout_secs = 1");
    let supervisor = start(&fx).await;

    let finished = fx.dir.path().join("finished");
    common::write_script(
        fx.dir.path(),
        "signscript.sh",
        &format!("sleep 2\ntouch '{}'\ncat \"$2\" > \"$3\"", finished.display()),
    );

    let res = common::client()
        .post("http://127.0.0.1:29260/sign/gpg")
        .body("hello")
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);

    // The abandoned script is killed rather than left running.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!finished.exists(), "sign script outlived its request");

    supervisor.shutdown().await;
}
