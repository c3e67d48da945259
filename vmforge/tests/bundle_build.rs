//! End-to-end bundle builds against the mock driver and communicator.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vmforge::ForgeError;
use vmforge::builder::{Builder, BundleBuilder, BundleConfig};
use vmforge::ui::MockUi;
use vmforge_test_utils::TestBuild;

fn builder(extra: serde_json::Value) -> BundleBuilder {
    let config: BundleConfig = serde_json::from_value(extra).unwrap();
    let mut builder = BundleBuilder::new(config);
    builder.prepare().unwrap();
    builder
}

#[tokio::test]
async fn test_import_without_communicator() {
    let tb = TestBuild::new();
    let bundle = tb.bundle("debian-base");
    tb.place_export("debian-base.utm");
    tb.ui.push_answer("Y");

    let builder = builder(serde_json::json!({
        "source_path": format!("file://{}", bundle.display()),
        "communicator": "none",
        "utm_version_file": "",
        "output_dir": tb.output_dir(),
    }));

    // The export directory already exists, so the build needs --force.
    let err = builder
        .run(&CancellationToken::new(), tb.env())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Use --force"));
    assert!(tb.output_dir().exists());

    let artifact = builder
        .run(&CancellationToken::new(), tb.env().with_force(true))
        .await
        .unwrap();

    let state = tb.driver.state();
    assert_eq!(
        state.import_calls,
        vec![("debian-base".to_string(), bundle.clone())]
    );
    assert!(state.script_calls.is_empty());
    assert_eq!(state.start_calls, vec!["debian-base"]);
    assert_eq!(state.stop_calls, vec!["debian-base"]);
    assert_eq!(state.delete_calls, vec!["debian-base"]);
    assert!(!state.version_called);
    drop(state);

    assert!(tb.connections.lock().is_empty());
    assert!(tb.comm.commands().is_empty());
    // Forced removal emptied the output directory; nothing was exported.
    assert!(artifact.files().is_empty());
    assert_eq!(
        tb.ui.asked(),
        vec![format!(
            "Confirm you have exported the VM to path [{}] [Y/n]:",
            tb.output_dir().join("debian-base.utm").display()
        )]
    );
}

#[tokio::test]
async fn test_missing_bundle_fails_without_import() {
    let tb = TestBuild::new();
    let builder = builder(serde_json::json!({
        "source_path": tb.path().join("absent.utm"),
        "communicator": "none",
        "utm_version_file": "",
        "output_dir": tb.output_dir(),
    }));

    let err = builder
        .run(&CancellationToken::new(), tb.env())
        .await
        .unwrap_err();

    assert!(matches!(err.root(), ForgeError::ResourceAcquisition(_)));
    assert!(err.to_string().starts_with("error downloading VM bundle: "));
    assert!(tb.driver.state().import_calls.is_empty());
    assert!(!tb.output_dir().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_shutdown_waits_for_guest() {
    let tb = TestBuild::new();
    let bundle = tb.bundle("alpine");
    let ui = std::sync::Arc::new(MockUi::new());

    let builder = builder(serde_json::json!({
        "source_path": bundle,
        "ssh_username": "root",
        "ssh_private_key_file": tb.key(),
        "shutdown_command": "poweroff",
        "shutdown_timeout_secs": 30,
        "host_port_min": 33000,
        "host_port_max": 33100,
        "output_dir": tb.output_dir(),
        "skip_export": true,
    }));

    // Plays the guest: powers off once the command arrives.
    let guest = {
        let driver = tb.driver.clone();
        let comm = tb.comm.clone();
        tokio::spawn(async move {
            while !comm.commands().iter().any(|c| c == "poweroff") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            driver.set_running(false);
        })
    };

    let env = vmforge::BuildEnv::new(tb.driver.clone(), ui.clone())
        .with_communicator_factory(tb.factory());
    builder.run(&CancellationToken::new(), env).await.unwrap();
    guest.await.unwrap();

    let state = tb.driver.state();
    assert!(state.stop_calls.is_empty());
    assert!(state.is_running_calls >= 1);
    assert_eq!(state.delete_calls, vec!["alpine"]);
    drop(state);

    assert_eq!(tb.comm.commands(), vec!["true", "poweroff"]);
    assert!(
        ui.said()
            .contains(&"Gracefully halting virtual machine...".to_string())
    );
}
