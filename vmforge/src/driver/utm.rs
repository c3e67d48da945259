//! Driver backed by `utmctl` and `osascript` (UTM 4.5+).

use std::path::{Path, PathBuf};

use vmforge_shared::constants::binaries;
use vmforge_shared::errors::{ForgeError, ForgeResult};

use super::{Driver, scripts};
use crate::util::{find_binary, run_command, run_with_stdin};

const VERSION_SCRIPT: &str =
    r#"tell application "System Events" to return version of application "UTM""#;

/// Real driver that shells out to UTM's automation binaries.
#[derive(Debug, Clone)]
pub struct UtmDriver {
    utmctl_path: PathBuf,
    osascript_path: PathBuf,
}

impl UtmDriver {
    /// Locate `utmctl` and `osascript`, then run [`Driver::verify`].
    pub async fn new() -> ForgeResult<Self> {
        let utmctl_path = find_binary(binaries::UTMCTL)?;
        let osascript_path = find_binary(binaries::OSASCRIPT)?;
        let driver = Self::with_paths(utmctl_path, osascript_path);
        driver.verify().await?;
        Ok(driver)
    }

    /// Build a driver from explicit binary paths without any lookup.
    pub fn with_paths(utmctl_path: PathBuf, osascript_path: PathBuf) -> Self {
        Self {
            utmctl_path,
            osascript_path,
        }
    }

    pub fn utmctl_path(&self) -> &Path {
        &self.utmctl_path
    }

    async fn osascript_inline(&self, script: &str) -> ForgeResult<String> {
        let args = vec!["-e".to_string(), script.to_string()];
        run_command(&self.osascript_path, &args)
            .await?
            .into_result(binaries::OSASCRIPT)
    }
}

#[async_trait::async_trait]
impl Driver for UtmDriver {
    async fn delete(&self, name: &str) -> ForgeResult<()> {
        self.utmctl(&["delete", name]).await.map(|_| ())
    }

    async fn import(&self, name: &str, path: &Path) -> ForgeResult<()> {
        tracing::info!(vm = name, path = %path.display(), "Importing VM bundle");
        let script = format!(
            r#"tell application "UTM" to open POSIX file "{}""#,
            path.display()
        );
        // "missing value" on stdout only means the script ran. UTM reports
        // import failures in its own window, not through the script.
        self.osascript_inline(&script).await.map(|_| ())
    }

    async fn is_running(&self, name: &str) -> ForgeResult<bool> {
        let status = self.utmctl(&["status", name]).await?;
        Ok(matches!(status.as_str(), "started" | "stopping" | "paused"))
    }

    async fn start(&self, name: &str) -> ForgeResult<()> {
        self.utmctl(&["start", name]).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> ForgeResult<()> {
        self.utmctl(&["stop", name]).await.map(|_| ())
    }

    async fn utmctl(&self, args: &[&str]) -> ForgeResult<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        run_command(&self.utmctl_path, &args)
            .await?
            .into_result(binaries::UTMCTL)
    }

    async fn execute_script(&self, script: &str, args: &[&str]) -> ForgeResult<String> {
        let source = scripts::source(script)?;

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("-".to_string());
        argv.extend(args.iter().map(|a| a.to_string()));

        tracing::debug!(script, ?args, "Executing AppleScript");
        run_with_stdin(&self.osascript_path, &argv, source.as_bytes())
            .await?
            .into_result(binaries::OSASCRIPT)
    }

    async fn verify(&self) -> ForgeResult<()> {
        for path in [&self.utmctl_path, &self.osascript_path] {
            if !path.is_file() {
                return Err(ForgeError::ControlSurfaceUnavailable(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    async fn version(&self) -> ForgeResult<String> {
        let args = vec!["-e".to_string(), VERSION_SCRIPT.to_string()];
        let output = run_command(&self.osascript_path, &args).await?;
        tracing::debug!(output = %output.stdout, "UTM version output");

        if output.stdout.contains("get application") || output.stderr.contains("get application")
        {
            return Err(ForgeError::ControlSurfaceUnavailable(
                "UTM is not installed".into(),
            ));
        }

        let raw = output.into_result(binaries::OSASCRIPT)?;
        let version = parse_version(&raw)?;
        tracing::info!(version = %version, "Detected UTM version");
        Ok(version)
    }
}

/// Accept only a strict numeric `major.minor.patch` string.
pub fn parse_version(output: &str) -> ForgeResult<String> {
    let parts: Vec<&str> = output.split('.').collect();
    let valid = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));

    if valid {
        Ok(output.to_string())
    } else {
        Err(ForgeError::command(
            binaries::OSASCRIPT,
            format!("no version found: {}", output),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_accepts_semver_triplet() {
        assert_eq!(parse_version("4.5.2").unwrap(), "4.5.2");
        assert_eq!(parse_version("10.0.11").unwrap(), "10.0.11");
    }

    #[test]
    fn test_parse_version_rejects_loose_formats() {
        for bad in ["4.5", "v4.5.2", "4.5.2b", "4.5.2.1", "", "4..2", " 4.5.2"] {
            assert!(parse_version(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_verify_missing_binaries() {
        let driver = UtmDriver::with_paths(
            PathBuf::from("/nonexistent/utmctl"),
            PathBuf::from("/nonexistent/osascript"),
        );
        let err = driver.verify().await.unwrap_err();
        assert!(matches!(err, ForgeError::ControlSurfaceUnavailable(_)));
    }

    #[cfg(unix)]
    mod fake_binaries {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Write an executable shell script standing in for a UTM binary.
        fn fake_binary(dir: &TempDir, name: &str, body: &str) -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn driver_with(utmctl_body: &str, osascript_body: &str) -> (TempDir, UtmDriver) {
            let dir = TempDir::new().unwrap();
            let utmctl = fake_binary(&dir, "utmctl", utmctl_body);
            let osascript = fake_binary(&dir, "osascript", osascript_body);
            (dir, UtmDriver::with_paths(utmctl, osascript))
        }

        #[tokio::test]
        async fn test_is_running_state_mapping() {
            for (status, expected) in [
                ("started", true),
                ("stopping", true),
                ("paused", true),
                ("stopped", false),
                ("starting", false),
                ("pausing", false),
            ] {
                let (_dir, driver) = driver_with(&format!("echo {}", status), "exit 0");
                assert_eq!(
                    driver.is_running("vm").await.unwrap(),
                    expected,
                    "status {}",
                    status
                );
            }
        }

        #[tokio::test]
        async fn test_utmctl_error_carries_stderr() {
            let (_dir, driver) =
                driver_with("echo 'Virtual machine not found.' >&2; exit 1", "exit 0");
            let err = driver.delete("ghost").await.unwrap_err();
            assert_eq!(err.to_string(), "utmctl error: Virtual machine not found.");
        }

        #[tokio::test]
        async fn test_utmctl_passes_args() {
            let (_dir, driver) = driver_with("echo \"$@\"", "exit 0");
            let out = driver.utmctl(&["status", "my vm"]).await.unwrap();
            assert_eq!(out, "status my vm");
        }

        #[tokio::test]
        async fn test_execute_script_feeds_source_on_stdin() {
            // Echo the argv, then the first line of the script read from stdin.
            let (_dir, driver) = driver_with("exit 0", "echo \"$@\"; head -n 1");
            let out = driver
                .execute_script(scripts::CUSTOMIZE_VM, &["vm", "--cpus", "2"])
                .await
                .unwrap();
            let mut lines = out.lines();
            assert_eq!(lines.next(), Some("- vm --cpus 2"));
            assert_eq!(
                lines.next(),
                Some("-- Usage: osascript - NAME --cpus N --memory MIB")
            );
        }

        #[tokio::test]
        async fn test_execute_script_unknown_name() {
            let (_dir, driver) = driver_with("exit 0", "exit 0");
            let err = driver
                .execute_script("nope.applescript", &[])
                .await
                .unwrap_err();
            assert!(matches!(err, ForgeError::Internal(_)));
        }

        #[tokio::test]
        async fn test_version_parses_output() {
            let (_dir, driver) = driver_with("exit 0", "echo 4.5.2");
            assert_eq!(driver.version().await.unwrap(), "4.5.2");
        }

        #[tokio::test]
        async fn test_version_not_installed() {
            let (_dir, driver) = driver_with(
                "exit 0",
                "echo 'execution error: System Events got an error: Can’t get application \"UTM\".' >&2; exit 1",
            );
            let err = driver.version().await.unwrap_err();
            assert!(err.to_string().contains("UTM is not installed"));
        }

        #[tokio::test]
        async fn test_verify_existing_binaries() {
            let (_dir, driver) = driver_with("exit 0", "exit 0");
            driver.verify().await.unwrap();
        }
    }
}
