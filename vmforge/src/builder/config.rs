//! Configuration blocks shared by both builders.
//!
//! Every block deserializes with defaults and is then checked by a
//! `prepare` method that appends human-readable problems to a list, so a
//! user sees every mistake of a config file at once.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vmforge_shared::constants::defaults;
use vmforge_shared::errors::ForgeError;

use crate::communicator::KeyType;

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the exported VM.
    ///
    /// Default: `output-<build_name>`
    #[serde(default)]
    pub output_dir: PathBuf,

    /// Exported file name without extension.
    ///
    /// Default: the VM name
    #[serde(default)]
    pub output_filename: String,
}

impl OutputConfig {
    pub fn prepare(&mut self, build_name: &str) {
        if self.output_dir.as_os_str().is_empty() {
            self.output_dir = PathBuf::from(format!("output-{}", build_name));
        }
    }
}

// ============================================================================
// Hardware
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HwConfig {
    /// Virtual CPUs. Zero means the default of 1.
    #[serde(default = "default_cpus")]
    pub cpus: u32,

    /// Memory in MiB. Zero means the default of 512.
    #[serde(default = "default_memory")]
    pub memory: u32,
}

impl Default for HwConfig {
    fn default() -> Self {
        Self {
            cpus: default_cpus(),
            memory: default_memory(),
        }
    }
}

impl HwConfig {
    pub fn prepare(&mut self) {
        if self.cpus == 0 {
            self.cpus = defaults::CPUS;
        }
        if self.memory == 0 {
            self.memory = defaults::MEMORY_MIB;
        }
    }
}

fn default_cpus() -> u32 {
    defaults::CPUS
}

fn default_memory() -> u32 {
    defaults::MEMORY_MIB
}

// ============================================================================
// Export
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Only `utm` is supported.
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
        }
    }
}

impl ExportConfig {
    pub fn prepare(&mut self, errs: &mut Vec<String>) {
        if self.format.is_empty() {
            self.format = default_format();
        }
        if self.format != defaults::EXPORT_FORMAT {
            errs.push("invalid format, only 'utm' is allowed".into());
        }
    }
}

fn default_format() -> String {
    defaults::EXPORT_FORMAT.to_string()
}

// ============================================================================
// Shutdown
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Command run in the guest to power it off. Empty means forced stop.
    #[serde(default)]
    pub shutdown_command: String,

    /// How long to wait for the guest to power off after the command.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Pause after a graceful shutdown before continuing.
    #[serde(default)]
    pub post_shutdown_delay_secs: u64,

    /// Never send the shutdown command; forcibly stop instead.
    #[serde(default)]
    pub disable_shutdown: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            shutdown_command: String::new(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            post_shutdown_delay_secs: 0,
            disable_shutdown: false,
        }
    }
}

impl ShutdownConfig {
    pub fn prepare(&mut self, errs: &mut Vec<String>) {
        if self.shutdown_timeout_secs == 0 {
            errs.push("shutdown_timeout_secs must be greater than 0".into());
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn post_shutdown_delay(&self) -> Duration {
        Duration::from_secs(self.post_shutdown_delay_secs)
    }

    /// Warning shown when the guest will be powered off without a command.
    pub fn warning(&self) -> Option<String> {
        self.shutdown_command.trim().is_empty().then(|| {
            "A shutdown_command was not specified. Without a shutdown command, vmforge\n\
             will forcibly halt the virtual machine, which may result in data loss."
                .to_string()
        })
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    defaults::SHUTDOWN_TIMEOUT_SECS
}

// ============================================================================
// Communicator
// ============================================================================

/// Remote command channel type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommType {
    #[default]
    Ssh,
    /// No channel: no port forward, provisioning or graceful shutdown.
    None,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommConfig {
    #[serde(default)]
    pub communicator: CommType,

    #[serde(default)]
    pub ssh_username: String,

    /// Host the communicator connects to.
    ///
    /// Default: `127.0.0.1`, where the forwarded port listens
    #[serde(default = "default_ssh_host")]
    pub ssh_host: String,

    /// Key used to log in. Without one, a temporary key pair is created
    /// for the build.
    #[serde(default)]
    pub ssh_private_key_file: Option<PathBuf>,

    #[serde(default)]
    pub temporary_key_pair_type: KeyType,

    /// Remove the temporary public key from the guest's
    /// `~/.ssh/authorized_keys` after provisioning.
    #[serde(default)]
    pub ssh_clear_authorized_keys: bool,

    /// Guest port the SSH server listens on.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default = "default_ssh_timeout_secs")]
    pub ssh_timeout_secs: u64,

    #[serde(default = "default_ssh_handshake_interval_secs")]
    pub ssh_handshake_interval_secs: u64,

    /// Inclusive host port range for the forward.
    #[serde(default = "default_host_port_min")]
    pub host_port_min: u16,

    #[serde(default = "default_host_port_max")]
    pub host_port_max: u16,

    /// Use the guest port directly and do not add a forwarding rule.
    #[serde(default)]
    pub skip_nat_mapping: bool,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            communicator: CommType::default(),
            ssh_username: String::new(),
            ssh_host: default_ssh_host(),
            ssh_private_key_file: None,
            temporary_key_pair_type: KeyType::default(),
            ssh_clear_authorized_keys: false,
            ssh_port: default_ssh_port(),
            ssh_timeout_secs: default_ssh_timeout_secs(),
            ssh_handshake_interval_secs: default_ssh_handshake_interval_secs(),
            host_port_min: default_host_port_min(),
            host_port_max: default_host_port_max(),
            skip_nat_mapping: false,
        }
    }
}

impl CommConfig {
    pub fn prepare(&mut self, errs: &mut Vec<String>) {
        if self.communicator == CommType::None {
            return;
        }
        if self.ssh_username.is_empty() {
            errs.push("ssh_username must be specified".into());
        }
        if self.ssh_host.trim().is_empty() {
            self.ssh_host = default_ssh_host();
        }
        if self.host_port_min > self.host_port_max {
            errs.push("host_port_min must be less than or equal to host_port_max".into());
        }
        if self.host_port_min == 0 && !self.skip_nat_mapping {
            errs.push("host_port_min must be greater than 0".into());
        }
        if self.ssh_handshake_interval_secs == 0 {
            self.ssh_handshake_interval_secs = defaults::SSH_HANDSHAKE_INTERVAL_SECS;
        }
    }

    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }

    pub fn handshake_interval(&self) -> Duration {
        Duration::from_secs(self.ssh_handshake_interval_secs)
    }
}

fn default_ssh_host() -> String {
    defaults::SSH_HOST.to_string()
}

fn default_ssh_port() -> u16 {
    defaults::SSH_PORT
}

fn default_ssh_timeout_secs() -> u64 {
    defaults::SSH_TIMEOUT_SECS
}

fn default_ssh_handshake_interval_secs() -> u64 {
    defaults::SSH_HANDSHAKE_INTERVAL_SECS
}

fn default_host_port_min() -> u16 {
    defaults::HOST_PORT_MIN
}

fn default_host_port_max() -> u16 {
    defaults::HOST_PORT_MAX
}

// ============================================================================
// UTM version file
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VersionFileConfig {
    /// Guest path receiving the UTM version. Empty disables the upload.
    ///
    /// Default: `.utm_version`
    #[serde(default)]
    pub utm_version_file: Option<String>,
}

impl VersionFileConfig {
    pub fn prepare(&mut self, comm: CommType, errs: &mut Vec<String>) {
        let path = self
            .utm_version_file
            .get_or_insert_with(|| defaults::VERSION_FILE.to_string());

        if comm == CommType::None && !path.is_empty() {
            errs.push(
                "utm_version_file has to be an empty string when communicator = 'none'".into(),
            );
        }
    }

    pub fn path(&self) -> &str {
        self.utm_version_file.as_deref().unwrap_or_default()
    }
}

// ============================================================================
// Provisioning
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Shell commands run in the guest, in order.
    #[serde(default)]
    pub provision: Vec<String>,
}

impl ProvisionConfig {
    pub fn prepare(&mut self, comm: CommType, errs: &mut Vec<String>) {
        if comm == CommType::None && !self.provision.is_empty() {
            errs.push("provision requires a communicator".into());
        }
    }
}

// ============================================================================
// VM backend
// ============================================================================

/// UTM virtualization backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmBackend {
    Qemu,
    Apple,
}

impl VmBackend {
    /// Four-character code UTM's scripting dictionary uses.
    pub fn utm_code(&self) -> &'static str {
        match self {
            VmBackend::Qemu => "QeMu",
            VmBackend::Apple => "ApPl",
        }
    }
}

impl FromStr for VmBackend {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qemu" => Ok(VmBackend::Qemu),
            "apple" => Ok(VmBackend::Apple),
            _ => Err(ForgeError::Config(
                "vm_backend must be either 'apple' or 'qemu'".into(),
            )),
        }
    }
}

/// Bare message of a config error, without the "configuration error" prefix.
pub(crate) fn config_message(err: ForgeError) -> String {
    match err {
        ForgeError::Config(msg) => msg,
        other => other.to_string(),
    }
}

/// Collapse collected problems into one error, or pass the warnings through.
pub(crate) fn finish(errs: Vec<String>, warnings: Vec<String>) -> Result<Vec<String>, ForgeError> {
    if errs.is_empty() {
        Ok(warnings)
    } else {
        Err(ForgeError::Config(errs.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hw_defaults_replace_zero() {
        let mut hw: HwConfig = serde_json::from_str(r#"{"cpus": 0}"#).unwrap();
        hw.prepare();
        assert_eq!(hw.cpus, 1);
        assert_eq!(hw.memory, 512);
    }

    #[test]
    fn test_export_format() {
        let mut errs = Vec::new();
        let mut export = ExportConfig::default();
        export.prepare(&mut errs);
        assert_eq!(export.format, "utm");
        assert!(errs.is_empty());

        let mut export = ExportConfig {
            format: "ova".into(),
        };
        export.prepare(&mut errs);
        assert_eq!(errs, vec!["invalid format, only 'utm' is allowed"]);
    }

    #[test]
    fn test_version_file_default_and_none_communicator() {
        let mut errs = Vec::new();
        let mut version = VersionFileConfig::default();
        version.prepare(CommType::Ssh, &mut errs);
        assert_eq!(version.path(), ".utm_version");
        assert!(errs.is_empty());

        let mut version = VersionFileConfig::default();
        version.prepare(CommType::None, &mut errs);
        assert_eq!(errs.len(), 1);

        let mut errs = Vec::new();
        let mut version = VersionFileConfig {
            utm_version_file: Some(String::new()),
        };
        version.prepare(CommType::None, &mut errs);
        assert!(errs.is_empty());
        assert_eq!(version.path(), "");
    }

    #[test]
    fn test_comm_rejects_inverted_port_range() {
        let mut errs = Vec::new();
        let mut comm = CommConfig {
            ssh_username: "admin".into(),
            host_port_min: 5000,
            host_port_max: 4000,
            ..Default::default()
        };
        comm.prepare(&mut errs);
        assert_eq!(
            errs,
            vec!["host_port_min must be less than or equal to host_port_max"]
        );
    }

    #[test]
    fn test_comm_rejects_zero_min_port() {
        let mut errs = Vec::new();
        let mut comm = CommConfig {
            ssh_username: "admin".into(),
            host_port_min: 0,
            host_port_max: 100,
            ..Default::default()
        };
        comm.prepare(&mut errs);
        assert_eq!(errs, vec!["host_port_min must be greater than 0"]);

        errs.clear();
        comm.skip_nat_mapping = true;
        comm.prepare(&mut errs);
        assert!(errs.is_empty());
    }

    #[test]
    fn test_comm_host_and_key_defaults() {
        let mut errs = Vec::new();
        let mut comm: CommConfig =
            serde_json::from_str(r#"{"ssh_username": "admin", "ssh_host": ""}"#).unwrap();
        comm.prepare(&mut errs);
        assert!(errs.is_empty());
        assert_eq!(comm.ssh_host, "127.0.0.1");
        assert_eq!(comm.temporary_key_pair_type, KeyType::Ed25519);
        assert!(!comm.ssh_clear_authorized_keys);

        let comm: CommConfig = serde_json::from_str(
            r#"{"ssh_host": "192.168.64.5", "temporary_key_pair_type": "rsa"}"#,
        )
        .unwrap();
        assert_eq!(comm.ssh_host, "192.168.64.5");
        assert_eq!(comm.temporary_key_pair_type, KeyType::Rsa);
    }

    #[test]
    fn test_comm_none_skips_ssh_checks() {
        let mut errs = Vec::new();
        let mut comm: CommConfig = serde_json::from_str(r#"{"communicator": "none"}"#).unwrap();
        comm.prepare(&mut errs);
        assert!(errs.is_empty());
        assert_eq!(comm.communicator, CommType::None);
    }

    #[test]
    fn test_backend_codes() {
        assert_eq!("qemu".parse::<VmBackend>().unwrap().utm_code(), "QeMu");
        assert_eq!("apple".parse::<VmBackend>().unwrap().utm_code(), "ApPl");
        assert!("hyperv".parse::<VmBackend>().is_err());
    }

    #[test]
    fn test_shutdown_warning() {
        assert!(ShutdownConfig::default().warning().is_some());
        let shutdown = ShutdownConfig {
            shutdown_command: "sudo shutdown -h now".into(),
            ..Default::default()
        };
        assert!(shutdown.warning().is_none());
    }
}
