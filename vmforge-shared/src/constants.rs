//! Constants shared by the engine and the CLI.

/// Identifier stamped on every artifact produced by the UTM builders.
pub const BUILDER_ID: &str = "vmforge.utm";

/// Control surface binaries.
pub mod binaries {
    /// UTM's command-line controller.
    pub const UTMCTL: &str = "utmctl";

    /// AppleScript interpreter used for operations `utmctl` lacks.
    pub const OSASCRIPT: &str = "osascript";

    /// Creates the temporary SSH key pair.
    pub const SSH_KEYGEN: &str = "ssh-keygen";

    /// Directory inside the UTM application bundle that ships `utmctl`.
    pub const UTM_APP_MACOS_DIR: &str = "/Applications/UTM.app/Contents/MacOS";
}

/// Build configuration defaults.
pub mod defaults {
    pub const CPUS: u32 = 1;
    pub const MEMORY_MIB: u32 = 512;
    pub const DISK_SIZE_MIB: u64 = 40960;
    pub const VM_ARCH: &str = "aarch64";
    pub const VM_BACKEND: &str = "qemu";
    pub const EXPORT_FORMAT: &str = "utm";
    pub const VERSION_FILE: &str = ".utm_version";

    /// Communicator (remote command channel) defaults.
    pub const SSH_HOST: &str = "127.0.0.1";
    pub const SSH_PORT: u16 = 22;
    pub const SSH_TIMEOUT_SECS: u64 = 300;
    pub const SSH_HANDSHAKE_INTERVAL_SECS: u64 = 5;
    pub const HOST_PORT_MIN: u16 = 2222;
    pub const HOST_PORT_MAX: u16 = 4444;

    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 300;
}

/// Shutdown polling interval in milliseconds.
pub const SHUTDOWN_POLL_INTERVAL_MS: u64 = 500;

/// Environment variables.
pub mod envs {
    /// Overrides the directory searched first for `utmctl`.
    pub const UTMCTL_DIR: &str = "VMFORGE_UTMCTL_DIR";
}
