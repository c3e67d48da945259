use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vmforge::util::WorkerGuard;

use crate::commands::{build::BuildArgs, validate::ValidateArgs, version::VersionArgs};

#[derive(Parser, Debug)]
#[command(name = "vmforge")]
#[command(about = "Build UTM virtual machine images", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a build from a config file
    Build(BuildArgs),

    /// Check a config file without building
    Validate(ValidateArgs),

    /// Show vmforge and UTM versions
    Version(VersionArgs),
}

/// Flags accepted before any subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Also write a daily rotated log file into this directory
    #[arg(long, global = true, env = "VMFORGE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalFlags {
    /// Keep the returned guard alive until exit so the file log flushes.
    pub fn init_logging(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let filter = if self.verbose { "debug" } else { "info" };
        Ok(vmforge::util::init_logging(self.log_dir.as_deref(), filter)?)
    }
}
