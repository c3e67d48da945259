use std::path::PathBuf;

use clap::Args;

use crate::config::{BuildConfig, print_warnings};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Build config file (YAML or JSON)
    #[arg(short, long)]
    pub config: PathBuf,
}

pub async fn execute(args: ValidateArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let (builder, warnings) = BuildConfig::load(&args.config)?.prepare()?;
    print_warnings(&warnings);
    tracing::debug!(build = builder.build_name(), "Configuration validated");
    println!("The configuration is valid.");
    Ok(())
}
