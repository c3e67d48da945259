use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use vmforge::builder::BuildEnv;
use vmforge::driver::UtmDriver;
use vmforge::ui::ConsoleUi;

use crate::config::{BuildConfig, print_warnings};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build config file (YAML or JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Ask for confirmation before every step
    #[arg(long)]
    pub debug: bool,

    /// Delete an existing output directory before building
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(args: BuildArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let (builder, warnings) = BuildConfig::load(&args.config)?.prepare()?;
    print_warnings(&warnings);

    let driver = UtmDriver::new().await?;
    tracing::info!(utmctl = %driver.utmctl_path().display(), "Using UTM control surface");

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let env = BuildEnv::new(Arc::new(driver), Arc::new(ConsoleUi::new(builder.build_name())))
        .with_force(args.force)
        .with_debug(args.debug);

    let artifact = builder.run(&cancel, env).await?;
    println!("Build '{}' finished.", builder.build_name());
    println!("{artifact}");
    Ok(())
}

/// Cancel the build on Ctrl-C. Steps stop at their next cancellation check
/// and every completed step is still cleaned up.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("Interrupt received, cancelling build...");
                cancel.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for interrupt"),
        }
    });
}
