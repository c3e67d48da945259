use clap::Args;
use vmforge::driver::{Driver, UtmDriver};

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Only print the vmforge version, do not query UTM
    #[arg(long)]
    pub short: bool,
}

pub async fn execute(args: VersionArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    println!("vmforge {}", env!("CARGO_PKG_VERSION"));
    if args.short {
        return Ok(());
    }

    // A missing UTM is reported, not treated as a failure.
    let utm = match UtmDriver::new().await {
        Ok(driver) => driver.version().await,
        Err(e) => Err(e),
    };
    match utm {
        Ok(version) => println!("UTM {version}"),
        Err(e) => println!("UTM unavailable: {e}"),
    }
    Ok(())
}
