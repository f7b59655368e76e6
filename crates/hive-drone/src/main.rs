// ABOUTME: hive-drone bootstrap binary.
// ABOUTME: Isolates the drone, runs its entry script and reports the bound port.

use anyhow::Result;
use clap::Parser;
use hive_drone::{bootstrap, entry, BootstrapArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BootstrapArgs::parse();
    hive_log::init_for("hive_drone");

    let ctx = bootstrap(args.into_config()).await?;
    let code = entry::run(&ctx).await?;
    std::process::exit(code);
}
