//! Hidden `qemu-launch` entry point.
//!
//! The qemu provider re-executes this binary once per node. The launch
//! config arrives as JSON on stdin and the process stays alive for the
//! lifetime of the VM.

use anyhow::Result;
use clap::Args;
use provision::providers::qemu::launch::{launch, LaunchConfig};

/// Internal command used by the qemu provider
#[derive(Args)]
pub struct LaunchCommand;

impl LaunchCommand {
    pub async fn run(&self) -> Result<()> {
        let config = LaunchConfig::read(std::io::stdin().lock())?;
        launch(config).await
    }
}
