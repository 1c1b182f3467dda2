use anyhow::Result;
use clap::Parser;

use bundle_unread::{app, cli};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    app::run(cli)
}
