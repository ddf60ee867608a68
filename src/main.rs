//! Statbucket CLI entry point.

use statbucket::cli::{self, Cli};
use statbucket::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
