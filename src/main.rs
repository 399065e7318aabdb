//! tsagg CLI entry point.

use tsagg_lib::cli::{self, Cli};
use tsagg_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!(error = %e, category = e.category(), "tsagg failed");
        return Err(e);
    }
    Ok(())
}
