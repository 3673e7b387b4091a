use anyhow::Result;
use azure_devops_exporter::cli::start;

#[tokio::main]
async fn main() -> Result<()> {
    start::start().await
}
