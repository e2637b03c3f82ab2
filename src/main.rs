use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    picoclaw::cli::run().await
}
