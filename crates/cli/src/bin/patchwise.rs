use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    patchwise_cli::main_entry().await
}
