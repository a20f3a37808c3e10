use lamport::cli::run_from_arguments;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_from_arguments().await
}
