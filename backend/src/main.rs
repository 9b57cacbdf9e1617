#[tokio::main]
async fn main() -> anyhow::Result<()> {
    canteen_server::start_server().await
}
