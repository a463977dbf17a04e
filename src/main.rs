#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hivegrid_authz::server::run().await
}
