#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry_agent_lib::run().await
}
