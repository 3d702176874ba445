#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = picrete_session_engine::run().await {
        eprintln!("picrete-session-engine fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
