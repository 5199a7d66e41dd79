#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = mentor_notify::run().await {
        eprintln!("mentor-notify fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
