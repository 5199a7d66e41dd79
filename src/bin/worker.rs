#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = mentor_notify::run_worker().await {
        eprintln!("mentor-notify-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
