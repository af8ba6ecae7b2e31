use std::time::Duration;

use tracing::info;

const BLINK_PERIOD: Duration = Duration::from_secs(1);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut interval = tokio::time::interval(BLINK_PERIOD);
    let mut lit = false;

    loop {
        interval.tick().await;
        lit = !lit;
        info!("LED is {}", if lit { "ON" } else { "OFF" });
    }
}
