use std::sync::Arc;

use framegate::config::SignalingConfig;
use framegate::media::LoopbackBackend;
use framegate::signaling::SignalingServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = SignalingConfig::from_env()?;

    println!("   Framegate Signaling Server");
    println!("   Binding to {}", config.listen_addr);
    println!("   Press Ctrl+C to stop\n");

    let backend = Arc::new(LoopbackBackend::default());
    let server = SignalingServer::bind(config, backend).await?;
    server.run().await?;

    Ok(())
}
