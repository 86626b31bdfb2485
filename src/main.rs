use screencast_relay::config::Config;
use screencast_relay::signaling::SignalingServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let server = SignalingServer::bind(config.bind_addr)
        .await?
        .with_keepalive(config.keepalive);
    let port = server.local_addr()?.port();
    let lan = local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "localhost".to_string());

    println!("   Screencast Signaling Relay");
    println!("   Binding to {}", config.bind_addr);
    println!("   Local:   ws://localhost:{}", port);
    println!("   Network: ws://{}:{}", lan, port);
    println!("   Broadcaster page: /broadcaster.html");
    println!("   Viewer page:      /viewer.html");
    println!("   Press Ctrl+C to stop\n");

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
