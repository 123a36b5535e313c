use clap::Parser;
use log::info;
use server::{Server, ServerConfig};

/// Parses the command line, binds the listeners and relays until a shutdown
/// signal arrives.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: set RUST_LOG=info (or debug) to see relay activity");
    }
    env_logger::init();

    let config = ServerConfig::parse();
    let server = Server::bind(&config).await?;

    server.run(shutdown_signal()).await?;
    info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
