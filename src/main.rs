use anyhow::Result;
use boardsync::client::ClientHandle;
use boardsync::config::SyncConfig;
use boardsync::sync::{BoardActorHandle, Role};
use boardsync::types::Notification;
use boardsync::{logging, server};
use clap::{Parser, Subcommand};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// User name announced to other peers. Defaults to a generated one.
    #[arg(long, global = true)]
    name: Option<String>,
    /// Enable verbose debug output.
    #[arg(short, long, global = true, action)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a shared whiteboard, listening for incoming peers.
    Serve {
        port: u16,
        /// Use IPv6 instead of IPv4.
        #[arg(long)]
        ipv6: bool,
    },
    /// Join a shared whiteboard hosted on another machine.
    Connect {
        host: String,
        port: u16,
        /// Use IPv6 instead of IPv4.
        #[arg(long)]
        ipv6: bool,
    },
}

fn generated_user_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(char::from)
        .collect();
    format!("user-{}", suffix.to_lowercase())
}

#[tokio::main]
async fn main() -> Result<()> {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let cli = Cli::parse();

    logging::initialize(cli.debug)?;

    let user_name = cli.name.unwrap_or_else(generated_user_name);
    let config = SyncConfig::default();

    match cli.command {
        Commands::Serve { port, ipv6 } => {
            let handle = BoardActorHandle::new(Role::Server, user_name, config);
            let mut notifications = handle.subscribe();
            server::start(port, ipv6, handle).await?;

            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => break,
                    notification = notifications.recv() => match notification {
                        Ok(Notification::UserJoined(name)) => info!("'{name}' joined"),
                        Ok(Notification::UserLeft(name)) => info!("'{name}' left"),
                        Ok(Notification::AllClientConnectionsLost) => {
                            // Keep listening; new clients can still join.
                            error!("All client connections have been closed.");
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }
        Commands::Connect { host, port, ipv6 } => {
            let handle = BoardActorHandle::new(Role::Client, user_name, config.clone());
            let mut notifications = handle.subscribe();
            let client = ClientHandle::new(host, port, ipv6, config, handle);
            client.connect().await?;

            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => break,
                    notification = notifications.recv() => match notification {
                        Ok(Notification::UserJoined(name)) => info!("'{name}' joined"),
                        Ok(Notification::ConnectionToServerLost) => {
                            // Headless stand-in for the reconnect dialog:
                            // keep trying until the server is back.
                            error!("Connection to server lost, will keep trying to reconnect...");
                            loop {
                                tokio::time::sleep(RECONNECT_DELAY).await;
                                match client.reconnect().await {
                                    Ok(()) => break,
                                    Err(err) => info!("Reconnect failed ({err:#}), retrying..."),
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }
    }
    Ok(())
}
