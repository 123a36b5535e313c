use clap::Parser;
use client::network::describe_refusal;
use client::{Client, ClientCommand, ClientConfig, ClientEvent};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ClientConfig::parse();

    info!("Starting client...");
    info!("Connecting to: {}", config.server);
    if !config.crypt_key.is_empty() {
        info!("Bodies are encrypted with the shared key");
    }
    println!("Type to chat in your room. /g <msg> global, /c <msg> private group,");
    println!("/group <password> join a private group, /room <n> change room, /quit");

    let mut client = Client::new(&config)?;
    let (commands_tx, commands) = mpsc::channel(64);
    let (events_tx, mut events) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(command) = ClientCommand::parse(&line) else {
                continue;
            };
            if commands_tx.send(command).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    client.run(commands, events_tx).await?;

    Ok(())
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::RoomEntered(room) => println!("-- entered room {}", room),
        ClientEvent::PeerJoined(id) => println!("-- player {} is here", id),
        ClientEvent::PeerLeft(id) => println!("-- player {} left", id),
        ClientEvent::Chat {
            kind: 0, message, ..
        } => println!("{}", message),
        ClientEvent::Chat {
            visibility,
            name,
            message,
            ..
        } => println!("[{}] {}: {}", visibility.name(), name, message),
        ClientEvent::Refused(kind) => println!("-- {}", describe_refusal(kind)),
        ClientEvent::ReconnectScheduled => println!("-- connection lost, reconnecting"),
    }
}
