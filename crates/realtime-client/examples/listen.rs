//! Connect to a realtime server and print application messages.
//!
//! ```sh
//! cargo run -p realtime-client --example listen -- \
//!     --endpoint ws://127.0.0.1:8000/ws/notifications --room alerts
//! ```
//!
//! Or load a YAML config and pick the kinds to print:
//! ```sh
//! REALTIME_ENDPOINT=wss://cases.example.org/ws/notifications \
//!     cargo run -p realtime-client --example listen -- \
//!     --config realtime.yaml --kind system_alert --kind new_referral
//! ```
//!
//! Each message is printed to stdout as one JSON line (pipe to `jq` for
//! formatting); connection events go to stderr. Ctrl-C disconnects cleanly.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use realtime_client::{
    ClientConfig, ClientEvent, ConnectionState, LifecycleEvent, Message, MessageKind,
    RealtimeClient,
};

fn application_kinds() -> Vec<MessageKind> {
    vec![
        MessageKind::NewEmail,
        MessageKind::NewReferral,
        MessageKind::ReferralUpdated,
        MessageKind::SystemAlert,
        MessageKind::Statistics,
        MessageKind::ProcessingStatus,
    ]
}

#[derive(Parser)]
#[command(name = "listen", version, about = "Print realtime notifications as JSON lines")]
struct Cli {
    /// YAML client config (camelCase keys, durations in milliseconds)
    #[arg(long)]
    config: Option<PathBuf>,
    /// WebSocket endpoint; overrides the config file
    #[arg(long, env = "REALTIME_ENDPOINT")]
    endpoint: Option<String>,
    /// Room to join in addition to the default room (repeatable)
    #[arg(long = "room")]
    rooms: Vec<String>,
    /// Message kind to print (repeatable); every application kind if omitted
    #[arg(long = "kind")]
    kinds: Vec<String>,
}

fn print_message(msg: &Message) {
    let line = serde_json::json!({
        "type": msg.kind.as_str(),
        "timestamp": msg.timestamp.to_rfc3339(),
        "room": msg.room,
        "data": msg.data,
    });
    println!("{line}");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => realtime_client::config::load(path).await?,
        None => ClientConfig::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }

    let endpoint = config.endpoint.clone();
    let client = RealtimeClient::new(config)?;
    let consumer = client.subscriber();
    let kinds: Vec<MessageKind> = if cli.kinds.is_empty() {
        application_kinds()
    } else {
        cli.kinds.into_iter().map(MessageKind::from).collect()
    };
    for kind in kinds {
        let _ = consumer.subscribe(kind, print_message);
    }

    let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
    client.attach_lifecycle(lifecycle_rx);

    let mut events = client.events();
    eprintln!("connecting to {endpoint} ...");
    client.connect();
    for room in cli.rooms {
        client.join_room(room);
    }

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                eprintln!("[terminate]");
                let _ = lifecycle_tx.send(LifecycleEvent::Terminate);
                break;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Connected) => eprintln!("[connected] rooms={:?}", client.joined_rooms()),
                Ok(ClientEvent::Disconnected { reason }) => {
                    eprintln!("[disconnected] {}", reason.as_deref().unwrap_or("-"));
                }
                Ok(ClientEvent::ServerError { message }) => eprintln!("[server error] {message}"),
                Ok(ClientEvent::ReconnectExhausted { attempts }) => {
                    return Err(format!("gave up after {attempts} reconnect attempts").into());
                }
                Err(RecvError::Lagged(skipped)) => eprintln!("[lagged] skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let mut state = client.state_changes();
    state.wait_for(|s| *s == ConnectionState::Closed).await?;
    drop(consumer);
    Ok(())
}
