//! Minimal terminal client for the Gather chat service.
//!
//! Seeds state from the REST collaborator, opens the socket transport, then
//! runs a select loop: classified events update the reducer and print, stdin
//! lines become send intents for the active room. `/read` marks the active
//! room read; `/quit` (or EOF) tears the link down.

use anyhow::{Result, bail};
use clap::Parser;
use gather_chat::protocol::ClientEnvelope;
use gather_chat::rest::HistoryClient;
use gather_chat::session::{Credential, Session};
use gather_chat::state::ChatState;
use gather_chat::transport::Transport;
use gather_chat::ServerEvent;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "gather-cli", about = "Terminal client for Gather chat")]
struct Args {
    /// Socket endpoint (ws:// or wss://).
    #[arg(long, env = "GATHER_SOCKET_URL")]
    socket_url: Option<String>,
    /// REST base URL.
    #[arg(long, env = "GATHER_API_URL")]
    api_url: Option<String>,
    /// Bearer credential.
    #[arg(long, env = "GATHER_TOKEN")]
    token: Option<String>,
    /// Authenticated user id (drives is_mine).
    #[arg(long, env = "GATHER_USER_ID")]
    user_id: Option<String>,
    /// Room to make active; defaults to the first room listed.
    #[arg(long)]
    room: Option<String>,
    /// History page size for the initial fetch.
    #[arg(long, default_value_t = gather_chat::rest::DEFAULT_HISTORY_LIMIT)]
    history: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut session = Session::load();
    let socket_url = args
        .socket_url
        .or_else(|| session.socket_url.clone())
        .unwrap_or_else(|| "wss://chat.gather.app/socket".to_string());
    let api_url = args
        .api_url
        .or_else(|| session.api_url.clone())
        .unwrap_or_else(|| "https://api.gather.app/v1/".to_string());
    let Some(token) = args.token.or_else(|| session.token.clone()) else {
        bail!("no credential: pass --token or set GATHER_TOKEN");
    };
    let user_id = args
        .user_id
        .or_else(|| session.user_id.clone())
        .unwrap_or_default();
    let credential = Credential::new(token)?;

    session.socket_url = Some(socket_url.clone());
    session.api_url = Some(api_url.clone());
    session.token = Some(credential.as_str().to_string());
    session.user_id = Some(user_id.clone());
    session.save();

    let mut state = ChatState::new(&user_id);

    // Seed rooms and the active room's history over REST.
    let api = HistoryClient::new(&api_url, credential.clone())?;
    match api.rooms().await {
        Ok(rooms) => state.replace_rooms(rooms),
        Err(error) => tracing::warn!(%error, "room list fetch failed"),
    }
    let active = args
        .room
        .or_else(|| state.rooms().next().map(|r| r.id.clone()));
    if let Some(room_id) = &active {
        match api.history(room_id, args.history).await {
            Ok(batch) => state.merge_history(room_id, batch),
            Err(error) => tracing::warn!(%error, room_id, "history fetch failed"),
        }
        for msg in state.messages(room_id) {
            println!("[{room_id}] {}: {}", msg.sender.name, msg.content);
        }
    }
    println!(
        "* {} rooms, {} unread total",
        state.rooms().count(),
        state.total_unread()
    );

    let mut transport = Transport::new(&socket_url)?;
    let (_sub, mut events) = transport.subscribe();
    let mut link = transport.state_changes();
    transport.connect(credential);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                eprintln!("* link {:?}", *link.borrow());
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
                let badge = matches!(event, ServerEvent::Badge { .. });
                state.apply(event);
                if badge {
                    println!("* {} unread total", state.total_unread());
                }
            }
            line = stdin.next_line() => {
                match line? {
                    None => break,
                    Some(line) => {
                        if !handle_line(&transport, &mut state, &active, line.trim()) {
                            break;
                        }
                    }
                }
            }
        }
    }

    transport.shutdown().await;
    session.save();
    Ok(())
}

/// Returns false when the loop should exit.
fn handle_line(
    transport: &Transport,
    state: &mut ChatState,
    active: &Option<String>,
    line: &str,
) -> bool {
    if line == "/quit" {
        return false;
    }
    if line.is_empty() {
        return true;
    }
    let Some(room_id) = active else {
        eprintln!("no active room; restart with --room");
        return true;
    };
    if line == "/read" {
        if let Some(last) = state.messages(room_id).last() {
            transport.send(ClientEnvelope::Read {
                room_id: room_id.clone(),
                last_msg_id: last.id.clone(),
            });
        }
        state.mark_read(room_id);
        println!("* {} unread total", state.total_unread());
        return true;
    }
    let outcome = transport.send(ClientEnvelope::Send {
        room_id: room_id.clone(),
        content: line.to_string(),
    });
    tracing::debug!(?outcome, "send");
    true
}

fn print_event(event: &ServerEvent) {
    match event {
        ServerEvent::Message { room_id, payload } => {
            println!("[{room_id}] {}: {}", payload.sender.name, payload.content);
        }
        ServerEvent::Typing {
            room_id,
            username,
            state: true,
        } => println!("* {username} is typing in {room_id}"),
        ServerEvent::Typing { .. } => {}
        ServerEvent::Init { rooms } => println!("* room list: {} rooms", rooms.len()),
        ServerEvent::Badge { room_id, unread } => println!("* {room_id}: {unread} unread"),
        ServerEvent::Pong | ServerEvent::Unrecognized => {}
    }
}
