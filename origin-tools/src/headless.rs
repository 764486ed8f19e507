//! Headless console for the extension.
//!
//! Stands in for the transport host: transport traffic is replayed from
//! stdin as JSON lines and every packet the engine sends is printed.
//!
//! - Lines starting with `#` are operator commands (copy, follow, save, ...)
//! - Any other line is one JSON feed event (see [`FeedEvent`])
//! - Output lines are tagged: `[SEND]`, `[BLOCKED]`, `[LOG]`, `[USERS]`, `[CHAT]`

use origin_core::protocol::{ClientInfo, Profile, RoomEntity};
use origin_core::{
    EntityList, Intercept, JsonOutfitStore, Notification, OutboundPacket, Packet, PacketSender,
    Session, SessionConfig, SessionError, TransportError, TransportEvent, Verdict, EXTENSION_INFO,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

/// Environment variable overriding the outfit file location.
pub const OUTFITS_ENV: &str = "ORIGIN_TOOLS_OUTFITS";

/// Console options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsoleConfig {
    /// Outfit file; the per-user default when absent.
    pub outfits: Option<PathBuf>,
    /// Room poll interval override.
    pub poll_interval: Option<Duration>,
}

impl ConsoleConfig {
    fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::new();
        match self.poll_interval {
            Some(interval) => config.with_poll_interval(interval),
            None => config,
        }
    }

    fn outfit_store(&self) -> Result<JsonOutfitStore, SessionError> {
        match &self.outfits {
            Some(path) => Ok(JsonOutfitStore::new(path)),
            None => Ok(JsonOutfitStore::at_default_location()?),
        }
    }
}

/// One line of the transport replay feed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedEvent {
    Initialized { connected: bool },
    Activated,
    Connected {
        host: String,
        port: u16,
        client: ClientInfo,
    },
    Disconnected,
    /// An intercepted packet, inbound or outbound.
    Packet(Packet),
    EntitiesAdded(Vec<RoomEntity>),
    EntityUpdated(RoomEntity),
    EntityRemoved(i32),
    RoomCleared,
    ProfileUpdated(Profile),
}

/// Prints packets instead of sending them.
struct StdoutTransport;

impl PacketSender for StdoutTransport {
    fn send(&self, packet: OutboundPacket) -> Result<(), TransportError> {
        let json =
            serde_json::to_string(&packet).map_err(|e| TransportError::Rejected(e.to_string()))?;
        println!("[SEND] {json}");
        Ok(())
    }
}

enum Flow {
    Continue,
    Quit,
}

/// Run the console until `#quit` or end of input.
pub async fn run_console(config: ConsoleConfig) -> Result<(), SessionError> {
    let store = config.outfit_store()?;
    let outfit_path = store.path().to_path_buf();
    let room = Arc::new(EntityList::new());

    let (session, notifications) = Session::new(
        config.session_config(),
        Arc::new(StdoutTransport),
        room.clone(),
        Arc::new(store),
    );
    let printer = tokio::spawn(print_notifications(notifications));

    let (events, events_rx) = mpsc::unbounded_channel();
    let engine = {
        let session = session.clone();
        tokio::spawn(async move { session.run(UnboundedReceiverStream::new(events_rx)).await })
    };

    println!("=== {} {} ===", EXTENSION_INFO.title, EXTENSION_INFO.version);
    println!("{}", EXTENSION_INFO.description);
    println!("Outfits: {}", outfit_path.display());
    println!();
    print_commands();
    println!();
    info!(outfits = %outfit_path.display(), "console started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            match run_command(&session, command).await {
                Flow::Quit => break,
                Flow::Continue => continue,
            }
        }

        match serde_json::from_str::<FeedEvent>(line) {
            Ok(event) => {
                if !feed(&room, &events, event).await {
                    warn!("engine stopped, ending console");
                    break;
                }
            }
            Err(e) => println!("[ERROR] Bad feed line: {e}"),
        }
    }

    drop(events);
    if let Err(e) = engine.await {
        warn!(error = %e, "engine task failed");
    }
    drop(session);
    if let Err(e) = printer.await {
        warn!(error = %e, "notification printer failed");
    }
    Ok(())
}

/// Forward one feed event. Returns false once the engine is gone.
async fn feed(
    room: &EntityList,
    events: &mpsc::UnboundedSender<TransportEvent>,
    event: FeedEvent,
) -> bool {
    let event = match event {
        FeedEvent::Initialized { connected } => TransportEvent::Initialized { connected },
        FeedEvent::Activated => TransportEvent::Activated,
        FeedEvent::Connected { host, port, client } => {
            TransportEvent::Connected { host, port, client }
        }
        FeedEvent::Disconnected => TransportEvent::Disconnected,
        FeedEvent::Packet(packet) => {
            let (reply, verdict) = oneshot::channel();
            let intercept = Intercept::new(packet).with_reply(reply);
            if events.send(TransportEvent::Intercept(intercept)).is_err() {
                return false;
            }
            if let Ok(Verdict::Block) = verdict.await {
                println!("[BLOCKED]");
            }
            return true;
        }
        FeedEvent::EntitiesAdded(entities) => {
            room.upsert(entities.iter().cloned()).await;
            TransportEvent::EntitiesAdded(entities)
        }
        FeedEvent::EntityUpdated(entity) => {
            room.upsert([entity.clone()]).await;
            TransportEvent::EntityUpdated(entity)
        }
        FeedEvent::EntityRemoved(index) => {
            room.remove(index).await;
            return true;
        }
        FeedEvent::RoomCleared => {
            room.clear().await;
            return true;
        }
        FeedEvent::ProfileUpdated(profile) => TransportEvent::ProfileUpdated(profile),
    };

    events.send(event).is_ok()
}

async fn run_command(session: &Session, line: &str) -> Flow {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["quit"] | ["exit"] => {
            println!("Goodbye!");
            return Flow::Quit;
        }
        ["copy", username] => {
            session.copy_outfit(username).await;
        }
        ["follow", username] => session.follow_user(username).await,
        ["unfollow"] => session.stop_following().await,
        ["mimic", "on"] => session.mimic_on(),
        ["mimic", "off"] => session.mimic_off().await,
        ["followmode", "on"] => session.follow_on(),
        ["followmode", "off"] => session.follow_off(),
        ["save", figure, name @ ..] if !name.is_empty() => {
            session.save_outfit(&name.join(" "), figure).await;
        }
        ["capture", username, name @ ..] if !name.is_empty() => {
            session
                .save_outfit_from_username(username, &name.join(" "))
                .await;
        }
        ["apply", name @ ..] if !name.is_empty() => {
            session.apply_outfit(&name.join(" ")).await;
        }
        ["outfits"] => {
            let names = session.outfit_names().await;
            println!("[OUTFITS] {}", names.join(", "));
        }
        ["users"] => {
            let users = session.load_users().await;
            println!("[USERS] {}", users.join(", "));
        }
        ["status"] => {
            let status = session.status().await;
            println!("[STATUS]");
            println!("  Target: {}", status.target.as_deref().unwrap_or("(none)"));
            println!("  Mimic: {}", on_off(status.mimic_enabled));
            println!("  Follow: {}", on_off(status.follow_enabled));
            if status.mute.active {
                println!("  Muted: {}s left", status.mute.remaining_seconds);
            } else {
                println!("  Muted: no");
            }
            println!("  Room: {}", status.room_id.as_deref().unwrap_or("(unknown)"));
            if let Some(name) = &status.own_name {
                println!("  Me: {name}");
            }
            println!("  Users: {}", status.users);
        }
        ["help"] => print_commands(),
        _ => println!("[ERROR] Unknown command. Type #help for help."),
    }
    Flow::Continue
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

async fn print_notifications(mut notifications: mpsc::UnboundedReceiver<Notification>) {
    let mut last_users: Option<Vec<String>> = None;

    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::LogUpdated(log) => {
                if let Some(line) = log.lines().last() {
                    println!("[LOG] {line}");
                }
            }
            Notification::UsersUpdated(users) => {
                // The poller republishes every tick.
                if last_users.as_ref() != Some(&users) {
                    println!("[USERS] {}", users.join(", "));
                    last_users = Some(users);
                }
            }
            Notification::Chat(event) if event.kind.is_speech() => {
                println!("[CHAT] [{}] {}", event.username, event.message);
            }
            Notification::Chat(_) => {}
        }
    }
}

fn print_commands() {
    println!("Commands:");
    println!("  #copy <user>            - Wear a user's outfit");
    println!("  #follow <user>          - Follow and mimic a user");
    println!("  #unfollow               - Stop following");
    println!("  #mimic on|off           - Toggle mimicking");
    println!("  #followmode on|off      - Toggle following movement");
    println!("  #save <figure> <name>   - Save a figure as a preset");
    println!("  #capture <user> <name>  - Save a user's outfit as a preset");
    println!("  #apply <name>           - Wear a preset");
    println!("  #outfits                - List presets");
    println!("  #users                  - List users in the room");
    println!("  #status                 - Show current status");
    println!("  #help                   - Show this help");
    println!("  #quit                   - Exit");
    println!("  (anything else is read as a JSON feed event)");
}

/// Parse console options from command line arguments and the environment.
pub fn parse_config_from_args(args: &[String]) -> ConsoleConfig {
    let mut config = ConsoleConfig {
        outfits: std::env::var_os(OUTFITS_ENV).map(PathBuf::from),
        poll_interval: None,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--outfits" => {
                if let Some(path) = args.get(i + 1) {
                    config.outfits = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            "--poll-ms" => {
                if let Some(ms) = args.get(i + 1) {
                    match ms.parse::<u64>() {
                        Ok(ms) if ms > 0 => config.poll_interval = Some(Duration::from_millis(ms)),
                        _ => warn!(value = %ms, "ignoring invalid --poll-ms"),
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    config
}
