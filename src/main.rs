//! # skillroom
//!
//! `serve` runs the relay server, `join` runs a terminal participant and
//! `identity` manages the stored local identity.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use skillroom_core::SessionId;
use skillroom_room::{LiveSession, Participant, RoomConfig, RoomDeps, RoomEvent};
use skillroom_server::{RoomServer, ServerConfig};
use skillroom_settings::{load_settings_from_path, settings_dir, settings_path, SkillroomSettings};
use skillroom_store::{Database, IdentityRepo};
use skillroom_telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

const DEFAULT_NAME: &str = "Learner";

#[derive(Parser, Debug)]
#[command(name = "skillroom", version, about = "Peer-assisted live-session room")]
struct Cli {
    /// Settings file (defaults to ~/.skillroom/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server until ctrl-c.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides settings, 0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Join a session as a terminal participant without camera or microphone.
    Join {
        session: String,
        /// Relay server base URL (overrides settings).
        #[arg(long)]
        url: Option<String>,
        /// Display name (stored for next time).
        #[arg(long)]
        name: Option<String>,
    },
    /// Show or forget the stored identity.
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum IdentityAction {
    Show,
    Reset,
}

fn resolve_under_settings_dir(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        settings_dir().join(path)
    }
}

fn telemetry(settings: &SkillroomSettings) -> Result<TelemetryGuard> {
    let logging = &settings.logging;
    let log_level = TelemetryConfig::parse_level(&logging.level).unwrap_or(Level::INFO);
    let guard = init_telemetry(TelemetryConfig {
        log_level,
        json: logging.json,
        log_to_sqlite: logging.persist_warnings,
        log_db_path: resolve_under_settings_dir(&logging.db_path),
        ..TelemetryConfig::default()
    })?;
    Ok(guard)
}

fn identity_repo() -> Result<IdentityRepo> {
    let db = Database::open(&settings_dir().join("identity.db")).context("failed to open identity database")?;
    Ok(IdentityRepo::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    let _telemetry = telemetry(&settings)?;

    match cli.command {
        Command::Serve { host, port } => serve(settings, host, port).await,
        Command::Join { session, url, name } => join(settings, session, url, name).await,
        Command::Identity { action } => identity(&action),
    }
}

async fn serve(settings: SkillroomSettings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let provider = skillroom_assist::build_provider(&settings.assistant, |name| std::env::var(name).ok())
        .context("failed to configure the answer provider")?;

    let mut config = ServerConfig::from_settings(&settings);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let server = RoomServer::new(config, provider);
    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    info!("skillroom relay listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    server.stop(handle).await;
    Ok(())
}

fn identity(action: &IdentityAction) -> Result<()> {
    let repo = identity_repo()?;
    match action {
        IdentityAction::Show => match repo.load()? {
            Some(identity) => {
                println!("participant id: {}", identity.participant_id);
                println!("display name:   {}", identity.display_name);
                println!("created:        {}", identity.created_at);
            }
            None => println!("no identity stored yet; one is created on first join"),
        },
        IdentityAction::Reset => {
            if repo.reset()? {
                println!("identity removed; a new one is created on next join");
            } else {
                println!("no identity stored");
            }
        }
    }
    Ok(())
}

async fn join(
    mut settings: SkillroomSettings,
    session: String,
    url: Option<String>,
    name: Option<String>,
) -> Result<()> {
    if let Some(url) = url {
        settings.client.server_url = url;
    }

    let repo = identity_repo()?;
    let fallback = settings.client.display_name.as_deref().unwrap_or(DEFAULT_NAME);
    let mut identity = repo.load_or_create(name.as_deref().unwrap_or(fallback))?;
    if let Some(name) = name.filter(|n| *n != identity.display_name) {
        identity = repo.rename(&name)?;
    }
    let local = Participant::new(identity.participant_id, identity.display_name);

    let deps = RoomDeps::terminal(&settings);
    let config = RoomConfig::from_settings(&settings);
    let mut room = LiveSession::join(deps, config, SessionId::from_raw(session), local)
        .await
        .with_context(|| format!("failed to reach {}", settings.client.server_url))?;

    for message in room.chat().messages() {
        println!("[{}] {}", message.sender, message.content);
    }
    println!("joined {} as {}; /help for commands", room.session_id(), room.local().display_name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line.context("failed to read stdin")?),
            event = room.next_event() => Input::Event(event),
            _ = tokio::signal::ctrl_c() => Input::Line(None),
        };
        match input {
            Input::Line(None) => break,
            Input::Line(Some(line)) => {
                if run_command(&mut room, line.trim()).await == Flow::Quit {
                    break;
                }
            }
            Input::Event(Some(event)) => print_event(&room, &event),
            Input::Event(None) => {
                println!("! disconnected from server");
                break;
            }
        }
    }

    room.close().await;
    Ok(())
}

enum Input {
    Line(Option<String>),
    Event(Option<RoomEvent>),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

const HELP: &str = "\
plain text          send a chat message
/ask [question]     ask the AI assistant (no question: ask about the code)
/code <text>        replace the shared code
/lang <tag>         set the code language
/run                run the code
/save <dir>         save the code to a directory
/share <path>       share a file
/mic on|off         mute or unmute the microphone
/camera on|off      turn the camera on or off
/quit               leave the session";

async fn run_command(room: &mut LiveSession, line: &str) -> Flow {
    if line.is_empty() {
        return Flow::Continue;
    }
    let Some(command) = line.strip_prefix('/') else {
        let _ = room.send_chat(line).await;
        return Flow::Continue;
    };
    let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
    let arg = arg.trim();

    match name {
        "quit" | "exit" => return Flow::Quit,
        "help" => println!("{HELP}"),
        "ask" => {
            let answer = if arg.is_empty() {
                room.ask_for_code_help().await
            } else {
                room.ask_ai(arg).await
            };
            match answer {
                Ok(Some(turn)) => println!("[AI] {}", turn.content),
                Ok(None) => {}
                Err(e) => println!("! {e}"),
            }
        }
        "code" => {
            let revision = room.edit_code(&arg.replace("\\n", "\n")).await;
            println!("* code updated (revision {revision})");
        }
        "lang" => {
            let revision = room.set_language(arg).await;
            println!("* language is {} (revision {revision})", room.code().language().tag());
        }
        "run" => {
            println!("* running...");
            let result = room.run_code().await;
            if result.succeeded() {
                print!("{}", result.output);
            } else {
                println!("! {}", result.error);
            }
        }
        "save" => {
            let dir = if arg.is_empty() { "." } else { arg };
            match room.save_code(Path::new(dir)) {
                Ok(path) => println!("* saved {}", path.display()),
                Err(e) => println!("! {e}"),
            }
        }
        "share" => match room.share_path(Path::new(arg)).await {
            Ok(file_id) => println!("* shared {arg} as {file_id}"),
            Err(e) => println!("! {e}"),
        },
        "mic" | "camera" => match parse_switch(arg) {
            Some(enabled) => {
                let applied = if name == "mic" {
                    room.set_audio_enabled(enabled)
                } else {
                    room.set_video_enabled(enabled)
                };
                if applied {
                    println!("* {name} {}", if enabled { "on" } else { "off" });
                } else {
                    println!("! no local media in this session");
                }
            }
            None => println!("! usage: /{name} on|off"),
        },
        other => {
            warn!(command = other, "unknown command");
            println!("! unknown command /{other}\n{HELP}");
        }
    }
    Flow::Continue
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn print_event(room: &LiveSession, event: &RoomEvent) {
    match event {
        RoomEvent::Joined { participants } => println!("* {participants} in the room"),
        RoomEvent::PeerJoined(peer) => println!("* {} joined", peer.display_name),
        RoomEvent::PeerLeft(participant) => println!("* {participant} left"),
        RoomEvent::Chat(message) => println!("[{}] {}", message.sender, message.content),
        RoomEvent::FileOffered { name, .. } => println!("* receiving {name}"),
        RoomEvent::FileProgress { .. } => {}
        RoomEvent::FileReceived(file_id) => {
            if let Some(record) = room.chat().file(file_id) {
                println!("* received {} ({} bytes)", record.offer.name, record.offer.size);
            }
        }
        RoomEvent::FileCorrupt { file_id, reason } => println!("! file {file_id} discarded: {reason}"),
        RoomEvent::CodeSynced { revision, author } => {
            println!("* code updated by {author} (revision {revision})");
        }
        RoomEvent::IdentityRejected { reason, retry } => match retry {
            Some(id) => println!("! identity rejected ({reason}), rejoined as {id}"),
            None => println!("! identity rejected: {reason}"),
        },
        RoomEvent::ServerError { code, message } => println!("! server error {code}: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_are_optional() {
        let cli = Cli::parse_from(["skillroom", "serve"]);
        assert!(matches!(cli.command, Command::Serve { host: None, port: None }));

        let cli = Cli::parse_from(["skillroom", "serve", "--host", "0.0.0.0", "--port", "4100"]);
        match cli.command {
            Command::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(4100));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn join_takes_session_and_overrides() {
        let cli = Cli::parse_from([
            "skillroom",
            "--config",
            "/tmp/s.json",
            "join",
            "room-42",
            "--url",
            "http://tutor:4000",
            "--name",
            "Ada",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json")));
        match cli.command {
            Command::Join { session, url, name } => {
                assert_eq!(session, "room-42");
                assert_eq!(url.as_deref(), Some("http://tutor:4000"));
                assert_eq!(name.as_deref(), Some("Ada"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn identity_actions_parse() {
        let cli = Cli::parse_from(["skillroom", "identity", "reset"]);
        assert!(matches!(cli.command, Command::Identity { action: IdentityAction::Reset }));
        assert!(Cli::try_parse_from(["skillroom", "identity", "forget"]).is_err());
    }

    #[test]
    fn media_switches_parse_on_and_off() {
        assert_eq!(parse_switch("on"), Some(true));
        assert_eq!(parse_switch("off"), Some(false));
        assert_eq!(parse_switch(""), None);
        assert_eq!(parse_switch("maybe"), None);
    }

    #[test]
    fn relative_log_paths_live_under_settings_dir() {
        assert_eq!(resolve_under_settings_dir("logs.db"), settings_dir().join("logs.db"));
        assert_eq!(resolve_under_settings_dir("/var/log/s.db"), PathBuf::from("/var/log/s.db"));
    }
}
