// ===============================
// src/main.rs
// ===============================
/*
 # create a room and join it right away
 cargo run -- create-room --join

 # join an existing room
 NICKNAME=alice cargo run -- join AB12CD34EF

 # what the session is doing
 curl -s localhost:9899/metrics | egrep '^(frames_|tx_|round_)'
*/
use std::time::Instant;

use clap::{Parser, Subcommand};
use rand::Rng;
use tokio::{
    select,
    sync::{broadcast, mpsc, oneshot, watch},
    time::Duration,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use party_sync::config;
use party_sync::connection::{self, Credentials};
use party_sync::console::{self, Input, HELP};
use party_sync::domain::{Cue, Event, RoomCode};
use party_sync::lobby;
use party_sync::metrics::{self, RECONNECTS};
use party_sync::recorder;
use party_sync::session::{Command, Session, SessionIo, SessionSnapshot};

#[derive(Parser, Debug)]
#[command(name = "party_sync", version, about = "Headless client for the party economy game")]
struct Cli {
    /// Nickname override (default: NICKNAME)
    #[arg(short, long)]
    nickname: Option<String>,

    /// Game server websocket URL override (default: SERVER_WS_URL)
    #[arg(short, long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    #[command(about = "Ask the lobby for a new room and print its code")]
    CreateRoom {
        #[arg(long, help = "Join the new room right away")]
        join: bool,
    },
    #[command(about = "Join an existing room")]
    Join {
        #[arg(help = "10-character room code")]
        room: String,
    },
}

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 32_000;

/// 0.5 s * 2^attempt, capped at 32 s, plus up to 250 ms of jitter.
fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
    let jitter = rand::thread_rng().gen_range(0..=250);
    Duration::from_millis(exp.min(BACKOFF_CAP_MS) + jitter)
}

async fn forward(input: Input, cmd_tx: &mpsc::Sender<Command>) {
    let cmd = match input {
        Input::Tx(req) => {
            let (reply_tx, reply_rx) = oneshot::channel();
            let kind = req.kind();
            tokio::spawn(async move {
                match reply_rx.await {
                    Ok(Ok(())) => info!(%kind, "request sent"),
                    Ok(Err(e)) => warn!(%kind, error = %e, "request rejected"),
                    Err(_) => debug!(%kind, "session ended before answering"),
                }
            });
            Command::Submit(req, reply_tx)
        }
        Input::Move(delta) => Command::Move(delta),
        Input::Chat(text) => Command::Chat(text),
        Input::Ready => Command::RenderedComplete,
        Input::Quit => Command::Leave,
        Input::Help => {
            info!("{HELP}");
            return;
        }
    };
    let _ = cmd_tx.send(cmd).await;
}

// Log what changed between consecutive snapshots.
async fn log_snapshots(mut rx: watch::Receiver<SessionSnapshot>) {
    let mut last = rx.borrow_and_update().clone();
    while rx.changed().await.is_ok() {
        let snap = rx.borrow_and_update().clone();
        if snap.status != last.status {
            info!(status = ?snap.status, room = %snap.room, "connection");
        }
        if snap.round.phase != last.round.phase || snap.round.round != last.round.round {
            info!(
                phase = ?snap.round.phase,
                round = snap.round.round,
                remaining = snap.round.remaining_secs,
                "round"
            );
        }
        if snap.players.len() != last.players.len() {
            info!(players = snap.players.len(), "remote players");
        }
        for item in &snap.notices {
            if !last.notices.iter().any(|o| o.kind == item.kind && o.created == item.created) {
                info!(
                    kind = item.kind.as_str(),
                    title = %item.payload.title,
                    content = %item.payload.content,
                    amount = ?item.payload.amount,
                    "notice"
                );
            }
        }
        for entry in &snap.ledger {
            if !last.ledger.contains(entry) {
                info!(
                    kind = %entry.kind,
                    status = ?entry.status,
                    message = ?entry.message,
                    "transaction"
                );
            }
        }
        if snap.chat.len() != last.chat.len() || snap.chat.last() != last.chat.last() {
            if let Some(line) = snap.chat.last() {
                info!(from = %line.sender, "{}", line.message);
            }
        }
        if snap.results.is_some() && last.results.is_none() {
            for r in snap.results.iter().flatten() {
                info!(nickname = %r.nickname, net_worth = r.net_worth, "final result");
            }
        }
        last = snap;
    }
}

async fn log_cues(mut rx: broadcast::Receiver<Cue>) {
    loop {
        match rx.recv().await {
            Ok(cue) => debug!(?cue, "cue"),
            Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "cue log lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ---- Config ----
    let cli = Cli::parse();
    let mut cfg = config::load();
    if let Some(n) = cli.nickname {
        cfg.nickname = n;
    }
    if let Some(s) = cli.server {
        cfg.server_ws_url = s;
    }

    // ---- Metrics ----
    metrics::init();
    metrics::serve_metrics(cfg.metrics_port);

    info!(
        server = %cfg.server_ws_url,
        lobby = %cfg.lobby_url,
        nickname = %cfg.nickname,
        character = cfg.character.0,
        tx_timeout_ms = cfg.tx_timeout.as_millis() as u64,
        tick_ms = cfg.tick.as_millis() as u64,
        "startup config"
    );

    // ---- Room ----
    let room = match cli.command {
        Cmd::CreateRoom { join } => {
            let http = reqwest::Client::new();
            let code = lobby::create_room(&http, &cfg.lobby_url, &cfg.nickname).await?;
            println!("{code}");
            if !join {
                return Ok(());
            }
            code
        }
        Cmd::Join { room } => RoomCode::parse(&room)?,
    };

    // ---- Recorder (optional) ----
    let rec_tx = cfg.record_file.clone().map(|path| {
        let (tx, rx) = mpsc::channel::<Event>(8192);
        tokio::spawn(recorder::run(rx, path));
        tx
    });

    // ---- Console + cues ----
    let (input_tx, mut input_rx) = mpsc::channel::<Input>(64);
    tokio::spawn(console::run(input_tx));
    let (cue_tx, cue_rx) = broadcast::channel::<Cue>(64);
    tokio::spawn(log_cues(cue_rx));
    info!("{HELP}");

    // ---- Session, reconnecting on connection loss ----
    let creds = Credentials { room, identity: cfg.identity() };
    let mut attempt: u32 = 0;
    let mut console_open = true;

    loop {
        let conn = match connection::connect(&cfg.server_ws_url, creds.clone()).await {
            Ok(conn) => conn,
            Err(e) => {
                let wait = backoff(attempt);
                warn!(
                    error = %e,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "connect failed, retrying"
                );
                attempt = attempt.saturating_add(1);
                RECONNECTS.inc();
                tokio::time::sleep(wait).await;
                continue;
            }
        };
        attempt = 0;

        let session = Session::new(conn, cfg.tx_timeout, cfg.tick);
        let (snap_tx, snap_rx) = watch::channel(session.snapshot(Instant::now()));
        tokio::spawn(log_snapshots(snap_rx));
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);
        let io = SessionIo {
            commands: cmd_rx,
            snapshots: snap_tx,
            cues: cue_tx.clone(),
            recorder: rec_tx.clone(),
        };
        let mut task = tokio::spawn(session.run(io));

        let outcome = loop {
            select! {
                res = &mut task => break res,
                input = input_rx.recv(), if console_open => match input {
                    Some(input) => forward(input, &cmd_tx).await,
                    None => {
                        console_open = false;
                        let _ = cmd_tx.send(Command::Leave).await;
                    }
                },
            }
        };

        match outcome {
            Ok(Ok(())) => {
                info!("bye");
                return Ok(());
            }
            Ok(Err(e)) => {
                let wait = backoff(attempt);
                warn!(error = %e, wait_ms = wait.as_millis() as u64, "session lost, reconnecting");
                attempt = attempt.saturating_add(1);
                RECONNECTS.inc();
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                error!(?e, "session task failed");
                return Err(e.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let cases =
            [(0u32, 500u64), (1, 1000), (3, 4000), (6, 32_000), (7, 32_000), (40, 32_000)];
        for (attempt, base) in cases {
            let ms = backoff(attempt).as_millis() as u64;
            assert!((base..=base + 250).contains(&ms), "attempt {attempt}: {ms}ms");
        }
    }

    #[test]
    fn cli_parses_both_subcommands() {
        let cli = Cli::try_parse_from(["party_sync", "-n", "bob", "join", "AB12CD34EF"]).unwrap();
        assert_eq!(cli.nickname.as_deref(), Some("bob"));
        assert!(matches!(cli.command, Cmd::Join { ref room } if room == "AB12CD34EF"));

        let cli = Cli::try_parse_from(["party_sync", "create-room", "--join"]).unwrap();
        assert!(matches!(cli.command, Cmd::CreateRoom { join: true }));
    }
}
