// ===============================
// src/session.rs
// ===============================
//
// One task owns the connection and every store. It wakes on exactly four
// things: an inbound frame, a local tick, the earliest notification/ledger
// deadline, or a UI command. After each wake it publishes a fresh snapshot.
// Dropping the session drops every deadline with it.
//

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::connection::{ConnStatus, ConnectionError, ConnectionHandle, SendError};
use crate::domain::{
    ChatLine, ChatOut, Cue, EnterGame, Event, Outbound, PlayerDelta, PlayerResult, RoomCode,
    TxRequest,
};
use crate::ledger::{LedgerEntry, LedgerError};
use crate::metrics::TX_REJECTED;
use crate::notify::NotificationItem;
use crate::players::RemotePlayer;
use crate::round::RoundView;
use crate::router::{Dispatch, Effects, Router, Stores};

#[derive(Debug)]
pub enum Command {
    Submit(TxRequest, oneshot::Sender<Result<(), LedgerError>>),
    Move(PlayerDelta),
    Chat(String),
    RenderedComplete,
    Leave,
}

/// Point-in-time view of the whole session for the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: ConnStatus,
    pub room: RoomCode,
    #[serde(skip)]
    pub players: Arc<[RemotePlayer]>,
    pub round: RoundView,
    #[serde(skip)]
    pub notices: Vec<NotificationItem>,
    pub ledger: Vec<LedgerEntry>,
    pub chat: Vec<ChatLine>,
    pub results: Option<Vec<PlayerResult>>,
}

pub struct SessionIo {
    pub commands: mpsc::Receiver<Command>,
    pub snapshots: watch::Sender<SessionSnapshot>,
    pub cues: broadcast::Sender<Cue>,
    pub recorder: Option<mpsc::Sender<Event>>,
}

enum Wake {
    Frame(Option<String>),
    Tick,
    Deadline,
    Command(Option<Command>),
}

pub struct Session {
    conn: ConnectionHandle,
    stores: Stores,
    router: Router,
    tick: Duration,
    recorder: Option<mpsc::Sender<Event>>,
}

impl Session {
    pub fn new(conn: ConnectionHandle, tx_timeout: Duration, tick: Duration) -> Self {
        let me = conn.credentials().identity.clone();
        Self {
            conn,
            stores: Stores::new(me, tx_timeout),
            router: Router::new(),
            tick,
            recorder: None,
        }
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let s = &self.stores;
        SessionSnapshot {
            status: self.conn.status(),
            room: self.conn.credentials().room.clone(),
            players: s.players.snapshot(),
            round: s.round.view(),
            notices: s.notices.active(now),
            ledger: s.ledger.entries(),
            chat: s.chat.iter().cloned().collect(),
            results: s.results.clone(),
        }
    }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.recorder {
            let _ = tx.try_send(ev);
        }
    }

    fn send(&self, msg: &Outbound) -> Result<(), SendError> {
        let frame = self.conn.send(msg)?;
        self.record(Event::outbound(frame));
        Ok(())
    }

    /// Dispatch one raw inbound frame.
    pub fn handle_frame(&mut self, raw: &str, now: Instant) -> Effects {
        self.record(Event::inbound(raw));
        let mut fx = Effects::default();
        let outcome = self.router.dispatch(&mut self.stores, raw, now, &mut fx);
        if let Dispatch::UnknownTag(tag) = outcome {
            self.record(Event::note(format!("unhandled tag {tag}")));
        }
        for d in &fx.declined {
            info!(kind = %d.kind, message = %d.message, "server declined request");
        }
        fx
    }

    /// Mark the request PENDING and put it on the wire. A request that
    /// never reached the wire does not stay pending.
    pub fn submit(&mut self, req: TxRequest, now: Instant) -> Result<(), LedgerError> {
        let kind = req.kind();
        let msg = match self.stores.ledger.submit(req, now) {
            Ok(msg) => msg,
            Err(e) => {
                let reason = match &e {
                    LedgerError::AlreadyPending(_) => "already_pending",
                    LedgerError::Validation(_) => "validation",
                    LedgerError::Send(_) => "send",
                };
                TX_REJECTED.with_label_values(&[kind.as_str(), reason]).inc();
                debug!(%kind, error = %e, "request rejected locally");
                return Err(e);
            }
        };
        if let Err(e) = self.send(&msg) {
            self.stores.ledger.abort(kind);
            TX_REJECTED.with_label_values(&[kind.as_str(), "send"]).inc();
            warn!(%kind, error = %e, "request not sent");
            return Err(e.into());
        }
        Ok(())
    }

    /// Run deadlines that have passed. Returns true if anything changed.
    pub fn expire(&mut self, now: Instant) -> bool {
        let notices = self.stores.notices.expire(now);
        let timed_out = self.stores.ledger.expire(now);
        for kind in &timed_out {
            self.record(Event::note(format!("{kind} timed out")));
        }
        !notices.is_empty() || !timed_out.is_empty()
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.stores.notices.next_deadline(), self.stores.ledger.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_command(&mut self, cmd: Command, now: Instant) {
        match cmd {
            Command::Submit(req, reply) => {
                let res = self.submit(req, now);
                let _ = reply.send(res);
            }
            Command::Move(delta) => {
                if !self.stores.round.view().controls_enabled {
                    debug!("movement ignored outside an active round");
                    return;
                }
                if let Err(e) = self.send(&Outbound::PlayerMove(delta)) {
                    warn!(error = %e, "move not sent");
                }
            }
            Command::Chat(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                if let Err(e) = self.send(&Outbound::Chat(ChatOut { message: text.to_string() })) {
                    warn!(error = %e, "chat not sent");
                }
            }
            Command::RenderedComplete => {
                if let Err(e) = self.send(&Outbound::RenderedComplete) {
                    warn!(error = %e, "rendered-complete not sent");
                }
            }
            // handled by run()
            Command::Leave => {}
        }
    }

    fn teardown(&mut self) {
        self.stores.players.clear();
        self.stores.notices.clear();
        self.stores.ledger.clear();
    }

    /// Drive the session until the user leaves (`Ok`) or the connection
    /// drops (`Err(ConnectionError::Closed)`). Reconnecting is the caller's
    /// business.
    pub async fn run(mut self, mut io: SessionIo) -> Result<(), ConnectionError> {
        self.recorder = io.recorder.take();
        let me = self.conn.credentials().identity.clone();
        let room = self.conn.credentials().room.clone();

        self.stores.round.enter_room();
        let enter = Outbound::EnterGame(EnterGame {
            nickname: me.nickname.clone(),
            character_type: me.character,
        });
        if let Err(e) = self.send(&enter) {
            warn!(error = %e, "could not enter game");
            self.teardown();
            io.snapshots.send_replace(self.snapshot(Instant::now()));
            return Err(ConnectionError::Closed);
        }
        self.record(Event::note(format!("entered room {room} as {}", me.nickname)));
        info!(%room, nickname = %me.nickname, "session started");
        io.snapshots.send_replace(self.snapshot(Instant::now()));

        let start = tokio::time::Instant::now() + self.tick;
        let mut tick = interval_at(start, self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.next_deadline();
            let far = tokio::time::Instant::now() + Duration::from_secs(3600);
            let wake_at = deadline.map(tokio::time::Instant::from_std).unwrap_or(far);

            let wake = tokio::select! {
                frame = self.conn.recv() => Wake::Frame(frame),
                _ = tick.tick() => Wake::Tick,
                _ = sleep_until(wake_at), if deadline.is_some() => Wake::Deadline,
                cmd = io.commands.recv() => Wake::Command(cmd),
            };

            let now = Instant::now();
            match wake {
                Wake::Frame(Some(raw)) => {
                    let fx = self.handle_frame(&raw, now);
                    // count the new value down from a full period
                    if fx.timer_reseeded {
                        tick.reset();
                    }
                    for cue in fx.cues {
                        let _ = io.cues.send(cue);
                    }
                }
                Wake::Frame(None) => {
                    warn!(%room, "connection lost");
                    self.record(Event::note("connection closed"));
                    self.teardown();
                    io.snapshots.send_replace(self.snapshot(now));
                    return Err(ConnectionError::Closed);
                }
                Wake::Tick => {
                    self.stores.round.tick();
                }
                Wake::Deadline => {
                    self.expire(now);
                }
                Wake::Command(Some(Command::Leave)) | Wake::Command(None) => {
                    if let Err(e) = self.send(&Outbound::LeaveGame) {
                        debug!(error = %e, "leave not sent");
                    }
                    self.record(Event::note("left room"));
                    self.conn.close();
                    self.teardown();
                    io.snapshots.send_replace(self.snapshot(now));
                    info!(%room, "session ended");
                    return Ok(());
                }
                Wake::Command(Some(cmd)) => self.handle_command(cmd, now),
            }
            io.snapshots.send_replace(self.snapshot(now));
        }
    }
}
