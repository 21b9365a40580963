// ===============================
// src/router.rs (inbound frame dispatch)
// ===============================
//
// Decodes the envelope, looks the tag up in the handler table and runs
// exactly one handler. Handlers decode their whole payload before touching
// any store, so a malformed frame never half-applies. Dispatch takes
// `&mut Stores`, so there is only ever one dispatch in flight.
//

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{
    ChatLine, Cue, EconomicEventMsg, Envelope, EventCardMsg, EventEffectMsg, GameResultMsg,
    Identity, NoticeCategory, PlayerLeftMsg, PlayerResult, PlayerStateMsg, RoundStatus,
    RoundStatusMsg, TxKind, TxResultMsg,
};
use crate::ledger::{Ledger, ServerDeclined};
use crate::metrics::{FRAMES_DROPPED, FRAMES_IN};
use crate::notify::{NoticeKind, NoticePayload, NotificationQueue};
use crate::players::PlayerStore;
use crate::round::{Ignored, RoundMachine, RoundUpdate};

pub const CHAT_HISTORY: usize = 100;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a frame: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("bad {tag} payload: {source}")]
    Payload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything inbound frames may mutate. Owned by one session.
#[derive(Debug)]
pub struct Stores {
    pub me: Identity,
    pub players: PlayerStore,
    pub round: RoundMachine,
    pub ledger: Ledger,
    pub notices: NotificationQueue,
    pub chat: VecDeque<ChatLine>,
    pub results: Option<Vec<PlayerResult>>,
}

impl Stores {
    pub fn new(me: Identity, tx_timeout: Duration) -> Self {
        Self {
            me,
            players: PlayerStore::new(),
            round: RoundMachine::new(),
            ledger: Ledger::new(tx_timeout),
            notices: NotificationQueue::new(),
            chat: VecDeque::with_capacity(CHAT_HISTORY),
            results: None,
        }
    }
}

/// Side outputs of a dispatch that the session forwards to the UI.
#[derive(Debug, Default)]
pub struct Effects {
    pub cues: Vec<Cue>,
    pub declined: Vec<ServerDeclined>,
    /// The round countdown was just set from a server value.
    pub timer_reseeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Applied,
    Ignored(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    Ignored(&'static str),
    UnknownTag(String),
    Malformed,
}

type HandlerResult = Result<Handled, serde_json::Error>;
type Handler = fn(&mut Stores, Value, Instant, &mut Effects) -> HandlerResult;

pub struct Router {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Router {
    /// Table with every tag the client understands.
    pub fn new() -> Self {
        let mut r = Self::empty();
        r.register("ROUND_STATUS", on_round_status);
        r.register("PLAYER_STATE", on_player_state);
        r.register("PLAYER_LEFT", on_player_left);
        r.register("EVENT_CARD", on_event_card);
        r.register("EVENT_EFFECT", on_event_effect);
        r.register("ECONOMIC_EVENT_APPLIED", on_economic_event);
        r.register("STOCK_RESULT", on_stock_result);
        r.register("GOLD_RESULT", on_gold_result);
        r.register("LOAN_RESULT", on_loan_result);
        r.register("REPAY_RESULT", on_repay_result);
        r.register("CHAT", on_chat);
        r.register("GAME_RESULT", on_game_result);
        r
    }

    pub fn empty() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, tag: &'static str, handler: Handler) {
        self.handlers.insert(tag, handler);
    }

    pub fn dispatch(
        &self,
        stores: &mut Stores,
        raw: &str,
        now: Instant,
        fx: &mut Effects,
    ) -> Dispatch {
        let env: Envelope = match serde_json::from_str(raw) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %DecodeError::Envelope(e), "dropping frame");
                FRAMES_DROPPED.with_label_values(&["malformed"]).inc();
                return Dispatch::Malformed;
            }
        };

        let Some(handler) = self.handlers.get(env.tag.as_str()) else {
            warn!(tag = %env.tag, "no handler for tag, dropping frame");
            FRAMES_DROPPED.with_label_values(&["unknown_tag"]).inc();
            return Dispatch::UnknownTag(env.tag);
        };

        match handler(stores, env.data, now, fx) {
            Ok(Handled::Applied) => {
                FRAMES_IN.with_label_values(&[env.tag.as_str()]).inc();
                Dispatch::Applied
            }
            Ok(Handled::Ignored(reason)) => {
                debug!(tag = %env.tag, reason, "frame ignored");
                FRAMES_DROPPED.with_label_values(&[reason]).inc();
                Dispatch::Ignored(reason)
            }
            Err(source) => {
                let err = DecodeError::Payload { tag: env.tag.clone(), source };
                warn!(error = %err, "dropping frame");
                FRAMES_DROPPED.with_label_values(&["malformed"]).inc();
                Dispatch::Malformed
            }
        }
    }
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}

// ---- handlers ----

fn on_round_status(s: &mut Stores, data: Value, now: Instant, fx: &mut Effects) -> HandlerResult {
    let msg: RoundStatusMsg = decode(data)?;
    let banner = match s.round.apply(&msg) {
        RoundUpdate::Applied { banner, timer_reseeded } => {
            fx.timer_reseeded |= timer_reseeded;
            banner
        }
        RoundUpdate::Ignored(Ignored::Terminal) => return Ok(Handled::Ignored("game_finished")),
        RoundUpdate::Ignored(Ignored::Stale { .. }) => return Ok(Handled::Ignored("stale_round")),
    };

    if !msg.message.is_empty() {
        let title = format!("Round {}", msg.round);
        let payload = NoticePayload::text(title, msg.message.clone());
        s.notices.push(NoticeKind::RoundBanner, payload, banner, now);
    }
    if msg.round_status == RoundStatus::RoundEnd {
        fx.cues.push(Cue::EndRound);
    }
    match msg.category {
        Some(NoticeCategory::TimeLeftAlert) => fx.cues.push(Cue::LeftTimeAlert),
        Some(NoticeCategory::StockPriceChange) => {
            let kind = NoticeKind::StockAlert;
            let payload = NoticePayload::text("", msg.message.clone());
            s.notices.push(kind, payload, kind.default_ttl(), now);
            fx.cues.push(Cue::ChangePrice);
        }
        Some(NoticeCategory::Other) | None => {}
    }
    Ok(Handled::Applied)
}

fn on_player_state(s: &mut Stores, data: Value, _now: Instant, _fx: &mut Effects) -> HandlerResult {
    let msg: PlayerStateMsg = decode(data)?;
    if msg.id == s.me.nickname {
        return Ok(Handled::Ignored("own_player"));
    }
    s.players.upsert(&msg.id, &msg.delta);
    Ok(Handled::Applied)
}

fn on_player_left(s: &mut Stores, data: Value, _now: Instant, _fx: &mut Effects) -> HandlerResult {
    let msg: PlayerLeftMsg = decode(data)?;
    if s.players.remove(&msg.id) {
        Ok(Handled::Applied)
    } else {
        Ok(Handled::Ignored("unknown_player"))
    }
}

fn push_event_card(s: &mut Stores, title: String, content: String, now: Instant) {
    let kind = NoticeKind::EventCard;
    s.notices.push(kind, NoticePayload::text(title, content), kind.default_ttl(), now);
}

fn push_event_effect(s: &mut Stores, value: f64, now: Instant) {
    let kind = NoticeKind::EventEffect;
    let payload = NoticePayload { amount: Some(value), ..NoticePayload::default() };
    s.notices.push(kind, payload, kind.default_ttl(), now);
}

fn on_event_card(s: &mut Stores, data: Value, now: Instant, _fx: &mut Effects) -> HandlerResult {
    let msg: EventCardMsg = decode(data)?;
    if msg.title.is_empty() && msg.content.is_empty() {
        return Ok(Handled::Ignored("empty_event"));
    }
    push_event_card(s, msg.title, msg.content, now);
    Ok(Handled::Applied)
}

fn on_event_effect(s: &mut Stores, data: Value, now: Instant, _fx: &mut Effects) -> HandlerResult {
    let msg: EventEffectMsg = decode(data)?;
    if msg.value == 0.0 {
        return Ok(Handled::Ignored("empty_event"));
    }
    push_event_effect(s, msg.value, now);
    Ok(Handled::Applied)
}

fn on_economic_event(
    s: &mut Stores,
    data: Value,
    now: Instant,
    _fx: &mut Effects,
) -> HandlerResult {
    let msg: EconomicEventMsg = decode(data)?;
    push_event_card(s, msg.title, msg.content, now);
    if msg.value != 0.0 {
        push_event_effect(s, msg.value, now);
    }
    Ok(Handled::Applied)
}

fn success_cue(kind: TxKind) -> Cue {
    match kind {
        TxKind::StockBuy | TxKind::StockSell => Cue::SuccessStock,
        TxKind::GoldBuy => Cue::SuccessGold,
        TxKind::LoanTake | TxKind::LoanRepay => Cue::SuccessLoan,
    }
}

fn settle(
    s: &mut Stores,
    kind: TxKind,
    msg: &TxResultMsg,
    now: Instant,
    fx: &mut Effects,
) -> Handled {
    let alert = NoticeKind::GenericAlert;
    match s.ledger.resolve(kind, msg) {
        None => Handled::Ignored("no_pending_request"),
        Some(Ok(text)) => {
            let payload = NoticePayload::text(kind.as_str(), text);
            s.notices.push(alert, payload, alert.default_ttl(), now);
            fx.cues.push(success_cue(kind));
            Handled::Applied
        }
        Some(Err(declined)) => {
            let title = format!("{kind} failed");
            let payload = NoticePayload::text(title, declined.message.clone());
            s.notices.push(alert, payload, alert.default_ttl(), now);
            fx.declined.push(declined);
            Handled::Applied
        }
    }
}

fn on_stock_result(s: &mut Stores, data: Value, now: Instant, fx: &mut Effects) -> HandlerResult {
    let msg: TxResultMsg = decode(data)?;
    match s.ledger.stock_kind_for(msg.action) {
        Some(kind) => Ok(settle(s, kind, &msg, now, fx)),
        None => Ok(Handled::Ignored("no_pending_request")),
    }
}

fn on_gold_result(s: &mut Stores, data: Value, now: Instant, fx: &mut Effects) -> HandlerResult {
    let msg: TxResultMsg = decode(data)?;
    Ok(settle(s, TxKind::GoldBuy, &msg, now, fx))
}

fn on_loan_result(s: &mut Stores, data: Value, now: Instant, fx: &mut Effects) -> HandlerResult {
    let msg: TxResultMsg = decode(data)?;
    Ok(settle(s, TxKind::LoanTake, &msg, now, fx))
}

fn on_repay_result(s: &mut Stores, data: Value, now: Instant, fx: &mut Effects) -> HandlerResult {
    let msg: TxResultMsg = decode(data)?;
    Ok(settle(s, TxKind::LoanRepay, &msg, now, fx))
}

fn on_chat(s: &mut Stores, data: Value, _now: Instant, fx: &mut Effects) -> HandlerResult {
    let line: ChatLine = decode(data)?;
    if line.sender != s.me.nickname {
        fx.cues.push(Cue::Notification);
    }
    if s.chat.len() == CHAT_HISTORY {
        s.chat.pop_front();
    }
    s.chat.push_back(line);
    Ok(Handled::Applied)
}

fn on_game_result(s: &mut Stores, data: Value, _now: Instant, _fx: &mut Effects) -> HandlerResult {
    let msg: GameResultMsg = decode(data)?;
    s.results = Some(msg.results);
    Ok(Handled::Applied)
}
