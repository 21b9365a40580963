// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const ROOM_CODE_LEN: usize = 10;
pub const STOCK_KINDS: usize = 5;

pub type Vec3 = [f64; 3];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("room code must be exactly 10 characters (got {0})")]
    RoomCode(usize),
    #[error("amount must be greater than zero")]
    ZeroAmount,
}

// ---- Identity ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterType(pub u8);

#[derive(Debug, Clone)]
pub struct Identity {
    pub nickname: String,
    pub character: CharacterType,
}

/// Room code handed out by the lobby. Always `ROOM_CODE_LEN` characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let code = raw.trim();
        let len = code.chars().count();
        if len != ROOM_CODE_LEN {
            return Err(ValidationError::RoomCode(len));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---- Wire envelope ----

/// Every frame on the wire: `{ "type": TAG, "roomId", "sender", "data" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub data: Value,
}

// ---- Inbound payloads ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    RoundStart,
    RoundEnd,
    GameFinished,
    ApplyPreviousEvent,
    #[serde(other)]
    Other,
}

/// Structured subtype of a round notice (time-left warning, price move).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoticeCategory {
    TimeLeftAlert,
    StockPriceChange,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStatusMsg {
    pub round_status: RoundStatus,
    #[serde(default)]
    pub message: String,
    pub round: u32,
    #[serde(default)]
    pub remaining_time: Option<i64>,
    #[serde(default)]
    pub category: Option<NoticeCategory>,
}

/// Sparse kinematic/action update. Absent fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_toggle: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_carrying: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_trading: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_type: Option<CharacterType>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerStateMsg {
    pub id: String,
    #[serde(flatten)]
    pub delta: PlayerDelta,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerLeftMsg {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventCardMsg {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventEffectMsg {
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EconomicEventMsg {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxResultMsg {
    pub is_completed: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub action: Option<StockAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLine {
    pub sender: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub nickname: String,
    pub net_worth: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GameResultMsg {
    pub results: Vec<PlayerResult>,
}

// ---- Outbound ----

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterGame {
    pub nickname: String,
    pub character_type: CharacterType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockOrder {
    pub stocks: [u32; STOCK_KINDS],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoldOrder {
    pub gold_buy_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanOrder {
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatOut {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outbound {
    EnterGame(EnterGame),
    RenderedComplete,
    PlayerMove(PlayerDelta),
    BuyStock(StockOrder),
    SellStock(StockOrder),
    BuyGold(GoldOrder),
    TakeLoan(LoanOrder),
    RepayLoan(LoanOrder),
    Chat(ChatOut),
    LeaveGame,
}

impl Outbound {
    pub fn tag(&self) -> &'static str {
        match self {
            Outbound::EnterGame(_) => "ENTER_GAME",
            Outbound::RenderedComplete => "RENDERED_COMPLETE",
            Outbound::PlayerMove(_) => "PLAYER_MOVE",
            Outbound::BuyStock(_) => "BUY_STOCK",
            Outbound::SellStock(_) => "SELL_STOCK",
            Outbound::BuyGold(_) => "BUY_GOLD",
            Outbound::TakeLoan(_) => "TAKE_LOAN",
            Outbound::RepayLoan(_) => "REPAY_LOAN",
            Outbound::Chat(_) => "CHAT",
            Outbound::LeaveGame => "LEAVE_GAME",
        }
    }

    /// Serialize into the wire envelope, stamped with room and sender.
    pub fn to_frame(&self, room: &RoomCode, sender: &str) -> Result<String, serde_json::Error> {
        let mut v = serde_json::to_value(self)?;
        if let Some(obj) = v.as_object_mut() {
            obj.insert("roomId".into(), Value::from(room.as_str()));
            obj.insert("sender".into(), Value::from(sender));
        }
        serde_json::to_string(&v)
    }
}

// ---- Economic actions ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxKind {
    StockBuy,
    StockSell,
    GoldBuy,
    LoanTake,
    LoanRepay,
}

impl TxKind {
    pub const ALL: [TxKind; 5] = [
        TxKind::StockBuy,
        TxKind::StockSell,
        TxKind::GoldBuy,
        TxKind::LoanTake,
        TxKind::LoanRepay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::StockBuy => "stock-buy",
            TxKind::StockSell => "stock-sell",
            TxKind::GoldBuy => "gold-buy",
            TxKind::LoanTake => "loan-take",
            TxKind::LoanRepay => "loan-repay",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-entered parameters of one economic action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRequest {
    BuyStock([u32; STOCK_KINDS]),
    SellStock([u32; STOCK_KINDS]),
    BuyGold(u32),
    TakeLoan(u64),
    RepayLoan(u64),
}

impl TxRequest {
    pub fn kind(&self) -> TxKind {
        match self {
            TxRequest::BuyStock(_) => TxKind::StockBuy,
            TxRequest::SellStock(_) => TxKind::StockSell,
            TxRequest::BuyGold(_) => TxKind::GoldBuy,
            TxRequest::TakeLoan(_) => TxKind::LoanTake,
            TxRequest::RepayLoan(_) => TxKind::LoanRepay,
        }
    }

    /// Total requested quantity; stock orders sum their per-stock quantities.
    pub fn amount(&self) -> u64 {
        match self {
            TxRequest::BuyStock(q) | TxRequest::SellStock(q) => q.iter().map(|&x| x as u64).sum(),
            TxRequest::BuyGold(n) => *n as u64,
            TxRequest::TakeLoan(a) | TxRequest::RepayLoan(a) => *a,
        }
    }

    pub fn to_outbound(&self) -> Outbound {
        match self {
            TxRequest::BuyStock(q) => Outbound::BuyStock(StockOrder { stocks: *q }),
            TxRequest::SellStock(q) => Outbound::SellStock(StockOrder { stocks: *q }),
            TxRequest::BuyGold(n) => Outbound::BuyGold(GoldOrder { gold_buy_count: *n }),
            TxRequest::TakeLoan(a) => Outbound::TakeLoan(LoanOrder { amount: *a }),
            TxRequest::RepayLoan(a) => Outbound::RepayLoan(LoanOrder { amount: *a }),
        }
    }
}

// ---- Side channels ----

/// Audio hints for the (external) sound layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cue {
    LeftTimeAlert,
    ChangePrice,
    EndRound,
    Notification,
    SuccessStock,
    SuccessGold,
    SuccessLoan,
}

/// Recorded session traffic (JSONL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Inbound { ts_ns: i128, frame: String },
    Outbound { ts_ns: i128, frame: String },
    Note { ts_ns: i128, text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_must_be_ten_chars() {
        assert!(RoomCode::parse("ABCDEFGHIJ").is_ok());
        assert_eq!(RoomCode::parse(" ABCDEFGHIJ \n").unwrap().as_str(), "ABCDEFGHIJ");
        assert_eq!(RoomCode::parse("ABC"), Err(ValidationError::RoomCode(3)));
        assert_eq!(RoomCode::parse("ABCDEFGHIJK"), Err(ValidationError::RoomCode(11)));
        assert_eq!(RoomCode::parse(""), Err(ValidationError::RoomCode(0)));
    }

    #[test]
    fn outbound_frame_carries_tag_room_and_sender() {
        let room = RoomCode::parse("ROOM000001").unwrap();
        let frame = TxRequest::TakeLoan(120).to_outbound().to_frame(&room, "alice").unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "TAKE_LOAN");
        assert_eq!(v["roomId"], "ROOM000001");
        assert_eq!(v["sender"], "alice");
        assert_eq!(v["data"]["amount"], 120);

        let frame = Outbound::RenderedComplete.to_frame(&room, "alice").unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], Outbound::RenderedComplete.tag());
    }

    #[test]
    fn gold_order_uses_camel_case_field() {
        let room = RoomCode::parse("ROOM000001").unwrap();
        let frame = TxRequest::BuyGold(3).to_outbound().to_frame(&room, "bob").unwrap();
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "BUY_GOLD");
        assert_eq!(v["data"]["goldBuyCount"], 3);
    }

    #[test]
    fn stock_amount_is_sum_of_quantities() {
        assert_eq!(TxRequest::BuyStock([1, 0, 2, 0, 3]).amount(), 6);
        assert_eq!(TxRequest::SellStock([0; STOCK_KINDS]).amount(), 0);
    }

    #[test]
    fn unknown_round_status_decodes_as_other() {
        let msg: RoundStatusMsg = serde_json::from_value(serde_json::json!({
            "roundStatus": "SOMETHING_NEW",
            "round": 2,
        }))
        .unwrap();
        assert_eq!(msg.round_status, RoundStatus::Other);
        assert_eq!(msg.remaining_time, None);
    }

    #[test]
    fn player_state_keeps_absent_fields_empty() {
        let msg: PlayerStateMsg =
            serde_json::from_value(serde_json::json!({ "id": "p1", "isCarrying": true })).unwrap();
        assert_eq!(msg.id, "p1");
        assert_eq!(msg.delta.is_carrying, Some(true));
        assert_eq!(msg.delta.position, None);
    }
}
