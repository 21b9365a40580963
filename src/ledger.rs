// ===============================
// src/ledger.rs
// ===============================
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection::SendError;
use crate::domain::{Outbound, StockAction, TxKind, TxRequest, TxResultMsg, ValidationError};
use crate::metrics::{TX_RESOLVED, TX_SUBMITTED};

pub const TIMEOUT_MESSAGE: &str = "request timed out";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("a {0} request is already pending")]
    AlreadyPending(TxKind),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Server answered `isCompleted: false`; the message is shown verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} declined: {message}")]
pub struct ServerDeclined {
    pub kind: TxKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
}

impl TxStatus {
    fn label(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub kind: TxKind,
    pub request: TxRequest,
    #[serde(skip)]
    pub submitted: Instant,
    pub status: TxStatus,
    /// Result text (COMPLETED) or error text (FAILED).
    pub message: Option<String>,
}

/// User-facing text for a completed action.
fn completed_text(kind: TxKind, server_msg: &str) -> String {
    let msg = server_msg.trim();
    if kind == TxKind::LoanRepay {
        return match msg.parse::<i64>() {
            Ok(0) => "loan fully repaid".to_string(),
            Ok(rest) => format!("remaining balance {rest}"),
            Err(_) if msg.is_empty() => "loan repaid".to_string(),
            Err(_) => msg.to_string(),
        };
    }
    if msg.is_empty() {
        format!("{kind} completed")
    } else {
        msg.to_string()
    }
}

/// At most one PENDING request per action type.
#[derive(Debug)]
pub struct Ledger {
    entries: HashMap<TxKind, LedgerEntry>,
    timeout: Duration,
}

impl Ledger {
    pub fn new(timeout: Duration) -> Self {
        Self { entries: HashMap::new(), timeout }
    }

    /// Local checks, then mark PENDING. The caller sends the returned frame
    /// and must `abort()` if the send fails.
    pub fn submit(&mut self, req: TxRequest, now: Instant) -> Result<Outbound, LedgerError> {
        let kind = req.kind();
        if req.amount() == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        if self.is_pending(kind) {
            return Err(LedgerError::AlreadyPending(kind));
        }
        let frame = req.to_outbound();
        let entry = LedgerEntry {
            kind,
            request: req,
            submitted: now,
            status: TxStatus::Pending,
            message: None,
        };
        self.entries.insert(kind, entry);
        TX_SUBMITTED.with_label_values(&[kind.as_str()]).inc();
        Ok(frame)
    }

    /// Forget a PENDING entry whose request never left the client.
    pub fn abort(&mut self, kind: TxKind) {
        if self.is_pending(kind) {
            self.entries.remove(&kind);
        }
    }

    pub fn is_pending(&self, kind: TxKind) -> bool {
        self.entries.get(&kind).is_some_and(|e| e.status == TxStatus::Pending)
    }

    pub fn entry(&self, kind: TxKind) -> Option<&LedgerEntry> { self.entries.get(&kind) }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut out: Vec<_> = self.entries.values().cloned().collect();
        out.sort_by_key(|e| e.kind);
        out
    }

    /// Pick the stock entry a STOCK_RESULT answers. Without an explicit
    /// action the older pending one wins.
    pub fn stock_kind_for(&self, action: Option<StockAction>) -> Option<TxKind> {
        match action {
            Some(StockAction::Buy) => Some(TxKind::StockBuy),
            Some(StockAction::Sell) => Some(TxKind::StockSell),
            None => [TxKind::StockBuy, TxKind::StockSell]
                .into_iter()
                .filter_map(|k| self.entries.get(&k).filter(|e| e.status == TxStatus::Pending))
                .min_by_key(|e| e.submitted)
                .map(|e| e.kind),
        }
    }

    /// Move the PENDING entry to its terminal state. `None` when nothing of
    /// that kind is pending (duplicate or late acknowledgement).
    pub fn resolve(
        &mut self,
        kind: TxKind,
        result: &TxResultMsg,
    ) -> Option<Result<String, ServerDeclined>> {
        let pending = self.entries.get_mut(&kind).filter(|e| e.status == TxStatus::Pending);
        let Some(entry) = pending else {
            debug!(%kind, "result without pending request");
            return None;
        };

        let out = if result.is_completed {
            let text = completed_text(kind, &result.message);
            entry.status = TxStatus::Completed;
            entry.message = Some(text.clone());
            Ok(text)
        } else {
            let message = if result.message.trim().is_empty() {
                format!("{kind} declined")
            } else {
                result.message.clone()
            };
            entry.status = TxStatus::Failed;
            entry.message = Some(message.clone());
            Err(ServerDeclined { kind, message })
        };
        TX_RESOLVED.with_label_values(&[kind.as_str(), entry.status.label()]).inc();
        Some(out)
    }

    /// Fail every PENDING entry older than the timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<TxKind> {
        let mut timed_out = Vec::new();
        for e in self.entries.values_mut() {
            if e.status == TxStatus::Pending && now >= e.submitted + self.timeout {
                e.status = TxStatus::Failed;
                e.message = Some(TIMEOUT_MESSAGE.to_string());
                TX_RESOLVED.with_label_values(&[e.kind.as_str(), "timeout"]).inc();
                warn!(kind = %e.kind, "transaction timed out");
                timed_out.push(e.kind);
            }
        }
        timed_out.sort();
        timed_out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| e.status == TxStatus::Pending)
            .map(|e| e.submitted + self.timeout)
            .min()
    }

    pub fn clear(&mut self) { self.entries.clear(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(msg: &str) -> TxResultMsg {
        TxResultMsg { is_completed: true, message: msg.to_string(), action: None }
    }

    fn declined(msg: &str) -> TxResultMsg {
        TxResultMsg { is_completed: false, message: msg.to_string(), action: None }
    }

    fn ledger() -> Ledger { Ledger::new(Duration::from_secs(10)) }

    #[test]
    fn duplicate_submit_is_rejected_until_resolved() {
        let now = Instant::now();
        let mut l = ledger();
        let frame = l.submit(TxRequest::BuyGold(2), now).unwrap();
        assert_eq!(frame.tag(), "BUY_GOLD");

        let err = l.submit(TxRequest::BuyGold(5), now).unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyPending(TxKind::GoldBuy)));
        // other kinds are independent
        assert!(l.submit(TxRequest::TakeLoan(100), now).is_ok());

        let settled = l.resolve(TxKind::GoldBuy, &ok("bought 2 bars"));
        assert_eq!(settled, Some(Ok("bought 2 bars".into())));
        assert_eq!(l.entry(TxKind::GoldBuy).unwrap().status, TxStatus::Completed);
        assert!(l.submit(TxRequest::BuyGold(5), now).is_ok());
    }

    #[test]
    fn zero_amounts_never_reach_pending() {
        let now = Instant::now();
        let mut l = ledger();
        for req in [
            TxRequest::BuyStock([0; 5]),
            TxRequest::SellStock([0; 5]),
            TxRequest::BuyGold(0),
            TxRequest::TakeLoan(0),
            TxRequest::RepayLoan(0),
        ] {
            let kind = req.kind();
            let err = l.submit(req, now).unwrap_err();
            assert!(matches!(err, LedgerError::Validation(ValidationError::ZeroAmount)));
            assert!(l.entry(kind).is_none());
        }
    }

    #[test]
    fn loan_repay_zero_balance_reads_fully_repaid() {
        let now = Instant::now();
        let mut l = ledger();
        l.submit(TxRequest::RepayLoan(500), now).unwrap();
        let out = l.resolve(TxKind::LoanRepay, &ok("0")).unwrap();
        assert_eq!(out, Ok("loan fully repaid".to_string()));
        let e = l.entry(TxKind::LoanRepay).unwrap();
        assert_eq!(e.status, TxStatus::Completed);
        assert_eq!(e.message.as_deref(), Some("loan fully repaid"));

        l.submit(TxRequest::RepayLoan(100), now).unwrap();
        let settled = l.resolve(TxKind::LoanRepay, &ok(" 250 ")).unwrap();
        assert_eq!(settled, Ok("remaining balance 250".into()));
    }

    #[test]
    fn declined_result_is_failed_and_retryable() {
        let now = Instant::now();
        let mut l = ledger();
        l.submit(TxRequest::TakeLoan(2000), now).unwrap();
        let out = l.resolve(TxKind::LoanTake, &declined("amount out of range")).unwrap();
        assert_eq!(
            out,
            Err(ServerDeclined { kind: TxKind::LoanTake, message: "amount out of range".into() })
        );
        assert_eq!(l.entry(TxKind::LoanTake).unwrap().status, TxStatus::Failed);
        assert!(l.submit(TxRequest::TakeLoan(80), now).is_ok());
    }

    #[test]
    fn result_without_pending_entry_is_ignored() {
        let mut l = ledger();
        assert_eq!(l.resolve(TxKind::StockBuy, &ok("done")), None);

        let now = Instant::now();
        l.submit(TxRequest::BuyStock([1, 0, 0, 0, 0]), now).unwrap();
        assert!(l.resolve(TxKind::StockBuy, &ok("done")).is_some());
        // a repeated acknowledgement does not touch the terminal entry
        assert_eq!(l.resolve(TxKind::StockBuy, &declined("late")), None);
        assert_eq!(l.entry(TxKind::StockBuy).unwrap().status, TxStatus::Completed);
    }

    #[test]
    fn pending_entries_time_out() {
        let t0 = Instant::now();
        let mut l = ledger();
        l.submit(TxRequest::SellStock([0, 2, 0, 0, 0]), t0).unwrap();
        assert_eq!(l.next_deadline(), Some(t0 + Duration::from_secs(10)));

        assert!(l.expire(t0 + Duration::from_secs(9)).is_empty());
        assert_eq!(l.expire(t0 + Duration::from_secs(10)), vec![TxKind::StockSell]);
        let e = l.entry(TxKind::StockSell).unwrap();
        assert_eq!(e.status, TxStatus::Failed);
        assert_eq!(e.message.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(l.next_deadline(), None);
        assert!(l.submit(TxRequest::SellStock([0, 1, 0, 0, 0]), t0).is_ok());
    }

    #[test]
    fn stock_result_routing() {
        let t0 = Instant::now();
        let mut l = ledger();
        assert_eq!(l.stock_kind_for(None), None);

        l.submit(TxRequest::SellStock([1, 0, 0, 0, 0]), t0).unwrap();
        l.submit(TxRequest::BuyStock([1, 0, 0, 0, 0]), t0 + Duration::from_millis(5)).unwrap();
        assert_eq!(l.stock_kind_for(None), Some(TxKind::StockSell));
        assert_eq!(l.stock_kind_for(Some(StockAction::Buy)), Some(TxKind::StockBuy));

        l.resolve(TxKind::StockSell, &ok("")).unwrap().unwrap();
        assert_eq!(l.stock_kind_for(None), Some(TxKind::StockBuy));
    }

    #[test]
    fn abort_only_drops_pending() {
        let now = Instant::now();
        let mut l = ledger();
        l.submit(TxRequest::BuyGold(1), now).unwrap();
        l.abort(TxKind::GoldBuy);
        assert!(l.entry(TxKind::GoldBuy).is_none());
        assert!(l.submit(TxRequest::BuyGold(1), now).is_ok());
    }
}
