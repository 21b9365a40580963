// ===============================
// src/notify.rs
// ===============================
//
// Ephemeral UI signals. One slot per kind, last write wins. Each slot owns
// its own deadline, so replacing an item also replaces (cancels) the expiry
// that was scheduled for the previous one. The session loop sleeps until
// `next_deadline()` and then calls `expire()`.
//

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::metrics::NOTIFICATIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeKind {
    EventCard,
    EventEffect,
    StockAlert,
    RoundBanner,
    GenericAlert,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::EventCard => "event-card",
            NoticeKind::EventEffect => "event-effect",
            NoticeKind::StockAlert => "stock-alert",
            NoticeKind::RoundBanner => "round-banner",
            NoticeKind::GenericAlert => "generic-alert",
        }
    }

    pub fn default_ttl(&self) -> Duration {
        match self {
            NoticeKind::EventCard | NoticeKind::EventEffect | NoticeKind::StockAlert => {
                Duration::from_millis(5000)
            }
            NoticeKind::RoundBanner => Duration::from_millis(crate::round::BANNER_MS),
            NoticeKind::GenericAlert => Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NoticePayload {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl NoticePayload {
    pub fn text(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self { title: title.into(), content: content.into(), amount: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationItem {
    pub kind: NoticeKind,
    pub payload: NoticePayload,
    pub created: Instant,
    pub ttl: Duration,
    seq: u64,
}

impl NotificationItem {
    pub fn expires_at(&self) -> Instant { self.created + self.ttl }

    pub fn is_live(&self, now: Instant) -> bool { now < self.expires_at() }
}

#[derive(Debug, Default)]
pub struct NotificationQueue {
    slots: BTreeMap<NoticeKind, NotificationItem>,
    seq: u64,
}

impl NotificationQueue {
    pub fn new() -> Self { Self::default() }

    /// Insert or replace the item of this kind. Returns true if an older
    /// item (and its pending expiry) was superseded.
    pub fn push(
        &mut self,
        kind: NoticeKind,
        payload: NoticePayload,
        ttl: Duration,
        now: Instant,
    ) -> bool {
        self.seq += 1;
        let item = NotificationItem { kind, payload, created: now, ttl, seq: self.seq };
        NOTIFICATIONS.with_label_values(&[kind.as_str()]).inc();
        self.slots.insert(kind, item).is_some()
    }

    /// Non-expired items, oldest first.
    pub fn active(&self, now: Instant) -> Vec<NotificationItem> {
        let mut live: Vec<_> = self.slots.values().filter(|i| i.is_live(now)).cloned().collect();
        live.sort_by_key(|i| i.seq);
        live
    }

    pub fn get(&self, kind: NoticeKind) -> Option<&NotificationItem> { self.slots.get(&kind) }

    /// Drop everything whose deadline has passed; returns the expired kinds.
    pub fn expire(&mut self, now: Instant) -> Vec<NoticeKind> {
        let gone: Vec<NoticeKind> = self
            .slots
            .iter()
            .filter(|(_, i)| !i.is_live(now))
            .map(|(k, _)| *k)
            .collect();
        for k in &gone {
            self.slots.remove(k);
        }
        gone
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(NotificationItem::expires_at).min()
    }

    pub fn clear(&mut self) { self.slots.clear(); }

    pub fn len(&self) -> usize { self.slots.len() }

    pub fn is_empty(&self) -> bool { self.slots.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: Duration = Duration::from_secs(1);

    #[test]
    fn same_kind_replacement_keeps_only_newest() {
        let t0 = Instant::now();
        let mut q = NotificationQueue::new();
        let first = NoticePayload::text("first", "");
        assert!(!q.push(NoticeKind::EventCard, first, 5 * S, t0));
        let second = NoticePayload::text("second", "");
        assert!(q.push(NoticeKind::EventCard, second, 5 * S, t0 + 3 * S));

        let live = q.active(t0 + 3 * S);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].payload.title, "second");
    }

    #[test]
    fn replaced_item_is_not_cleared_by_the_old_deadline() {
        let t0 = Instant::now();
        let mut q = NotificationQueue::new();
        q.push(NoticeKind::EventCard, NoticePayload::text("first", ""), 5 * S, t0);
        q.push(NoticeKind::EventCard, NoticePayload::text("second", ""), 5 * S, t0 + 3 * S);

        // the first item's deadline passes
        assert!(q.expire(t0 + 5 * S).is_empty());
        assert_eq!(q.active(t0 + 5 * S)[0].payload.title, "second");
        assert_eq!(q.next_deadline(), Some(t0 + 8 * S));

        assert_eq!(q.expire(t0 + 8 * S), vec![NoticeKind::EventCard]);
        assert!(q.is_empty());
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn kinds_expire_independently_and_list_in_arrival_order() {
        let t0 = Instant::now();
        let mut q = NotificationQueue::new();
        q.push(NoticeKind::StockAlert, NoticePayload::text("price", ""), 5 * S, t0);
        q.push(NoticeKind::RoundBanner, NoticePayload::text("round", ""), 2 * S, t0 + S);

        let kinds: Vec<_> = q.active(t0 + S).iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![NoticeKind::StockAlert, NoticeKind::RoundBanner]);
        assert_eq!(q.next_deadline(), Some(t0 + 3 * S));

        assert_eq!(q.expire(t0 + 3 * S), vec![NoticeKind::RoundBanner]);
        assert_eq!(q.active(t0 + 3 * S).len(), 1);
        // active() already hides items past their deadline even before expire()
        assert!(q.active(t0 + 6 * S).is_empty());
    }

    #[test]
    fn default_ttls() {
        assert_eq!(NoticeKind::EventCard.default_ttl(), 5 * S);
        assert_eq!(NoticeKind::RoundBanner.default_ttl(), 2 * S);
    }
}
