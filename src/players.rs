// ===============================
// src/players.rs (remote avatar store)
// ===============================
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::{CharacterType, PlayerDelta, Vec3};
use crate::metrics::REMOTE_PLAYERS;

/// Last-known state of another participant's avatar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemotePlayer {
    pub id: String,
    pub character: CharacterType,
    pub position: Vec3,
    pub direction: Vec3,
    pub action_toggle: bool,
    pub is_carrying: bool,
    pub is_trading: bool,
    pub animation: String,
}

impl RemotePlayer {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            character: CharacterType::default(),
            position: [0.0; 3],
            direction: [0.0; 3],
            action_toggle: false,
            is_carrying: false,
            is_trading: false,
            animation: String::new(),
        }
    }

    // merge-on-present: fields missing from the delta keep their value
    fn merge(&mut self, d: &PlayerDelta) {
        if let Some(p) = d.position { self.position = p; }
        if let Some(v) = d.direction { self.direction = v; }
        if let Some(b) = d.action_toggle { self.action_toggle = b; }
        if let Some(b) = d.is_carrying { self.is_carrying = b; }
        if let Some(b) = d.is_trading { self.is_trading = b; }
        if let Some(a) = &d.animation { self.animation = a.clone(); }
        if let Some(c) = d.character_type { self.character = c; }
    }
}

#[derive(Debug, Default)]
pub struct PlayerStore {
    players: BTreeMap<String, RemotePlayer>,
}

impl PlayerStore {
    pub fn new() -> Self { Self::default() }

    /// Apply a sparse update, creating the player on first sighting.
    /// Returns true when the id was not present before.
    pub fn upsert(&mut self, id: &str, delta: &PlayerDelta) -> bool {
        let created = !self.players.contains_key(id);
        self.players
            .entry(id.to_string())
            .or_insert_with(|| RemotePlayer::new(id))
            .merge(delta);
        if created {
            REMOTE_PLAYERS.set(self.players.len() as i64);
        }
        created
    }

    /// Unknown ids are a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.players.remove(id).is_some();
        if removed {
            REMOTE_PLAYERS.set(self.players.len() as i64);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&RemotePlayer> { self.players.get(id) }

    pub fn len(&self) -> usize { self.players.len() }

    pub fn is_empty(&self) -> bool { self.players.is_empty() }

    pub fn clear(&mut self) {
        self.players.clear();
        REMOTE_PLAYERS.set(0);
    }

    /// Point-in-time copy ordered by id; later updates never touch it.
    pub fn snapshot(&self) -> Arc<[RemotePlayer]> {
        self.players.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta() -> PlayerDelta { PlayerDelta::default() }

    #[test]
    fn sparse_updates_merge_field_wise() {
        let mut store = PlayerStore::new();
        assert!(store.upsert("p1", &PlayerDelta { position: Some([1.0, 0.0, 0.0]), ..delta() }));
        assert!(!store.upsert("p1", &PlayerDelta { is_carrying: Some(true), ..delta() }));

        let p1 = store.get("p1").unwrap();
        assert_eq!(p1.position, [1.0, 0.0, 0.0]);
        assert!(p1.is_carrying);
        assert!(!p1.is_trading);
    }

    #[test]
    fn final_state_is_last_write_per_field() {
        let updates = vec![
            PlayerDelta {
                position: Some([1.0, 2.0, 3.0]),
                animation: Some("walk".into()),
                ..delta()
            },
            PlayerDelta { direction: Some([0.0, 0.0, 1.0]), is_trading: Some(true), ..delta() },
            PlayerDelta { position: Some([4.0, 2.0, 3.0]), ..delta() },
            PlayerDelta { is_trading: Some(false), action_toggle: Some(true), ..delta() },
            PlayerDelta {
                animation: Some("idle".into()),
                character_type: Some(CharacterType(2)),
                ..delta()
            },
        ];
        let mut store = PlayerStore::new();
        for u in &updates {
            store.upsert("p9", u);
        }

        let p = store.get("p9").unwrap();
        assert_eq!(p.position, [4.0, 2.0, 3.0]);
        assert_eq!(p.direction, [0.0, 0.0, 1.0]);
        assert!(!p.is_trading);
        assert!(p.action_toggle);
        assert!(!p.is_carrying);
        assert_eq!(p.animation, "idle");
        assert_eq!(p.character, CharacterType(2));
    }

    #[test]
    fn removed_ids_are_absent_and_unknown_removes_are_noops() {
        let mut store = PlayerStore::new();
        store.upsert("a", &delta());
        store.upsert("b", &delta());

        assert!(store.remove("a"));
        assert!(store.get("a").is_none());
        assert!(store.snapshot().iter().all(|p| p.id != "a"));

        assert!(!store.remove("never-seen"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_and_detached() {
        let mut store = PlayerStore::new();
        store.upsert("zed", &delta());
        store.upsert("amy", &delta());
        let snap = store.snapshot();

        store.upsert("amy", &PlayerDelta { position: Some([9.0, 9.0, 9.0]), ..delta() });
        store.remove("zed");

        let ids: Vec<_> = snap.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["amy", "zed"]);
        assert_eq!(snap[0].position, [0.0; 3]);
    }
}
