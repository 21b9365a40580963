// ===============================
// src/config.rs
// ===============================
use std::env;
use std::time::Duration;

use chrono::Utc;
use dotenvy::dotenv;

use crate::domain::{CharacterType, Identity};

#[derive(Clone, Debug)]
pub struct Config {
    // endpoints
    pub server_ws_url: String,
    pub lobby_url: String,

    // who we are
    pub nickname: String,
    pub character: CharacterType,

    // timing
    pub tx_timeout: Duration,
    pub tick: Duration,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: u16,
}

impl Config {
    pub fn identity(&self) -> Identity {
        Identity { nickname: self.nickname.clone(), character: self.character }
    }
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

/// Build a config from any key lookup; missing or unparsable values fall
/// back to defaults.
pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Config {
    let server_ws_url =
        get("SERVER_WS_URL").unwrap_or_else(|| "ws://localhost:8080/ws".to_string());
    let lobby_url = get("LOBBY_URL")
        .unwrap_or_else(|| "http://localhost:8080".to_string())
        .trim_end_matches('/')
        .to_string();

    let nickname = get("NICKNAME")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("player-{}", Utc::now().timestamp_millis()));
    let character = CharacterType(parsed(&get, "CHARACTER_TYPE", 0u8));

    let tx_timeout = Duration::from_millis(parsed(&get, "TX_TIMEOUT_MS", 10_000u64).max(1));
    let tick = Duration::from_millis(parsed(&get, "TICK_MS", 1_000u64).max(1));

    let record_file = get("RECORD_FILE").filter(|s| !s.trim().is_empty());
    let metrics_port = parsed(&get, "METRICS_PORT", 9899u16);

    Config {
        server_ws_url,
        lobby_url,
        nickname,
        character,
        tx_timeout,
        tick,
        record_file,
        metrics_port,
    }
}

pub fn load() -> Config {
    // .env is optional
    let _ = dotenv();
    from_lookup(|k| env::var(k).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = from_lookup(lookup(&[]));
        assert_eq!(cfg.server_ws_url, "ws://localhost:8080/ws");
        assert_eq!(cfg.lobby_url, "http://localhost:8080");
        assert!(cfg.nickname.starts_with("player-"));
        assert_eq!(cfg.character, CharacterType(0));
        assert_eq!(cfg.tx_timeout, Duration::from_secs(10));
        assert_eq!(cfg.tick, Duration::from_secs(1));
        assert_eq!(cfg.record_file, None);
        assert_eq!(cfg.metrics_port, 9899);
    }

    #[test]
    fn values_override_and_garbage_falls_back() {
        let cfg = from_lookup(lookup(&[
            ("LOBBY_URL", "https://lobby.example/"),
            ("NICKNAME", " alice "),
            ("CHARACTER_TYPE", "3"),
            ("TX_TIMEOUT_MS", "2500"),
            ("TICK_MS", "soon"),
            ("METRICS_PORT", "0"),
        ]));
        assert_eq!(cfg.lobby_url, "https://lobby.example");
        assert_eq!(cfg.identity().nickname, "alice");
        assert_eq!(cfg.character, CharacterType(3));
        assert_eq!(cfg.tx_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.tick, Duration::from_secs(1));
        assert_eq!(cfg.metrics_port, 0);
    }
}
