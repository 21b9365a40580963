// ===============================
// src/round.rs
// ===============================
//
// Round lifecycle:
//   LOBBY --enter room--> INTRO --ROUND_START--> ROUND_ACTIVE --ROUND_END--> ROUND_END
//   ROUND_END --ROUND_START(n+1)--> ROUND_ACTIVE
//   any --GAME_FINISHED--> GAME_FINISHED (terminal for round-status frames)
//
// The remaining-time counter is seeded by the server on ROUND_START, counted
// down locally by `tick()` and resynced by later same-round notices.
//

use std::time::Duration;

use serde::Serialize;

use crate::domain::{RoundStatus, RoundStatusMsg};
use crate::metrics::{ROUND_CURRENT, ROUND_REMAINING};

pub const BANNER_MS: u64 = 2000;
pub const BANNER_EXTENDED_MS: u64 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Lobby,
    Intro,
    RoundActive,
    RoundEnd,
    GameFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// GAME_FINISHED already reached.
    Terminal,
    /// Round number would move backwards (or repeat a ROUND_START).
    Stale { got: u32, current: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundUpdate {
    /// Accepted; the round banner should stay up for `banner`.
    /// `timer_reseeded` is set when the countdown took a server value.
    Applied { banner: Duration, timer_reseeded: bool },
    Ignored(Ignored),
}

/// Read-only view handed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundView {
    pub phase: Phase,
    pub round: u32,
    pub remaining_secs: u32,
    pub message: String,
    pub controls_enabled: bool,
    pub timer_visible: bool,
    pub round_visible: bool,
    pub board_visible: bool,
}

#[derive(Debug, Clone)]
pub struct RoundMachine {
    phase: Phase,
    round: u32,
    remaining: u32,
    message: String,
    board_visible: bool,
}

impl Default for RoundMachine {
    fn default() -> Self { Self::new() }
}

fn clamp_secs(t: i64) -> u32 {
    t.clamp(0, u32::MAX as i64) as u32
}

impl RoundMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Lobby,
            round: 0,
            remaining: 0,
            message: String::new(),
            board_visible: false,
        }
    }

    pub fn phase(&self) -> Phase { self.phase }
    pub fn round(&self) -> u32 { self.round }
    pub fn remaining(&self) -> u32 { self.remaining }
    pub fn message(&self) -> &str { &self.message }
    pub fn is_finished(&self) -> bool { self.phase == Phase::GameFinished }

    pub fn enter_room(&mut self) {
        if self.phase == Phase::Lobby {
            self.phase = Phase::Intro;
        }
    }

    pub fn apply(&mut self, msg: &RoundStatusMsg) -> RoundUpdate {
        if self.phase == Phase::GameFinished {
            return RoundUpdate::Ignored(Ignored::Terminal);
        }
        let current = self.round;
        let got = msg.round;
        let banner = if msg.round_status == RoundStatus::ApplyPreviousEvent {
            BANNER_EXTENDED_MS
        } else {
            BANNER_MS
        };
        let banner = Duration::from_millis(banner);
        let mut timer_reseeded = false;

        match msg.round_status {
            RoundStatus::RoundStart => {
                if got <= current {
                    return RoundUpdate::Ignored(Ignored::Stale { got, current });
                }
                self.phase = Phase::RoundActive;
                self.round = got;
                self.remaining = clamp_secs(msg.remaining_time.unwrap_or(0));
                self.board_visible = true;
                timer_reseeded = true;
            }
            RoundStatus::RoundEnd | RoundStatus::GameFinished => {
                if got < current {
                    return RoundUpdate::Ignored(Ignored::Stale { got, current });
                }
                self.phase = if msg.round_status == RoundStatus::RoundEnd {
                    Phase::RoundEnd
                } else {
                    Phase::GameFinished
                };
                self.round = got;
                self.remaining = 0;
            }
            RoundStatus::ApplyPreviousEvent | RoundStatus::Other => {
                if got < current {
                    return RoundUpdate::Ignored(Ignored::Stale { got, current });
                }
                // ahead of our round: show it, leave round and timer alone
                if got > current {
                    return RoundUpdate::Applied { banner, timer_reseeded };
                }
                if self.phase == Phase::RoundActive {
                    if let Some(t) = msg.remaining_time {
                        self.remaining = clamp_secs(t);
                        timer_reseeded = true;
                    }
                }
            }
        }

        self.message = msg.message.clone();
        ROUND_CURRENT.set(self.round as i64);
        ROUND_REMAINING.set(self.remaining as i64);
        RoundUpdate::Applied { banner, timer_reseeded }
    }

    /// One local timer step. Returns true if the counter moved.
    pub fn tick(&mut self) -> bool {
        if self.phase != Phase::RoundActive || self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        ROUND_REMAINING.set(self.remaining as i64);
        true
    }

    pub fn view(&self) -> RoundView {
        let active = self.phase == Phase::RoundActive;
        RoundView {
            phase: self.phase,
            round: self.round,
            remaining_secs: self.remaining,
            message: self.message.clone(),
            controls_enabled: active,
            timer_visible: active,
            round_visible: matches!(self.phase, Phase::RoundActive | Phase::RoundEnd),
            board_visible: self.board_visible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(s: RoundStatus, round: u32, remaining: Option<i64>) -> RoundStatusMsg {
        RoundStatusMsg {
            round_status: s,
            message: format!("{:?} {}", s, round),
            round,
            remaining_time: remaining,
            category: None,
        }
    }

    fn started(round: u32, secs: i64) -> RoundMachine {
        let mut m = RoundMachine::new();
        m.enter_room();
        m.apply(&status(RoundStatus::RoundStart, round, Some(secs)));
        m
    }

    #[test]
    fn enter_room_moves_lobby_to_intro() {
        let mut m = RoundMachine::new();
        assert_eq!(m.phase(), Phase::Lobby);
        m.enter_room();
        assert_eq!(m.phase(), Phase::Intro);
        assert!(!m.view().controls_enabled);
    }

    #[test]
    fn round_start_then_ten_ticks() {
        let mut m = started(1, 180);
        assert_eq!(m.phase(), Phase::RoundActive);
        assert_eq!(m.round(), 1);
        assert_eq!(m.remaining(), 180);

        for _ in 0..10 {
            assert!(m.tick());
        }
        assert_eq!(m.remaining(), 170);
        let v = m.view();
        assert!(v.controls_enabled && v.timer_visible && v.round_visible && v.board_visible);
    }

    #[test]
    fn timer_clamps_at_zero() {
        let mut m = started(1, 2);
        assert!(m.tick());
        assert!(m.tick());
        assert!(!m.tick());
        assert_eq!(m.remaining(), 0);

        let m = started(1, -5);
        assert_eq!(m.remaining(), 0);
    }

    #[test]
    fn repeated_or_older_round_start_is_ignored() {
        let mut m = started(2, 100);
        m.tick();
        let r = m.apply(&status(RoundStatus::RoundStart, 2, Some(100)));
        assert_eq!(r, RoundUpdate::Ignored(Ignored::Stale { got: 2, current: 2 }));
        let r = m.apply(&status(RoundStatus::RoundStart, 1, Some(100)));
        assert!(matches!(r, RoundUpdate::Ignored(Ignored::Stale { .. })));
        assert_eq!(m.round(), 2);
        assert_eq!(m.remaining(), 99);
    }

    #[test]
    fn round_end_loops_into_next_round() {
        let mut m = started(1, 120);
        m.apply(&status(RoundStatus::RoundEnd, 1, None));
        assert_eq!(m.phase(), Phase::RoundEnd);
        assert!(!m.tick());
        assert!(!m.view().controls_enabled);
        assert!(m.view().round_visible);

        // late end of an older round is dropped
        let r = m.apply(&status(RoundStatus::RoundEnd, 0, None));
        assert!(matches!(r, RoundUpdate::Ignored(_)));

        m.apply(&status(RoundStatus::RoundStart, 2, Some(120)));
        assert_eq!(m.phase(), Phase::RoundActive);
        assert_eq!(m.round(), 2);
    }

    #[test]
    fn game_finished_is_terminal() {
        let mut m = started(3, 60);
        m.apply(&status(RoundStatus::GameFinished, 3, None));
        assert!(m.is_finished());

        for s in [RoundStatus::RoundStart, RoundStatus::RoundEnd, RoundStatus::Other] {
            let r = m.apply(&status(s, 9, Some(50)));
            assert_eq!(r, RoundUpdate::Ignored(Ignored::Terminal));
        }
        assert_eq!(m.round(), 3);
        assert_eq!(m.remaining(), 0);
        assert!(!m.tick());
        assert!(!m.view().round_visible);
    }

    #[test]
    fn same_round_notice_resyncs_timer() {
        let mut m = started(1, 180);
        for _ in 0..5 {
            m.tick();
        }
        assert_eq!(m.remaining(), 175);
        let r = m.apply(&status(RoundStatus::Other, 1, Some(172)));
        assert!(matches!(r, RoundUpdate::Applied { timer_reseeded: true, .. }));
        assert_eq!(m.remaining(), 172);
        assert_eq!(m.phase(), Phase::RoundActive);

        // no remainingTime: nothing to reseed
        let r = m.apply(&status(RoundStatus::Other, 1, None));
        assert!(matches!(r, RoundUpdate::Applied { timer_reseeded: false, .. }));
    }

    #[test]
    fn notice_for_a_later_round_is_shown_but_leaves_state_alone() {
        let mut m = started(1, 180);
        let r = m.apply(&status(RoundStatus::Other, 2, Some(10)));
        assert!(matches!(r, RoundUpdate::Applied { timer_reseeded: false, .. }));
        assert_eq!(m.round(), 1);
        assert_eq!(m.remaining(), 180);
        assert_eq!(m.message(), "RoundStart 1");

        // before any round started
        let mut m = RoundMachine::new();
        m.enter_room();
        let r = m.apply(&status(RoundStatus::Other, 1, None));
        assert!(matches!(r, RoundUpdate::Applied { .. }));
        assert_eq!(m.phase(), Phase::Intro);
        assert_eq!(m.round(), 0);
    }

    #[test]
    fn notice_for_an_earlier_round_is_stale() {
        let mut m = started(3, 60);
        let r = m.apply(&status(RoundStatus::ApplyPreviousEvent, 2, Some(5)));
        assert_eq!(r, RoundUpdate::Ignored(Ignored::Stale { got: 2, current: 3 }));
        assert_eq!(m.remaining(), 60);
    }

    #[test]
    fn round_start_reseeds_timer() {
        let mut m = RoundMachine::new();
        m.enter_room();
        let r = m.apply(&status(RoundStatus::RoundStart, 1, Some(30)));
        assert!(matches!(r, RoundUpdate::Applied { timer_reseeded: true, .. }));
    }

    #[test]
    fn apply_previous_event_extends_banner_only() {
        let mut m = started(1, 90);
        let r = m.apply(&status(RoundStatus::ApplyPreviousEvent, 1, None));
        let extended = Duration::from_millis(BANNER_EXTENDED_MS);
        assert_eq!(r, RoundUpdate::Applied { banner: extended, timer_reseeded: false });
        assert_eq!(m.phase(), Phase::RoundActive);
        assert_eq!(m.remaining(), 90);

        let r = m.apply(&status(RoundStatus::RoundEnd, 1, None));
        let base = Duration::from_millis(BANNER_MS);
        assert_eq!(r, RoundUpdate::Applied { banner: base, timer_reseeded: false });
    }
}
