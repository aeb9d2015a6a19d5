//! Recognition session state machine.
//!
//! Consumes one observation per camera tick while polling, plus one
//! countdown tick per second while a match is being verified. Pure state:
//! the engine is the only tick source, so every transition here is
//! deterministic and unit-testable without timers.
//!
//! Phases: `Idle` → `Scanning` → `Tentative` (same label on consecutive
//! ticks) → `Confirming` (streak reached, countdown armed) → `Confirmed`.
//! Observation is suspended while `Confirming`; only the countdown timer
//! advances, and cancelling it drops back to `Scanning` fully reset.

use serde::Serialize;

/// Consecutive matching ticks required before the countdown is armed.
pub const DEFAULT_CONFIRM_STREAK: u32 = 3;
/// Countdown duration in whole seconds.
pub const DEFAULT_COUNTDOWN_SECS: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub confirm_streak: u32,
    pub countdown_secs: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confirm_streak: DEFAULT_CONFIRM_STREAK,
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Scanning,
    Tentative,
    Confirming,
    Confirmed,
}

/// What one recognition tick saw, after matching.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// No face in the frame (also used for absorbed provider failures).
    NoFace,
    /// A face, but no profile within the match threshold.
    Unknown { distance: f32 },
    /// Best match across all faces in the frame.
    Match { label: String, distance: f32 },
}

/// State change published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Scanning began (camera on, session reset).
    Started,
    /// Frame had no usable face; any tentative progress was discarded.
    NoFace,
    /// Face seen but nobody matched.
    Unknown { distance: f32 },
    /// Candidate label seen, streak so far.
    Tentative { label: String, streak: u32 },
    CountdownStarted { label: String, seconds: u32 },
    CountdownTick { label: String, remaining: u32 },
    CountdownCancelled { label: String },
    /// Terminal until the session is explicitly restarted.
    Confirmed { label: String },
    /// Session returned to `Idle`.
    Stopped,
}

/// Per-session recognition state. Owned by the engine; exists only while
/// the recognition camera is active (plus the terminal `Confirmed` rest).
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    phase: Phase,
    tentative: Option<String>,
    streak: u32,
    remaining: u32,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            tentative: None,
            streak: 0,
            remaining: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True while recognition ticks should be evaluated.
    pub fn is_polling(&self) -> bool {
        matches!(self.phase, Phase::Scanning | Phase::Tentative)
    }

    pub fn is_counting_down(&self) -> bool {
        self.phase == Phase::Confirming
    }

    pub fn tentative_label(&self) -> Option<&str> {
        self.tentative.as_deref()
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining
    }

    /// Enter `Scanning` with every field reset. Valid from any phase,
    /// including the terminal `Confirmed`.
    pub fn begin(&mut self) -> Transition {
        self.tentative = None;
        self.streak = 0;
        self.remaining = 0;
        self.phase = Phase::Scanning;
        Transition::Started
    }

    /// Feed one recognition tick. Ignored unless polling — while the
    /// countdown runs (and in `Idle`/`Confirmed`) no match evaluation
    /// happens, so observations arriving there are dropped.
    pub fn observe(&mut self, obs: Observation) -> Vec<Transition> {
        if !self.is_polling() {
            return Vec::new();
        }

        match obs {
            Observation::NoFace => {
                self.reset_candidate();
                self.phase = Phase::Scanning;
                vec![Transition::NoFace]
            }
            Observation::Unknown { distance } => {
                self.reset_candidate();
                self.phase = Phase::Scanning;
                vec![Transition::Unknown { distance }]
            }
            Observation::Match { label, .. } => {
                if self.tentative.as_deref() == Some(label.as_str()) {
                    self.streak += 1;
                    if self.streak >= self.config.confirm_streak {
                        self.phase = Phase::Confirming;
                        self.remaining = self.config.countdown_secs;
                        return vec![Transition::CountdownStarted {
                            label,
                            seconds: self.remaining,
                        }];
                    }
                    vec![Transition::Tentative {
                        label,
                        streak: self.streak,
                    }]
                } else {
                    // Switching labels discards all prior progress.
                    self.tentative = Some(label.clone());
                    self.streak = 1;
                    self.phase = Phase::Tentative;
                    vec![Transition::Tentative { label, streak: 1 }]
                }
            }
        }
    }

    /// Advance the countdown by one second. No-op outside `Confirming`.
    pub fn tick_countdown(&mut self) -> Vec<Transition> {
        if self.phase != Phase::Confirming {
            return Vec::new();
        }
        let Some(label) = self.tentative.clone() else {
            return Vec::new();
        };

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.phase = Phase::Confirmed;
            return vec![
                Transition::CountdownTick {
                    label: label.clone(),
                    remaining: 0,
                },
                Transition::Confirmed { label },
            ];
        }
        vec![Transition::CountdownTick {
            label,
            remaining: self.remaining,
        }]
    }

    /// Cancel a running countdown and return to `Scanning` fully reset.
    /// No-op outside `Confirming`.
    pub fn cancel_countdown(&mut self) -> Option<Transition> {
        if self.phase != Phase::Confirming {
            return None;
        }
        let label = self.tentative.take().unwrap_or_default();
        self.streak = 0;
        self.remaining = 0;
        self.phase = Phase::Scanning;
        Some(Transition::CountdownCancelled { label })
    }

    /// Stop the session: cancel any countdown and return to `Idle`.
    pub fn halt(&mut self) -> Vec<Transition> {
        let mut out = Vec::new();
        if let Some(cancelled) = self.cancel_countdown() {
            out.push(cancelled);
        }
        if self.phase != Phase::Idle {
            out.push(Transition::Stopped);
        }
        self.reset_candidate();
        self.remaining = 0;
        self.phase = Phase::Idle;
        out
    }

    fn reset_candidate(&mut self) {
        self.tentative = None;
        self.streak = 0;
    }
}
