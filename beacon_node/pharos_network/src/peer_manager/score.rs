//! Peer scoring: an action-weighted RPC score and a gossipsub score, both exponentially
//! decayed, blended into one number with fixed disconnect and ban thresholds.

use serde::Serialize;
use std::time::Instant;

/// The default score for new peers.
pub const DEFAULT_SCORE: f64 = 0.0;
/// The minimum reputation before a peer is disconnected.
const MIN_SCORE_BEFORE_DISCONNECT: f64 = -20.0;
/// The minimum reputation before a peer is banned.
const MIN_SCORE_BEFORE_BAN: f64 = -50.0;
/// If a peer has a gossipsub score below this, it is graylisted by gossipsub and we count it
/// into the blend at full weight.
pub const GOSSIPSUB_GREYLIST_THRESHOLD: f64 = -16000.0;
/// The maximum score a peer can obtain.
const MAX_SCORE: f64 = 100.0;
/// The minimum score a peer can obtain.
const MIN_SCORE: f64 = -100.0;
/// The halflife of a peer's score, dictating the decay rate.
const SCORE_HALFLIFE: f64 = 600.0;
/// The number of seconds a banned peer's score remains at the ban floor before beginning to
/// decay back.
const BANNED_BEFORE_DECAY_SECS: u64 = 30 * 60;

/// The weight applied to negative gossipsub scores, calibrated so that a gossipsub graylist
/// alone is enough to reach the disconnect threshold.
const GOSSIPSUB_NEGATIVE_SCORE_WEIGHT: f64 =
    (MIN_SCORE_BEFORE_DISCONNECT - 1.0) / GOSSIPSUB_GREYLIST_THRESHOLD;
const GOSSIPSUB_POSITIVE_SCORE_WEIGHT: f64 = GOSSIPSUB_NEGATIVE_SCORE_WEIGHT;

/// A reprimand to a peer, weighted by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAction {
    /// The peer has performed an unforgivable action: straight to the ban floor.
    Fatal,
    /// An error that is low tolerance: a few of these and the peer goes.
    LowToleranceError,
    /// An error of medium tolerance.
    MidToleranceError,
    /// An error that can happen to honest peers under churn; many are needed to matter.
    HighToleranceError,
}

impl PeerAction {
    fn score_change(&self) -> f64 {
        match self {
            PeerAction::Fatal => f64::NEG_INFINITY,
            PeerAction::LowToleranceError => -10.0,
            PeerAction::MidToleranceError => -5.0,
            PeerAction::HighToleranceError => -1.0,
        }
    }
}

impl std::fmt::Display for PeerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerAction::Fatal => write!(f, "Fatal"),
            PeerAction::LowToleranceError => write!(f, "Low Tolerance Error"),
            PeerAction::MidToleranceError => write!(f, "Mid Tolerance Error"),
            PeerAction::HighToleranceError => write!(f, "High Tolerance Error"),
        }
    }
}

/// The derived health of a peer's score.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ScoreState {
    /// We are content with the peer's behaviour.
    Healthy,
    /// The peer's score is low enough that it should be disconnected.
    Disconnected,
    /// The peer is banned.
    Banned,
}

impl std::fmt::Display for ScoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreState::Healthy => write!(f, "Healthy"),
            ScoreState::Disconnected => write!(f, "Disconnected"),
            ScoreState::Banned => write!(f, "Banned"),
        }
    }
}

/// A peer's score: the behaviour-driven component plus the gossipsub blend.
#[derive(Debug, Clone, Serialize)]
pub struct Score {
    /// The global score, the blend served to consumers.
    score: f64,
    /// The behaviour (RPC action) component.
    behaviour_score: f64,
    /// The score reported by the gossipsub scoring system.
    gossipsub_score: f64,
    /// Ignore the negative gossipsub score: set for a bounded share of the fleet so that a
    /// noisy gossip environment cannot ban otherwise-useful peers.
    ignore_negative_gossipsub_score: bool,
    #[serde(skip)]
    last_updated: Instant,
}

impl Default for Score {
    fn default() -> Self {
        Score {
            score: DEFAULT_SCORE,
            behaviour_score: DEFAULT_SCORE,
            gossipsub_score: DEFAULT_SCORE,
            ignore_negative_gossipsub_score: false,
            last_updated: Instant::now(),
        }
    }
}

impl Score {
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn max_score() -> f64 {
        MAX_SCORE
    }

    pub fn state(&self) -> ScoreState {
        if self.score <= MIN_SCORE_BEFORE_BAN {
            ScoreState::Banned
        } else if self.score <= MIN_SCORE_BEFORE_DISCONNECT {
            ScoreState::Disconnected
        } else {
            ScoreState::Healthy
        }
    }

    pub fn is_good_gossipsub_peer(&self) -> bool {
        self.gossipsub_score >= 0.0
    }

    /// Apply a reprimand to the behaviour component.
    pub fn apply_peer_action(&mut self, action: PeerAction) {
        let delta = action.score_change();
        if delta == f64::NEG_INFINITY {
            self.behaviour_score = MIN_SCORE;
        } else {
            self.behaviour_score = (self.behaviour_score + delta).clamp(MIN_SCORE, MAX_SCORE);
        }
        self.recompute_score();
    }

    /// Exponentially decay the behaviour component towards zero. Banned peers hold the floor
    /// for `BANNED_BEFORE_DECAY_SECS` before decaying back.
    pub fn update(&mut self) {
        let now = Instant::now();
        let since_update = now.saturating_duration_since(self.last_updated);

        if self.state() == ScoreState::Banned
            && since_update.as_secs() < BANNED_BEFORE_DECAY_SECS
        {
            return;
        }

        let halflife_decays = since_update.as_secs_f64() / SCORE_HALFLIFE;
        let decay_factor = 0.5_f64.powf(halflife_decays);
        self.behaviour_score *= decay_factor;
        self.last_updated = now;
        self.recompute_score();
    }

    /// Feed the latest gossipsub score into the blend.
    pub fn update_gossipsub_score(&mut self, new_score: f64, ignore: bool) {
        // Negative gossipsub scores can only be updated after the cooldown handled by the
        // caller; the ignore flag shields the allotted share of worst peers.
        self.gossipsub_score = new_score;
        self.ignore_negative_gossipsub_score = ignore;
        self.recompute_score();
    }

    fn recompute_score(&mut self) {
        self.score = self.behaviour_score;
        if self.gossipsub_score >= 0.0 {
            self.score += self.gossipsub_score * GOSSIPSUB_POSITIVE_SCORE_WEIGHT;
        } else if !self.ignore_negative_gossipsub_score {
            self.score += self.gossipsub_score * GOSSIPSUB_NEGATIVE_SCORE_WEIGHT;
        }
        self.score = self.score.clamp(MIN_SCORE, MAX_SCORE);
    }

    /// Test-only helper to age the score artificially.
    #[cfg(test)]
    pub fn set_last_updated(&mut self, instant: Instant) {
        self.last_updated = instant;
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.score.partial_cmp(&other.score)
    }
}
