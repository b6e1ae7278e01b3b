//! Per-node protocol state machine.
//!
//! [`Node`] owns the tokens a node currently holds and decides, for every
//! [`NodeEvent`], whether to forward, regenerate, incarnate or keep them for
//! the critical section. It performs no I/O: every outbound effect is
//! returned as an [`Action`] for the runtime to carry out, which keeps the
//! protocol deterministic and lets [`crate::ring::LocalRing`] drive it
//! without sockets.

use crate::{
    config::{FaultPlan, RegenerationPolicy},
    log,
    message::{NodeEvent, Token, TokenKind},
    FIRST_GENERATION,
};
use color_print::cformat;

/// Effects the runtime must perform after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Hand the token to the transport for the successor.
    Send(Token),
    /// Arm the critical section occupancy timer.
    StartCsTimer,
    /// Arm the wants-CS scheduler for the next request.
    ScheduleWantsCs,
}

/// Coarse protocol state, derived from the node's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Holds no token.
    Idle,
    /// Holds at least one token and is not in the critical section.
    Holding,
    /// Occupies the critical section.
    InCs,
}

/// Counters kept for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub received: u64,
    pub forwarded: u64,
    pub suppressed: u64,
    pub regenerations: u64,
    pub incarnations: u64,
    pub cs_entries: u64,
}

/// Point-in-time copy of a node's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub status: NodeStatus,
    pub ping: Option<i64>,
    pub pong: Option<i64>,
    pub last_value: i64,
    pub wants_cs: bool,
    pub round: u64,
    pub stats: NodeStats,
}

#[derive(Debug, Clone)]
pub struct Node {
    address: String,
    successor: String,
    ping: Option<Token>,
    pong: Option<Token>,
    /// Value of the last token that went through this node, 0 before any.
    last_value: i64,
    cs_busy: bool,
    wants_cs: bool,
    /// Number of Ping forwards so far.
    round: u64,
    faults: FaultPlan,
    ping_fault_fired: bool,
    pong_fault_fired: bool,
    regeneration: RegenerationPolicy,
    stats: NodeStats,
}

impl Node {
    pub fn new(address: String, successor: String) -> Self {
        Self {
            address,
            successor,
            ping: None,
            pong: None,
            last_value: 0,
            cs_busy: false,
            wants_cs: false,
            round: 0,
            faults: FaultPlan::default(),
            ping_fault_fired: false,
            pong_fault_fired: false,
            regeneration: RegenerationPolicy::default(),
            stats: NodeStats::default(),
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_regeneration(mut self, regeneration: RegenerationPolicy) -> Self {
        self.regeneration = regeneration;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn successor(&self) -> &str {
        &self.successor
    }

    pub fn ping(&self) -> Option<&Token> {
        self.ping.as_ref()
    }

    pub fn pong(&self) -> Option<&Token> {
        self.pong.as_ref()
    }

    pub fn last_value(&self) -> i64 {
        self.last_value
    }

    pub fn is_cs_busy(&self) -> bool {
        self.cs_busy
    }

    pub fn wants_cs(&self) -> bool {
        self.wants_cs
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    pub fn status(&self) -> NodeStatus {
        if self.cs_busy {
            NodeStatus::InCs
        } else if self.ping.is_some() || self.pong.is_some() {
            NodeStatus::Holding
        } else {
            NodeStatus::Idle
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            status: self.status(),
            ping: self.ping.as_ref().map(|t| t.value),
            pong: self.pong.as_ref().map(|t| t.value),
            last_value: self.last_value,
            wants_cs: self.wants_cs,
            round: self.round,
            stats: self.stats,
        }
    }

    /// Actions to run once the node is wired into the ring.
    ///
    /// Arms the demand scheduler and, on the originating node, releases the
    /// first Ping/Pong pair.
    pub fn start(&mut self, originate: bool) -> Vec<Action> {
        let mut actions = vec![Action::ScheduleWantsCs];

        if originate {
            log::warn(&cformat!(
                "<bold>{}</bold> originates generation <bold>{}</bold>",
                self.address,
                FIRST_GENERATION
            ));
            self.ping = Some(Token::ping(FIRST_GENERATION));
            self.pong = Some(Token::pong(FIRST_GENERATION));
            actions.extend(self.forward());
        }

        actions
    }

    /// Applies one event. Events must be applied one at a time.
    pub fn handle(&mut self, event: NodeEvent) -> Vec<Action> {
        match event {
            NodeEvent::TokenArrived(token) => self.on_token(token),
            NodeEvent::CsTimerExpired => self.on_cs_timer_expired(),
            NodeEvent::WantsCs => self.on_wants_cs(),
        }
    }

    fn on_token(&mut self, token: Token) -> Vec<Action> {
        log::info(&cformat!(
            "Received {} from <bold>{}</bold>",
            token.describe(),
            token.sender
        ));
        self.stats.received += 1;

        let value = token.value;
        let kind = token.kind();
        if value == self.last_value {
            // the rebuilt pair replaces the survivor
            self.regenerate(&token);
        } else {
            match kind {
                TokenKind::Ping => self.ping = Some(token),
                TokenKind::Pong => self.pong = Some(token),
            }
        }
        self.last_value = value;

        if self.cs_busy {
            return Vec::new();
        }

        if self.wants_cs && kind == TokenKind::Ping {
            self.enter_cs();
            return vec![Action::StartCsTimer];
        }

        self.forward()
    }

    fn on_cs_timer_expired(&mut self) -> Vec<Action> {
        if !self.cs_busy {
            log::debug(&cformat!(
                "<bold>{}</bold> ignores a CS timer outside the critical section",
                self.address
            ));
            return Vec::new();
        }

        log::warn(&cformat!(
            "<bold>{}</bold> <red, bold>leaves</red, bold> critical section",
            self.address
        ));
        self.cs_busy = false;

        let met = match (&self.ping, &self.pong) {
            (Some(ping), Some(_)) => Some(ping.generation()),
            _ => None,
        };
        if let Some(generation) = met {
            self.incarnate(generation);
        }

        let mut actions = self.forward();
        actions.push(Action::ScheduleWantsCs);
        actions
    }

    fn on_wants_cs(&mut self) -> Vec<Action> {
        if self.cs_busy || self.wants_cs {
            log::debug(&cformat!(
                "<bold>{}</bold> already in or waiting for the critical section",
                self.address
            ));
            return Vec::new();
        }

        log::warn(&cformat!("<bold>{}</bold> wants to enter critical section", self.address));
        self.wants_cs = true;
        Vec::new()
    }

    fn enter_cs(&mut self) {
        log::warn(&cformat!(
            "<bold>{}</bold> <green, bold>enters</green, bold> critical section",
            self.address
        ));
        self.cs_busy = true;
        self.wants_cs = false;
        self.stats.cs_entries += 1;
    }

    /// The received token came back unchanged, so its counterpart was lost.
    fn regenerate(&mut self, survivor: &Token) {
        let generation = match self.regeneration {
            RegenerationPolicy::Advance => next_generation(survivor.generation()),
            RegenerationPolicy::SameGeneration => survivor.generation(),
        };

        log::warn(&cformat!(
            "{} token is lost, <bold>{}</bold> regenerates generation <bold>{}</bold>",
            survivor.kind().opposite(),
            self.address,
            generation
        ));
        self.ping = Some(Token::ping(generation));
        self.pong = Some(Token::pong(generation));
        self.stats.regenerations += 1;
    }

    /// Both tokens met here: start the next generation.
    fn incarnate(&mut self, generation: i64) {
        let generation = next_generation(generation);

        log::warn(&cformat!(
            "<bold>{}</bold> incarnates generation <bold>{}</bold>",
            self.address,
            generation
        ));
        self.ping = Some(Token::ping(generation));
        self.pong = Some(Token::pong(generation));
        self.stats.incarnations += 1;
    }

    /// Forwards every held token, Ping first.
    fn forward(&mut self) -> Vec<Action> {
        let mut actions = Vec::with_capacity(2);

        if let Some(ping) = self.ping.take() {
            self.round += 1;
            let suppress = !self.ping_fault_fired
                && self.faults.lose_ping_round.map(|r| r.get()) == Some(self.round);
            if suppress {
                self.ping_fault_fired = true;
            }
            actions.extend(self.send(ping, suppress));
        }

        if let Some(pong) = self.pong.take() {
            let suppress = !self.pong_fault_fired
                && self.faults.lose_pong_round.map(|r| r.get()) == Some(self.round);
            if suppress {
                self.pong_fault_fired = true;
            }
            actions.extend(self.send(pong, suppress));
        }

        actions
    }

    /// A suppressed send still clears the slot and advances the loss marker.
    fn send(&mut self, token: Token, suppress: bool) -> Option<Action> {
        self.last_value = token.value;

        if suppress {
            log::error(&cformat!(
                "Omitting send of {} in round <bold>{}</bold>, the token is lost",
                token.describe(),
                self.round
            ));
            self.stats.suppressed += 1;
            return None;
        }

        log::info(&cformat!(
            "<bold>{}</bold> sends {} to <bold>{}</bold>",
            self.address,
            token.describe(),
            self.successor
        ));
        self.stats.forwarded += 1;
        Some(Action::Send(token.with_sender(&self.address)))
    }
}

/// Generation following `generation`, kept at `generation` if it cannot grow.
fn next_generation(generation: i64) -> i64 {
    match generation.checked_add(1) {
        Some(next) => next,
        None => {
            log::error(&cformat!(
                "Generation <bold>{}</bold> cannot advance, keeping it",
                generation
            ));
            generation
        }
    }
}
