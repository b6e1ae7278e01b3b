//! Deterministic in-memory ring.
//!
//! [`LocalRing`] wires N [`Node`]s into a cycle of FIFO links inside one
//! thread. Time advances in ticks: due timers fire first, then every node
//! takes at most one token from its inbound link. A drop filter stands in for
//! a lossy transport.

use crate::{
    error::ConfigError,
    log,
    message::{NodeEvent, Token},
    node::{Action, Node},
};
use std::collections::VecDeque;

/// Decides whether a token sent by node `from` is lost on its way to the successor.
pub type DropFilter = Box<dyn FnMut(usize, &Token) -> bool>;

/// Timer lengths of a simulation, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationSettings {
    pub cs_ticks: u64,
    /// `None` leaves CS requests to [`LocalRing::request_cs`].
    pub wants_cs_ticks: Option<u64>,
}

pub struct LocalRing {
    nodes: Vec<Node>,
    /// `inboxes[i]` is the link from node `i - 1` into node `i`.
    inboxes: Vec<VecDeque<Token>>,
    cs_deadlines: Vec<Option<u64>>,
    wants_deadlines: Vec<Option<u64>>,
    settings: SimulationSettings,
    tick: u64,
    drop_filter: Option<DropFilter>,
    dropped: u64,
    max_concurrent_cs: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            cs_ticks: 5,
            wants_cs_ticks: Some(30),
        }
    }
}

impl LocalRing {
    pub fn new(size: usize, settings: SimulationSettings) -> Result<Self, ConfigError> {
        Self::new_with(size, settings, |_, node| node)
    }

    /// Builds a ring, letting `configure` adjust each node (faults, regeneration policy).
    pub fn new_with<F>(
        size: usize,
        settings: SimulationSettings,
        mut configure: F,
    ) -> Result<Self, ConfigError>
    where
        F: FnMut(usize, Node) -> Node,
    {
        if size < 3 {
            return Err(ConfigError::RingTooSmall(size));
        }

        let nodes = (0..size)
            .map(|i| configure(i, Node::new(node_name(i), node_name((i + 1) % size))))
            .collect();

        Ok(Self {
            nodes,
            inboxes: vec![VecDeque::new(); size],
            cs_deadlines: vec![None; size],
            wants_deadlines: vec![None; size],
            settings,
            tick: 0,
            drop_filter: None,
            dropped: 0,
            max_concurrent_cs: 0,
        })
    }

    pub fn set_drop_filter<F>(&mut self, filter: F)
    where
        F: FnMut(usize, &Token) -> bool + 'static,
    {
        self.drop_filter = Some(Box::new(filter));
    }

    /// Starts every node; `originator` releases the first generation.
    pub fn start(&mut self, originator: usize) {
        for index in 0..self.nodes.len() {
            let actions = self.nodes[index].start(index == originator);
            self.execute(index, actions);
        }
    }

    /// Makes node `index` want the critical section right now.
    pub fn request_cs(&mut self, index: usize) {
        self.apply(index, NodeEvent::WantsCs);
    }

    pub fn tick(&mut self) {
        self.tick += 1;

        for index in 0..self.nodes.len() {
            if self.cs_deadlines[index].is_some_and(|deadline| deadline <= self.tick) {
                self.cs_deadlines[index] = None;
                self.apply(index, NodeEvent::CsTimerExpired);
            }
            if self.wants_deadlines[index].is_some_and(|deadline| deadline <= self.tick) {
                self.wants_deadlines[index] = None;
                self.apply(index, NodeEvent::WantsCs);
            }
        }

        for index in 0..self.nodes.len() {
            if let Some(token) = self.inboxes[index].pop_front() {
                self.apply(index, NodeEvent::TokenArrived(token));
            }
        }
    }

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Ticks until `done` holds, at most `max_ticks` times. Returns whether it held.
    pub fn run_until<F>(&mut self, max_ticks: u64, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            self.tick();
        }
        done(self)
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Highest number of nodes seen inside the critical section at once.
    pub fn max_concurrent_cs(&self) -> usize {
        self.max_concurrent_cs
    }

    /// Tokens currently travelling on the links.
    pub fn in_flight(&self) -> Vec<&Token> {
        self.inboxes.iter().flatten().collect()
    }

    /// Live `(pings, pongs)` across links and held slots.
    pub fn live_tokens(&self) -> (usize, usize) {
        let in_flight = self.in_flight();
        let pings = in_flight.iter().filter(|t| t.is_ping()).count()
            + self.nodes.iter().filter(|n| n.ping().is_some()).count();
        let pongs = in_flight.iter().filter(|t| !t.is_ping()).count()
            + self.nodes.iter().filter(|n| n.pong().is_some()).count();
        (pings, pongs)
    }

    fn apply(&mut self, index: usize, event: NodeEvent) {
        let actions = self.nodes[index].handle(event);
        self.execute(index, actions);

        let in_cs = self.nodes.iter().filter(|n| n.is_cs_busy()).count();
        self.max_concurrent_cs = self.max_concurrent_cs.max(in_cs);
    }

    fn execute(&mut self, index: usize, actions: Vec<Action>) {
        let successor = (index + 1) % self.nodes.len();
        let now = self.tick;

        for action in actions {
            match action {
                Action::Send(token) => {
                    let lost = self
                        .drop_filter
                        .as_mut()
                        .is_some_and(|filter| filter(index, &token));
                    if lost {
                        log::debug(&format!(
                            "Link {index} to {successor} drops {}",
                            token.describe()
                        ));
                        self.dropped += 1;
                    } else {
                        self.inboxes[successor].push_back(token);
                    }
                }
                Action::StartCsTimer => {
                    self.cs_deadlines[index] = Some(now + self.settings.cs_ticks);
                }
                Action::ScheduleWantsCs => {
                    self.wants_deadlines[index] =
                        self.settings.wants_cs_ticks.map(|ticks| now + ticks);
                }
            }
        }
    }
}

fn node_name(index: usize) -> String {
    format!("node-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> SimulationSettings {
        SimulationSettings {
            cs_ticks: 3,
            wants_cs_ticks: None,
        }
    }

    #[test]
    fn rejects_rings_below_three_nodes() {
        assert!(matches!(LocalRing::new(2, manual()), Err(ConfigError::RingTooSmall(2))));
        assert!(LocalRing::new(3, manual()).is_ok());
    }

    #[test]
    fn nodes_are_wired_into_a_cycle() {
        let ring = LocalRing::new(4, manual()).unwrap();
        assert_eq!(ring.node(0).successor(), "node-1");
        assert_eq!(ring.node(3).successor(), "node-0");
    }

    #[test]
    fn originator_puts_one_pair_on_the_first_link() {
        let mut ring = LocalRing::new(3, manual()).unwrap();
        ring.start(0);

        let values: Vec<i64> = ring.in_flight().iter().map(|t| t.value).collect();
        assert_eq!(values, vec![1, -1]);
        assert_eq!(ring.live_tokens(), (1, 1));
    }

    #[test]
    fn drop_filter_counts_losses() {
        let mut ring = LocalRing::new(3, manual()).unwrap();
        ring.set_drop_filter(|from, token| from == 0 && !token.is_ping());
        ring.start(0);

        assert_eq!(ring.dropped(), 1);
        assert_eq!(ring.live_tokens(), (1, 0));
    }

    #[test]
    fn automatic_demand_rearms_after_exit() {
        let mut ring = LocalRing::new(
            3,
            SimulationSettings {
                cs_ticks: 2,
                wants_cs_ticks: Some(4),
            },
        )
        .unwrap();
        ring.start(0);
        ring.run(200);

        assert!(ring.nodes().iter().all(|n| n.stats().cs_entries >= 2));
        assert_eq!(ring.max_concurrent_cs(), 1);
    }
}
