//! Protocol properties checked on the deterministic in-memory ring.

use std::num::NonZeroU64;

use ping_pong_ring::{
    config::{FaultPlan, RegenerationPolicy},
    node::NodeStatus,
    ring::{LocalRing, SimulationSettings},
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn manual(cs_ticks: u64) -> SimulationSettings {
    SimulationSettings {
        cs_ticks,
        wants_cs_ticks: None,
    }
}

fn total_regenerations(ring: &LocalRing) -> u64 {
    ring.nodes().iter().map(|n| n.stats().regenerations).sum()
}

fn in_flight_values(ring: &LocalRing) -> Vec<i64> {
    let mut values: Vec<i64> = ring.in_flight().iter().map(|t| t.value).collect();
    values.sort();
    values
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// The originator holds both tokens again after one circuit and starts generation 2.
#[test]
fn originator_incarnates_after_one_circuit() {
    let mut ring = LocalRing::new(3, manual(2)).unwrap();
    ring.start(0);
    ring.request_cs(0);

    assert!(ring.run_until(20, |r| r.node(0).stats().incarnations == 1));
    assert_eq!(ring.node(0).stats().cs_entries, 1);
    assert_eq!(ring.live_tokens(), (1, 1));
    assert_eq!(in_flight_values(&ring), vec![-2, 2]);
}

/// A node that wants the critical section takes it on the next Ping and
/// keeps both tokens until its timer expires.
#[test]
fn waiting_node_holds_tokens_for_its_critical_section() {
    let mut ring = LocalRing::new(3, manual(3)).unwrap();
    ring.request_cs(1);
    ring.start(0);

    ring.tick();
    assert_eq!(ring.node(1).status(), NodeStatus::InCs);

    ring.tick();
    assert_eq!(ring.node(1).ping().map(|t| t.value), Some(1));
    assert_eq!(ring.node(1).pong().map(|t| t.value), Some(-1));
    assert!(ring.in_flight().is_empty());

    // timer armed at tick 1 expires at tick 4
    ring.tick();
    assert!(ring.node(1).is_cs_busy());
    ring.tick();
    assert!(!ring.node(1).is_cs_busy());
    assert_eq!(ring.node(1).stats().incarnations, 1);
    assert_eq!(ring.node(1).status(), NodeStatus::Idle);
    assert_eq!(in_flight_values(&ring), vec![-2, 2]);
}

/// A wanting node reaches the critical section within one circuit.
#[test]
fn request_is_granted_within_a_circuit() {
    let mut ring = LocalRing::new(6, manual(2)).unwrap();
    ring.start(0);
    ring.run(3);

    ring.request_cs(4);
    assert!(ring.run_until(6, |r| r.node(4).is_cs_busy()));
}

/// Node 0 suppresses its first Pong; the next node to see the same Ping twice rebuilds the pair.
#[test]
fn lost_pong_is_regenerated_once() {
    let mut ring = LocalRing::new_with(3, manual(2), |index, node| {
        if index == 0 {
            node.with_faults(FaultPlan {
                lose_ping_round: None,
                lose_pong_round: NonZeroU64::new(1),
            })
        } else {
            node
        }
    })
    .unwrap();
    ring.start(0);
    assert_eq!(ring.live_tokens(), (1, 0));

    assert!(ring.run_until(10, |r| total_regenerations(r) == 1));
    assert_eq!(ring.node(1).stats().regenerations, 1);
    assert_eq!(ring.node(0).stats().suppressed, 1);

    ring.run(200);
    assert_eq!(total_regenerations(&ring), 1);
    assert_eq!(ring.live_tokens(), (1, 1));
}

/// A Pong dropped on the wire is detected through the surviving Ping.
#[test]
fn dropped_pong_is_recovered() {
    let mut ring = LocalRing::new(3, manual(2)).unwrap();
    let mut dropped = false;
    ring.set_drop_filter(move |from, token| {
        if from == 1 && !token.is_ping() && !dropped {
            dropped = true;
            return true;
        }
        false
    });
    ring.start(0);

    ring.run(100);
    assert_eq!(ring.dropped(), 1);
    assert_eq!(total_regenerations(&ring), 1);
    assert_eq!(ring.node(2).stats().regenerations, 1);
    assert_eq!(ring.live_tokens(), (1, 1));
}

/// A dropped Ping is detected through the surviving Pong, and the ring serves requests again.
#[test]
fn dropped_ping_is_recovered_and_ring_stays_live() {
    let mut ring = LocalRing::new(4, manual(2)).unwrap();
    let mut dropped = false;
    ring.set_drop_filter(move |from, token| {
        if from == 2 && token.is_ping() && !dropped {
            dropped = true;
            return true;
        }
        false
    });
    ring.start(0);
    ring.run(50);

    assert_eq!(ring.dropped(), 1);
    assert_eq!(total_regenerations(&ring), 1);
    assert_eq!(ring.live_tokens(), (1, 1));

    ring.request_cs(1);
    assert!(ring.run_until(10, |r| r.node(1).is_cs_busy()));
}

/// Rebuilding at the survivor's own magnitude makes downstream nodes that
/// remember that value rebuild too, duplicating tokens.
#[test]
fn same_generation_regeneration_duplicates_tokens() {
    let mut ring = LocalRing::new_with(3, manual(2), |index, node| {
        let node = node.with_regeneration(RegenerationPolicy::SameGeneration);
        if index == 0 {
            node.with_faults(FaultPlan {
                lose_ping_round: None,
                lose_pong_round: NonZeroU64::new(1),
            })
        } else {
            node
        }
    })
    .unwrap();
    ring.start(0);

    // first rebuild restores Ping=+1, Pong=-1 at the node after the originator
    assert!(ring.run_until(10, |r| r.node(1).stats().regenerations == 1));
    assert!(ring.in_flight().iter().any(|t| t.value == -1));

    let mut duplicated = false;
    for _ in 0..10 {
        ring.tick();
        duplicated |= ring.live_tokens().0 > 1;
    }
    assert!(duplicated);
    assert!(total_regenerations(&ring) > 1);
}

// ---------------------------------------------------------------------------
// Long runs
// ---------------------------------------------------------------------------

/// With every node asking repeatedly, nobody shares the critical section,
/// everybody gets it, and exactly one token of each kind stays alive.
#[test]
fn long_run_keeps_mutual_exclusion_and_liveness() {
    let mut ring = LocalRing::new(
        5,
        SimulationSettings {
            cs_ticks: 3,
            wants_cs_ticks: Some(5),
        },
    )
    .unwrap();
    ring.start(0);

    for _ in 0..2_000 {
        ring.tick();
        assert_eq!(ring.live_tokens(), (1, 1));
        assert!(ring.nodes().iter().filter(|n| n.is_cs_busy()).count() <= 1);
    }

    assert_eq!(ring.max_concurrent_cs(), 1);
    assert_eq!(total_regenerations(&ring), 0);
    assert!(ring.nodes().iter().all(|n| n.stats().cs_entries >= 1));
}

/// Generations forwarded by any node never go backwards.
#[test]
fn generations_are_monotonic_under_load() {
    let mut ring = LocalRing::new(
        4,
        SimulationSettings {
            cs_ticks: 4,
            wants_cs_ticks: Some(3),
        },
    )
    .unwrap();
    ring.start(0);

    let mut highest = vec![0; 4];
    for _ in 0..500 {
        ring.tick();
        for (index, node) in ring.nodes().iter().enumerate() {
            let generation = node.last_value().abs();
            assert!(generation >= highest[index], "node {index} went back in generation");
            highest[index] = generation;
        }
    }
    assert!(highest.iter().all(|&g| g > 1));
}
