//! Critical section occupancy timer and wants-CS scheduler.
//!
//! Both run as detached tokio tasks that sleep and then post a [`NodeEvent`]
//! into the node's event queue, so the event loop is never blocked and all
//! state changes stay serialized there.

use crate::{
    config::{DemandSchedule, Timing},
    log,
    message::NodeEvent,
    poisson::Poisson,
};
use rand::rngs::SmallRng;
use std::time::Duration;
use tokio::{sync::mpsc::Sender, task::JoinHandle, time::sleep};

enum Demand {
    Fixed(Duration),
    Poisson(Poisson<SmallRng>),
}

pub struct Timers {
    events: Sender<NodeEvent>,
    cs_duration: Duration,
    demand: Demand,
}

impl Timers {
    pub fn new(events: Sender<NodeEvent>, timing: &Timing) -> Self {
        let demand = match timing.demand {
            DemandSchedule::Fixed(delay) => Demand::Fixed(delay),
            DemandSchedule::Poisson { rate, seed } => Demand::Poisson(Poisson::new(rate, seed)),
        };

        Self {
            events,
            cs_duration: timing.cs_duration,
            demand,
        }
    }

    /// Posts `CsTimerExpired` once the occupancy window is over.
    pub fn start_cs(&self) -> JoinHandle<()> {
        post_after(self.events.clone(), self.cs_duration, NodeEvent::CsTimerExpired)
    }

    /// Posts `WantsCs` after the next demand delay.
    pub fn schedule_wants_cs(&mut self) -> JoinHandle<()> {
        let delay = self.next_wants_delay();
        post_after(self.events.clone(), delay, NodeEvent::WantsCs)
    }

    pub fn next_wants_delay(&mut self) -> Duration {
        match &mut self.demand {
            Demand::Fixed(delay) => *delay,
            Demand::Poisson(poisson) => poisson.next_delay(),
        }
    }
}

fn post_after(events: Sender<NodeEvent>, delay: Duration, event: NodeEvent) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep(delay).await;
        if events.send(event).await.is_err() {
            log::debug("Event loop is gone, dropping timer event");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn timing(demand: DemandSchedule) -> Timing {
        Timing {
            cs_duration: Duration::from_millis(200),
            demand,
            forward_delay: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cs_timer_posts_after_duration() {
        let (tx, mut rx) = mpsc::channel(4);
        let timers = Timers::new(tx, &timing(DemandSchedule::Fixed(Duration::from_secs(1))));

        let started = tokio::time::Instant::now();
        timers.start_cs();

        assert_eq!(rx.recv().await, Some(NodeEvent::CsTimerExpired));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_demand_posts_wants_cs() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = Timers::new(tx, &timing(DemandSchedule::Fixed(Duration::from_secs(30))));

        let started = tokio::time::Instant::now();
        timers.schedule_wants_cs();

        assert_eq!(rx.recv().await, Some(NodeEvent::WantsCs));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn poisson_demand_is_seeded() {
        let (tx, _rx) = mpsc::channel(4);
        let demand = DemandSchedule::Poisson { rate: 1., seed: 9 };
        let mut a = Timers::new(tx.clone(), &timing(demand));
        let mut b = Timers::new(tx, &timing(demand));

        for _ in 0..8 {
            assert_eq!(a.next_wants_delay(), b.next_wants_delay());
        }
    }
}
