use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::Duration;

/// Inter-arrival sampler of a Poisson process, used for randomized CS demand.
pub struct Poisson<R: Rng + ?Sized> {
    pub rng: Box<R>,
    pub rate: f64,
}

impl Poisson<SmallRng> {
    pub fn new(rate: f64, seed: u64) -> Self {
        Self {
            rng: Box::new(SmallRng::seed_from_u64(seed)),
            rate,
        }
    }

    /// Seconds until the next event.
    pub fn time_for_next_event(&mut self) -> f64 {
        -(1.0f64 - self.rng.random::<f64>()).ln() / self.rate
    }

    pub fn next_delay(&mut self) -> Duration {
        Duration::from_secs_f64(self.time_for_next_event())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_schedule() {
        let mut a = Poisson::new(2., 7);
        let mut b = Poisson::new(2., 7);

        for _ in 0..16 {
            assert_eq!(a.next_delay(), b.next_delay());
        }
    }

    #[test]
    fn mean_follows_rate() {
        let mut poisson = Poisson::new(4., 42);
        let samples = 20_000;
        let total: f64 = (0..samples).map(|_| poisson.time_for_next_event()).sum();
        let mean = total / samples as f64;

        assert!(mean > 0.2 && mean < 0.3, "mean {mean} too far from 0.25");
    }

    #[test]
    fn delays_are_non_negative() {
        let mut poisson = Poisson::new(0.5, 1);
        assert!((0..1000).all(|_| poisson.time_for_next_event() >= 0.));
    }
}
