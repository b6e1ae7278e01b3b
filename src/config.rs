//! Per-process node configuration.

use crate::error::ConfigError;
use std::{num::NonZeroU64, time::Duration};

/// Default time a node occupies the critical section.
pub const DEFAULT_CS_DURATION: Duration = Duration::from_secs(5);
/// Default delay before a node asks for the critical section.
pub const DEFAULT_WANTS_CS_AFTER: Duration = Duration::from_secs(30);
/// Default pacing delay applied before each outbound token.
pub const DEFAULT_FORWARD_DELAY: Duration = Duration::from_secs(1);

/// Controlled token loss, used to exercise regeneration.
///
/// Rounds count Ping forwards of this node: the first Ping it forwards opens
/// round 1, and a Pong belongs to the round of the latest Ping forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub lose_ping_round: Option<NonZeroU64>,
    pub lose_pong_round: Option<NonZeroU64>,
}

/// Magnitude given to tokens rebuilt after a loss was detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegenerationPolicy {
    /// Regenerate at `|value| + 1`, so nodes further down the ring cannot
    /// mistake the rebuilt pair for the surviving token.
    #[default]
    Advance,
    /// Regenerate at `|value|`.
    SameGeneration,
}

/// When a node decides it wants the critical section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemandSchedule {
    /// Fixed delay after startup and after every CS exit.
    Fixed(Duration),
    /// Exponentially distributed delay with `rate` requests per second.
    Poisson { rate: f64, seed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub cs_duration: Duration,
    pub demand: DemandSchedule,
    pub forward_delay: Duration,
}

/// Startup dialing of the successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub address: String,
    pub successor: String,
    pub originate: bool,
    pub faults: FaultPlan,
    pub timing: Timing,
    pub connect: ConnectPolicy,
    pub regeneration: RegenerationPolicy,
}

impl FaultPlan {
    pub fn new(
        lose_ping_round: Option<u64>,
        lose_pong_round: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let round = |round: Option<u64>| match round {
            None => Ok(None),
            Some(round) => NonZeroU64::new(round).map(Some).ok_or(ConfigError::ZeroRound),
        };

        Ok(Self {
            lose_ping_round: round(lose_ping_round)?,
            lose_pong_round: round(lose_pong_round)?,
        })
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            cs_duration: DEFAULT_CS_DURATION,
            demand: DemandSchedule::Fixed(DEFAULT_WANTS_CS_AFTER),
            forward_delay: DEFAULT_FORWARD_DELAY,
        }
    }
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_millis(500),
        }
    }
}

impl NodeConfig {
    pub fn new(address: String, successor: String) -> Self {
        Self {
            address,
            successor,
            originate: false,
            faults: FaultPlan::default(),
            timing: Timing::default(),
            connect: ConnectPolicy::default(),
            regeneration: RegenerationPolicy::default(),
        }
    }

    /// Rejects configurations that would start the node in an inconsistent state.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(&self.address)?;
        validate_address(&self.successor)?;

        // ring size >= 3 is assumed; a self-loop is the only case detectable locally
        if self.address == self.successor {
            return Err(ConfigError::SelfLoop(self.address.clone()));
        }

        if let DemandSchedule::Poisson { rate, .. } = self.timing.demand {
            if !rate.is_finite() || rate <= 0. {
                return Err(ConfigError::InvalidRate(rate));
            }
        }

        if self.connect.attempts == 0 {
            return Err(ConfigError::NoConnectAttempts);
        }

        Ok(())
    }

    /// Port this node listens on for its predecessor.
    pub fn listen_port(&self) -> Result<u16, ConfigError> {
        validate_address(&self.address)
    }
}

fn validate_address(address: &str) -> Result<u16, ConfigError> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidAddress(address.to_string())),
        _ => Err(ConfigError::InvalidAddress(address.to_string())),
    }
}
