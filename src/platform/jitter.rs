use std::time::Duration;

use tinyrand::{Rand, RandRange, Seeded, StdRand};
use tinyrand_std::ClockSeed;

const RESOLUTION: u64 = 1000;

/// Random fraction of `interval`, used to delay the first heartbeat after Hello so a fleet of
/// reconnecting clients does not beat in lockstep
pub fn first_heartbeat(interval: Duration) -> Duration {
    let seed = ClockSeed::default().next_u64();
    let mut rng = StdRand::seed(seed);
    scaled(interval, rng.next_range(0..RESOLUTION))
}

fn scaled(interval: Duration, step: u64) -> Duration {
    interval.mul_f64(step.min(RESOLUTION) as f64 / RESOLUTION as f64)
}
