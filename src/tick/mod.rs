pub mod delta_sync;
pub mod engine;
pub mod game_loop;
pub mod profiling;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock in seconds, the time base of every engine operation
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
