//! Injectable time source.
//!
//! The token lifecycle logic never reads the wall clock directly; it goes
//! through `Clock` so expiry and activity-gating decisions can be unit
//! tested with a manually advanced clock instead of real timers.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
