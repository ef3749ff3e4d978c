//! Resource and focus arbitration.

use anyhow::Result;

/// External arbiter granting the session the right to render.
///
/// A revoke is reported back through `Player::notify_resource_revoked`.
pub trait ResourceArbiter: Send + Sync {
    fn acquire(&self) -> Result<()>;
    fn release(&self);
}

/// Arbiter that always grants.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArbiter;

impl ResourceArbiter for NoArbiter {
    fn acquire(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) {}
}
