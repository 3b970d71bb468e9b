//! Eager RAM commitment: proof that this node actually holds the memory it
//! claims before it is allowed to join the fleet.
//!
//! The fleet's proof-of-RAM challenge (see the challenge handler in
//! `worker-node`) never reads this reservation back — it derives its
//! response from the coordinator's seed, and uses the node's continued
//! responsiveness under that CPU work as the actual liveness signal. That
//! signal only means something if the pages are actually backed by physical
//! memory at the time the node registers — otherwise the node would be
//! claiming RAM without paying for it. So construction here doesn't just
//! reserve address space, it writes to every page, once, and never touches
//! it again.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::StartupError;

const GIB: usize = 1 << 30;
const PAGE_SIZE: usize = 4096;

/// A block of committed memory, one per GiB of the requested budget.
struct Block(Vec<AtomicU8>);

/// Holds `max_ram_gb` GiB of page-touched memory for the lifetime of the
/// process. Never shrinks, never releases early — only dropped at process
/// exit. Write-only after commit: the fleet proves the commitment through
/// continued responsiveness, not by reading these bytes back.
pub struct RamReservation {
    #[allow(dead_code)]
    blocks: Vec<Block>,
    gib: u64,
}

impl RamReservation {
    /// Allocates and page-touches `gib` GiB of contiguous-per-block memory.
    /// Fails fast with [`StartupError::InsufficientMemory`] if any block
    /// can't be committed — a node that can't back its RAM claim must not
    /// start.
    pub fn commit(gib: u64) -> Result<Self, StartupError> {
        let mut blocks = Vec::with_capacity(gib as usize);
        for allocated in 0..gib {
            match Self::commit_one_block() {
                Some(block) => blocks.push(block),
                None => {
                    return Err(StartupError::InsufficientMemory {
                        requested_gb: gib,
                        allocated_gb: allocated,
                    })
                }
            }
        }
        Ok(Self { blocks, gib })
    }

    fn commit_one_block() -> Option<Block> {
        let mut data: Vec<AtomicU8> = Vec::new();
        data.try_reserve_exact(GIB).ok()?;
        data.resize_with(GIB, || AtomicU8::new(0));
        for page_start in (0..GIB).step_by(PAGE_SIZE) {
            data[page_start].store(1, Ordering::Relaxed);
        }
        Some(Block(data))
    }

    /// The committed budget, in GiB.
    pub fn gib(&self) -> u64 {
        self.gib
    }

    /// Total committed bytes.
    pub fn bytes(&self) -> u64 {
        self.gib * GIB as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commits_requested_gib() {
        let reservation = RamReservation::commit(1).unwrap();
        assert_eq!(reservation.gib(), 1);
        assert_eq!(reservation.bytes(), GIB as u64);
    }

    #[test]
    fn zero_gib_reservation_is_empty() {
        let reservation = RamReservation::commit(0).unwrap();
        assert_eq!(reservation.bytes(), 0);
    }
}
