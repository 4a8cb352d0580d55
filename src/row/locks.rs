//! Owner-tracked non-blocking read/write locks.
//!
//! Row and column locks are try-locks: acquisition either succeeds
//! immediately or reports failure, and the caller (the transaction) decides
//! to abort. Every acquisition and release names the owning transaction, so
//! a transaction can safely reacquire a lock it already holds and release is
//! idempotent.
//!
//! ## State machine
//!
//! ```text
//!            try_rlock(a)              try_wlock(a)
//! ┌──────┐ ─────────────► ┌─────────┐ ───────────► ┌──────────┐
//! │ Free │                │ Read{a} │  (sole       │ Write(a) │
//! └──────┘ ◄───────────── └─────────┘   reader     └──────────┘
//!            unlock(a)         │        upgrade)        │
//!                              │ try_rlock(b)           │ try_wlock(b)
//!                              ▼                        ▼
//!                         Read{a, b}                  fails
//! ```
//!
//! A writer implicitly holds read access; readers other than a sole self
//! block (fail) an upgrade.

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::config::READ_OWNERS_INLINE;
use crate::types::TxnId;

#[derive(Debug, Default)]
enum LockState {
    #[default]
    Free,
    Read(SmallVec<[TxnId; READ_OWNERS_INLINE]>),
    Write(TxnId),
}

#[derive(Debug, Default)]
pub struct OwnerLock {
    state: Mutex<LockState>,
}

impl OwnerLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires shared access for `owner`. Never blocks.
    pub fn try_rlock(&self, owner: TxnId) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            LockState::Free => {
                *state = LockState::Read(SmallVec::from_slice(&[owner]));
                true
            }
            LockState::Read(owners) => {
                if !owners.contains(&owner) {
                    owners.push(owner);
                }
                true
            }
            LockState::Write(w) => *w == owner,
        }
    }

    /// Acquires exclusive access for `owner`. A sole reader may upgrade.
    /// Never blocks.
    pub fn try_wlock(&self, owner: TxnId) -> bool {
        let mut state = self.state.lock();
        match &*state {
            LockState::Free => {
                *state = LockState::Write(owner);
                true
            }
            LockState::Read(owners) => {
                if owners.as_slice() == [owner] {
                    *state = LockState::Write(owner);
                    true
                } else {
                    false
                }
            }
            LockState::Write(w) => *w == owner,
        }
    }

    /// Releases whatever access `owner` holds. Releasing a lock that is not
    /// held is a no-op, so redundant lock records unwind safely.
    pub fn unlock(&self, owner: TxnId) {
        let mut state = self.state.lock();
        match &mut *state {
            LockState::Free => {}
            LockState::Read(owners) => {
                owners.retain(|o| *o != owner);
                if owners.is_empty() {
                    *state = LockState::Free;
                }
            }
            LockState::Write(w) => {
                if *w == owner {
                    *state = LockState::Free;
                }
            }
        }
    }

    #[cfg(test)]
    fn is_free(&self) -> bool {
        matches!(&*self.state.lock(), LockState::Free)
    }
}
