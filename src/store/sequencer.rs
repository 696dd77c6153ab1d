//! # Per-Volume Operation Sequencer
//!
//! Each mount carries a ticket pair: `op_assigned`, bumped when an
//! operation is admitted (under the registry lock, while the cache lock
//! is still held, so cache state and ticket order stay coordinated), and
//! `last_executed`, advanced under the volume mutex when the operation's
//! effects have been applied.
//!
//! `execute_in_sequence` blocks until its ticket is the immediate
//! successor of `last_executed`, runs the operation, then advances and
//! wakes all waiters. The advance happens on success, on error, and on
//! abort alike — a ticket that never executes would deadlock every
//! ticket behind it. This gives each volume a total order of effects
//! matching ticket assignment order, independent of thread scheduling.
//!
//! The `abort` flag is honored (waiters bail out early, still advancing
//! their tickets) but nothing in the crate currently sets it.

use std::sync::atomic::Ordering;

use eyre::{bail, Result};

use super::mount::MountPoint;
use crate::volume::Volume;

impl MountPoint {
    /// Draws the next ticket. Caller must hold the registry lock.
    pub(crate) fn acquire_op_seq(&self) -> u32 {
        self.op_assigned.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Runs `op` when `seq` becomes the next ticket in line, then
    /// advances the executed counter no matter how `op` fared.
    pub(crate) fn execute_in_sequence<R>(
        &self,
        seq: u32,
        op: impl FnOnce(&mut Volume) -> Result<R>,
    ) -> Result<R> {
        let mut gate = self.gate.lock();
        while seq.wrapping_sub(gate.last_executed) != 1 && !gate.abort {
            self.gate_cond.wait(&mut gate);
        }
        if gate.abort {
            gate.last_executed = seq;
            self.gate_cond.notify_all();
            bail!("operation {seq} aborted on volume {}", self.id);
        }
        let result = op(&mut gate.volume);
        gate.last_executed = seq;
        self.gate_cond.notify_all();
        result
    }

    /// Blocks until every assigned ticket has executed. Caller holds the
    /// gate lock; the wait releases it while parked.
    pub(crate) fn wait_pending_ops(
        &self,
        gate: &mut parking_lot::MutexGuard<'_, super::mount::VolumeGate>,
    ) {
        while self.op_assigned.load(Ordering::Acquire) != gate.last_executed && !gate.abort {
            self.gate_cond.wait(gate);
        }
    }
}
