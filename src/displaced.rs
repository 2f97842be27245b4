//! Displaced stepping operations.
//!
//! A displaced step executes a copy of the instruction hidden under a breakpoint marker
//! from an instruction buffer (or simulates it), so that the marker can stay in place
//! for every other wave. Operations are shared by all waves of a queue stopped at the same pc,
//! and are reference counted by the [`DisplacedSteppingRegistry`].

use std::collections::BTreeMap;

use crate::arch::Instruction;
use crate::ids::{DisplacedSteppingId, QueueId};
use crate::process::InstructionBuffer;

/// How a displaced step ended.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum StepOutcome {
    /// The instruction was simulated. Nothing ran on hardware.
    Simulated,
    /// The relocated instruction ran and the pc was moved back.
    Completed,
    /// The wave never left the instruction buffer, so the instruction did not run.
    Aborted,
}

/// A displaced step shared by every wave of a queue stopped at `from`.
#[derive(Debug)]
pub struct DisplacedStepping {
    id: DisplacedSteppingId,
    queue: QueueId,
    from: u64,
    original_instruction: Instruction,
    simulated: bool,
    buffer: Option<InstructionBuffer>,
    ref_count: usize
}

impl DisplacedStepping {
    /// The operation's id.
    pub fn id(&self) -> DisplacedSteppingId {
        self.id
    }
    /// The queue of the waves using this operation.
    pub fn queue(&self) -> QueueId {
        self.queue
    }
    /// The pc of the displaced instruction.
    pub fn from(&self) -> u64 {
        self.from
    }
    /// Where the instruction was relocated to, or 0 if it is simulated.
    pub fn to(&self) -> u64 {
        self.buffer.as_ref().map_or(0, InstructionBuffer::begin)
    }
    /// The instruction found under the breakpoint marker.
    pub fn original_instruction(&self) -> &Instruction {
        &self.original_instruction
    }
    /// Whether the instruction is simulated rather than relocated.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }
    /// Number of waves using this operation.
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }
}

/// The displaced steps of a process.
#[derive(Debug, Default)]
pub struct DisplacedSteppingRegistry {
    ops: BTreeMap<DisplacedSteppingId, DisplacedStepping>
}

impl DisplacedSteppingRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Finds the operation of a queue for the given pc.
    pub fn find(&self, queue: QueueId, from: u64) -> Option<DisplacedSteppingId> {
        self.ops.values()
            .find(|op| op.queue == queue && op.from == from)
            .map(|op| op.id)
    }

    /// Gets an operation by id.
    pub fn get(&self, id: DisplacedSteppingId) -> Option<&DisplacedStepping> {
        self.ops.get(&id)
    }

    /// Registers a new operation, with a reference count of 1.
    pub fn create(
        &mut self,
        id: DisplacedSteppingId,
        queue: QueueId,
        from: u64,
        original_instruction: Instruction,
        simulated: bool,
        buffer: Option<InstructionBuffer>
    ) -> &DisplacedStepping {
        debug_assert!(simulated == buffer.is_none(), "a relocated instruction needs a buffer");

        self.ops.entry(id).or_insert(DisplacedStepping {
            id, queue, from, original_instruction, simulated, buffer, ref_count: 1
        })
    }

    /// Adds a reference to an operation.
    ///
    /// # Panics
    /// Panics if the operation does not exist.
    pub fn retain(&mut self, id: DisplacedSteppingId) {
        let op = self.ops.get_mut(&id)
            .unwrap_or_else(|| panic!("retaining unknown {id}"));
        op.ref_count += 1;
    }

    /// Drops a reference to an operation, destroying it when no reference is left.
    ///
    /// This returns the operation's instruction buffer when it is destroyed,
    /// which the caller hands back to its owner.
    ///
    /// # Panics
    /// Panics if the operation does not exist.
    pub fn release(&mut self, id: DisplacedSteppingId) -> Option<InstructionBuffer> {
        let op = self.ops.get_mut(&id)
            .unwrap_or_else(|| panic!("releasing unknown {id}"));
        assert!(op.ref_count > 0, "{id} reference count underflow");

        op.ref_count -= 1;
        if op.ref_count > 0 { return None };

        self.ops.remove(&id).and_then(|op| op.buffer)
    }

    /// Number of live operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }
    /// Whether no operation is live.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
