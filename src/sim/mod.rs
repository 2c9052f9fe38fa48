//! Simulation driver
//!
//! The kernel applies the three flow rules to one block's plan; the
//! scheduler fans blocks out over the worker pool with a barrier between
//! steps; the queue merges external writes for the between-tick drain.

pub mod kernel;
pub mod queue;
pub mod scheduler;

pub use queue::{Edit, PendingEdits};

/// The three flow rules of one tick, executed in order with a barrier
/// between them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimStep {
    /// Push overflow volume to the cell above, pull overflow from below
    Up,
    /// Gravity
    Down,
    /// Lateral levelling between the four horizontal neighbours
    Sideways,
}

impl SimStep {
    pub const ALL: [SimStep; 3] = [SimStep::Up, SimStep::Down, SimStep::Sideways];
}
