//! Batch sync control
//!
//! Services in a batch sync strictly in order. The first non-ok health
//! report pauses the batch until an operator resumes or cancels it; later
//! alerts in the same batch are recorded but never pause again.

mod controller;
mod session;

#[cfg(test)]
mod tests;

pub use controller::{
    BatchController, BatchEntry, BatchHandle, BatchOptions, BatchReport, FailingService,
};
pub use session::{BatchRegistry, BatchSession, BatchState, BatchStatus, PauseOutcome};
