//! Genetic search over bounded weight vectors, kept feasible by a repair
//! pipeline applied to every new individual.

pub mod genetic;
pub mod repair;

pub use genetic::optimize;
pub use repair::{RepairPipeline, RepairStep};
