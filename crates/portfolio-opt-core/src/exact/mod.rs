//! Exact mixed-integer solver: branch-and-bound over clarabel QP/SOCP
//! relaxations with binary selection indicators and integer lot counts.

pub mod branch_bound;
pub mod relaxation;
pub mod solver;

pub use solver::optimize;
