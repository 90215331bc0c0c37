//! Property-based tests for ordering, backoff, scheduler invariants and the
//! transition table

mod admission;
mod scheduler_invariants;
