//! Pure, deterministic reconciliation logic.
//!
//! Nothing in this module performs I/O or reads ambient state. Every
//! function is total over its inputs so callers never have to handle a
//! classification fault: malformed or missing inputs degrade to the most
//! conservative "do not dispatch" outcome instead of erroring.

pub mod capacity;
pub mod classifier;
pub mod reason;
pub mod summary;
pub mod types;
