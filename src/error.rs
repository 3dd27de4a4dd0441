//! Error taxonomy shared by every table variant.
//!
//! Per the crate's error handling design: an absent key, capacity pressure, and contention are
//! not errors at all (they are encoded directly in the return value of the dictionary operation,
//! or resolved internally by retry/migration). `Status` exists only for the handful of
//! conditions a caller can reasonably react to — today, exhausting the SMR thread registry.
//! Every other invariant violation (a full store during probing, retiring a still-reachable
//! object, a size request that overflows a power of two) is a programmer or system fault and
//! aborts via `panic!`/`assert!` rather than returning `Status`.
use std::error;
use std::fmt;

/// Status returned by the handful of fallible, non-fatal operations in the crate.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Status {
    /// Operation completed normally.
    Success,
    /// The calling thread already holds a reservation and attempted to acquire another one
    /// without releasing the first.
    Busy,
    /// More threads attempted to register than `Config::max_threads` allows.
    ThreadNumOverflow,
    /// A caller-supplied argument was invalid (e.g. a null/zero-sized allocation request).
    InvalidParam,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Status::Success => "success",
            Status::Busy => "thread already holds a reservation",
            Status::ThreadNumOverflow => "thread registry exhausted",
            Status::InvalidParam => "invalid parameter",
        };
        write!(f, "{}", msg)
    }
}

impl error::Error for Status {}
