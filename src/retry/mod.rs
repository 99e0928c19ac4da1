//! Operator-initiated, one-shot re-attempts of failed swap fills

mod engine;

pub use engine::{RetryEngine, RetrySubmission};
