//! Utility macros used across the batch engine.

/// Returns early with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// Reader and writer state checks, limit checks and framing checks all go through it.
///
/// # Example
///
/// ```ignore
/// ensure!(parts <= max_parts, BatchError::too_many_parts(max_parts));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
