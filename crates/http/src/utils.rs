//! Internal helper macros.

/// Early-returns `Err($error)` when `$predicate` does not hold.
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
