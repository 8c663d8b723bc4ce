//! Crate-internal helper macros.

/// `into_par_iter()` with the `parallel` feature, `into_iter()` without it.
///
/// Call sites import `rayon::prelude::*` under the same feature gate.
macro_rules! maybe_par_into_iter {
    ($v:expr) => {{
        #[cfg(feature = "parallel")]
        {
            $v.into_par_iter()
        }
        #[cfg(not(feature = "parallel"))]
        {
            $v.into_iter()
        }
    }};
}
