//! Logging shims.
//!
//! Events go to `tracing` when the `tracing` feature is on and compile away
//! otherwise. Arguments are still type-checked in both configurations.

macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        {
            ::tracing::trace!($($arg)*);
        }
        #[cfg(not(feature = "tracing"))]
        {
            if false {
                let _ = format_args!($($arg)*);
            }
        }
    }};
}

macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        {
            ::tracing::debug!($($arg)*);
        }
        #[cfg(not(feature = "tracing"))]
        {
            if false {
                let _ = format_args!($($arg)*);
            }
        }
    }};
}

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        {
            ::tracing::warn!($($arg)*);
        }
        #[cfg(not(feature = "tracing"))]
        {
            if false {
                let _ = format_args!($($arg)*);
            }
        }
    }};
}

macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        {
            ::tracing::error!($($arg)*);
        }
        #[cfg(not(feature = "tracing"))]
        {
            if false {
                let _ = format_args!($($arg)*);
            }
        }
    }};
}

/// Aborts on a broken runtime invariant.
///
/// Panics rather than calling `process::abort` directly; the release profile
/// sets `panic = "abort"`.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log_error!($($arg)*);
        panic!($($arg)*)
    }};
}
