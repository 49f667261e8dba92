//! Utility macros.

/// Defines a new identifier type with the given name that wraps a `u64`.
///
/// The type gets a `from_u64` constructor, a `as_u64` accessor and a
/// [`Display`](std::fmt::Display) implementation printing the raw value.
#[macro_export]
macro_rules! define_id_newtype {
    (
        $(#[$attributes:meta])*
        [$pub:vis] $name:ident
    ) => {
        $(#[$attributes])*
        #[repr(transparent)]
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
            ::bytemuck::Zeroable, ::bytemuck::Pod,
        )]
        $pub struct $name(u64);

        impl $name {
            /// Wraps the given raw value.
            pub const fn from_u64(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            pub const fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Evaluates the given expression and logs how long it took at the debug
/// level. The message may contain format arguments.
#[macro_export]
macro_rules! with_timing_debug_logging {
    ($message:expr $(,$arg:expr)*; $expression:expr) => {{
        let _start_time = ::std::time::Instant::now();
        let _result = $expression;
        let _duration = _start_time.elapsed();
        $crate::log::debug!(
            concat!($message, " took {:.3} ms")$(,$arg)*,
            _duration.as_secs_f64() * 1e3,
        );
        _result
    }};
}

/// Evaluates the given expression, logging at the trace level when it begins
/// and when it is done.
#[macro_export]
macro_rules! with_trace_logging {
    ($message:expr $(,$arg:expr)*; $expression:expr) => {{
        $crate::log::trace!(concat!("Begin: ", $message)$(,$arg)*);
        let _result = $expression;
        $crate::log::trace!(concat!("Done: ", $message)$(,$arg)*);
        _result
    }};
}
