//! Unified error interface for kernbus.
//!
//! Every error enum in the workspace implements [`ErrorCode`] so callers can
//! branch on stable machine-readable codes and decide whether a retry makes
//! sense, without matching on concrete error types from other crates.
//!
//! # Example
//!
//! ```
//! use kernbus_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum StoreError {
//!     Missing,
//!     Busy,
//! }
//!
//! impl ErrorCode for StoreError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::Missing => "STORE_MISSING",
//!             Self::Busy => "STORE_BUSY",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Busy)
//!     }
//! }
//!
//! assert_eq!(StoreError::Busy.code(), "STORE_BUSY");
//! assert!(StoreError::Busy.is_recoverable());
//! ```

/// Machine-readable error classification.
///
/// # Code Format
///
/// - UPPER_SNAKE_CASE
/// - Prefixed with the owning module (`QUEUE_`, `KERNEL_`, `REQUEST_`, ...)
/// - Stable once published
///
/// # Recoverability
///
/// Recoverable means the same operation may succeed later without any code
/// or configuration change: backpressure rejections and request timeouts
/// are recoverable, a tripped circuit breaker is not.
pub trait ErrorCode {
    /// Returns the stable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that an error code is non-empty, prefixed and UPPER_SNAKE_CASE.
///
/// # Panics
///
/// Panics with a descriptive message if any check fails.
///
/// # Example
///
/// ```
/// use kernbus_types::{assert_error_code, ErrorCode};
///
/// struct Full;
/// impl ErrorCode for Full {
///     fn code(&self) -> &'static str { "QUEUE_FULL" }
///     fn is_recoverable(&self) -> bool { true }
/// }
///
/// assert_error_code(&Full, "QUEUE_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Runs [`assert_error_code`] over every given variant.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum ProbeError {
        Transient,
        Permanent,
    }

    impl ErrorCode for ProbeError {
        fn code(&self) -> &'static str {
            match self {
                Self::Transient => "PROBE_TRANSIENT",
                Self::Permanent => "PROBE_PERMANENT",
            }
        }

        fn is_recoverable(&self) -> bool {
            matches!(self, Self::Transient)
        }
    }

    #[test]
    fn codes_and_recoverability() {
        assert_eq!(ProbeError::Transient.code(), "PROBE_TRANSIENT");
        assert!(ProbeError::Transient.is_recoverable());
        assert!(!ProbeError::Permanent.is_recoverable());
    }

    #[test]
    fn all_variants_conform() {
        assert_error_codes(&[ProbeError::Transient, ProbeError::Permanent], "PROBE_");
    }

    #[test]
    #[should_panic(expected = "must start with prefix")]
    fn wrong_prefix_panics() {
        assert_error_code(&ProbeError::Transient, "QUEUE_");
    }

    #[test]
    fn snake_case_detection() {
        assert!(is_upper_snake_case("QUEUE_FULL"));
        assert!(is_upper_snake_case("E_2"));
        assert!(!is_upper_snake_case("queue_full"));
        assert!(!is_upper_snake_case("_QUEUE"));
        assert!(!is_upper_snake_case("QUEUE_"));
        assert!(!is_upper_snake_case("QUEUE__FULL"));
        assert!(!is_upper_snake_case(""));
    }
}
