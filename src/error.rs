//! Failure taxonomy shared by every verification component.
//!
//! The first four kinds abort the current test case. [`VerifyError::Unsupported`]
//! maps to a skipped verdict rather than a failure. Cleanup problems are not
//! errors at all: they surface as [`crate::ledger::ResourceLeakWarning`] values.

use std::time::Duration;

use thiserror::Error;

use crate::xml::XmlError;

/// Result alias used throughout the crate.
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Errors raised while building, dispatching or checking protocol requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// The request cannot represent the requested operation.
    #[error("malformed {operation} request: {reason}")]
    MalformedRequest {
        /// Operation being built.
        operation: String,
        /// Why the request was refused.
        reason: String,
    },
    /// Connection, timeout or other transport error. Never retried.
    #[error("transport failure for {operation} at {endpoint}: {reason}")]
    TransportFailure {
        /// Operation being dispatched.
        operation: String,
        /// Endpoint the request was sent to.
        endpoint: String,
        /// Underlying transport error.
        reason: String,
    },
    /// The response document root or shape did not match.
    #[error("structural validation failed: expected {expected}, found {actual}")]
    StructuralValidationFailure {
        /// Expected structure.
        expected: String,
        /// Observed structure.
        actual: String,
    },
    /// A content predicate did not hold.
    #[error("assertion on {what} failed: expected {expected}, found {actual}")]
    SemanticAssertionFailure {
        /// Quantity or relation under test.
        what: String,
        /// Expected value.
        expected: String,
        /// Observed value.
        actual: String,
    },
    /// An expected exception code or status was absent or different.
    #[error(
        "expected exception {expected_code} with status {expected_status}, found \
         {actual_code} with status {actual_status}"
    )]
    ProtocolExceptionMismatch {
        /// Expected exception code, or `none` when success was expected.
        expected_code: String,
        /// Expected HTTP status.
        expected_status: u16,
        /// Reported exception code, or `none`.
        actual_code: String,
        /// Reported HTTP status.
        actual_status: u16,
    },
    /// A paging cursor was dereferenced after the advertised cache timeout.
    #[error("paging cursor {token} expired: {elapsed:?} elapsed, cache timeout {timeout:?}")]
    ExpiredCursor {
        /// Continuation reference that expired.
        token: String,
        /// Time since the cursor was issued.
        elapsed: Duration,
        /// Advertised response cache timeout.
        timeout: Duration,
    },
    /// A precondition was not met; the test case is skipped.
    #[error("precondition not met: {0}")]
    Unsupported(String),
    /// The test case did not finish within its run budget.
    #[error("test case exceeded its run budget of {0:?}")]
    TimedOut(Duration),
}

impl VerifyError {
    /// Build a [`VerifyError::MalformedRequest`].
    pub fn malformed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`VerifyError::SemanticAssertionFailure`].
    pub fn assertion(
        what: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::SemanticAssertionFailure {
            what: what.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Build a [`VerifyError::StructuralValidationFailure`].
    pub fn structure(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::StructuralValidationFailure {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Build a [`VerifyError::Unsupported`].
    pub fn unsupported(what: impl Into<String>) -> Self { Self::Unsupported(what.into()) }

    /// Return `true` when the error means "skip" rather than "fail".
    #[must_use]
    pub const fn is_skip(&self) -> bool { matches!(self, Self::Unsupported(_)) }

    /// Short name of the taxonomy kind, used in reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } => "MalformedRequest",
            Self::TransportFailure { .. } => "TransportFailure",
            Self::StructuralValidationFailure { .. } => "StructuralValidationFailure",
            Self::SemanticAssertionFailure { .. } => "SemanticAssertionFailure",
            Self::ProtocolExceptionMismatch { .. } => "ProtocolExceptionMismatch",
            Self::ExpiredCursor { .. } => "ExpiredCursor",
            Self::Unsupported(_) => "Unsupported",
            Self::TimedOut(_) => "TimedOut",
        }
    }
}

impl From<XmlError> for VerifyError {
    fn from(err: XmlError) -> Self { Self::structure("well-formed XML", err.to_string()) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn mismatch_message_carries_expected_and_actual() {
        let err = VerifyError::ProtocolExceptionMismatch {
            expected_code: "LockHasExpired".into(),
            expected_status: 403,
            actual_code: "none".into(),
            actual_status: 200,
        };
        let text = err.to_string();
        assert!(text.contains("LockHasExpired"));
        assert!(text.contains("403"));
        assert!(text.contains("200"));
    }

    #[rstest]
    #[case(VerifyError::unsupported("no LockFeature"), true)]
    #[case(VerifyError::assertion("numberReturned", "1", "0"), false)]
    #[case(VerifyError::TimedOut(Duration::from_secs(1)), false)]
    fn only_unsupported_is_a_skip(#[case] err: VerifyError, #[case] skip: bool) {
        assert_eq!(err.is_skip(), skip);
    }
}
