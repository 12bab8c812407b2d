//! Error types of the VM and the numbered runtime error catalogue.

use std::fmt;

use object::Atom;

/// Failure of a VM operation.
///
/// Only [`VmError::Script`] is visible to exception handlers. Everything
/// else unwinds the whole call chain back to whoever entered the VM.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// The unit failed verification; nothing from it was installed.
    #[error("VerifyError: Error #{code}: {message}")]
    Verify { code: u32, message: String },
    /// A thrown script value.
    #[error("uncaught script value {0:?}")]
    Script(Atom),
    /// Recursion limit or instruction budget exhausted.
    #[error("Error #{code}: {message}")]
    ResourceExhausted { code: u32, message: String },
    /// The cancellation flag was raised while the script was running.
    #[error("script execution was cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl VmError {
    pub fn verify(code: u32, args: &[&str]) -> Self {
        VmError::Verify {
            code,
            message: error_message(code, args),
        }
    }

    pub(crate) fn exhausted(code: u32) -> Self {
        VmError::ResourceExhausted {
            code,
            message: error_message(code, &[]),
        }
    }

    /// Whether `catch` blocks in script code may intercept this error.
    #[inline]
    pub fn is_catchable(&self) -> bool {
        matches!(self, VmError::Script(_))
    }
}

/// The native error classes. Each one is a builtin subclass of `Error`
/// (except `Error` itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
    ArgumentError,
    VerifyError,
    EvalError,
    SyntaxError,
    UriError,
    SecurityError,
    ScriptTimeoutError,
}

impl ErrorKind {
    pub const ALL: &'static [ErrorKind] = &[
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::ReferenceError,
        ErrorKind::RangeError,
        ErrorKind::ArgumentError,
        ErrorKind::VerifyError,
        ErrorKind::EvalError,
        ErrorKind::SyntaxError,
        ErrorKind::UriError,
        ErrorKind::SecurityError,
        ErrorKind::ScriptTimeoutError,
    ];

    pub fn class_name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::VerifyError => "VerifyError",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::UriError => "URIError",
            ErrorKind::SecurityError => "SecurityError",
            ErrorKind::ScriptTimeoutError => "ScriptTimeoutError",
        }
    }
}

/// Message template of a numbered error. `%1`, `%2`, ... are replaced by
/// the corresponding entries of `args`.
fn template(code: u32) -> &'static str {
    match code {
        1001 => "The method %1 is not implemented.",
        1002 => "Number.toFixed precision is outside the range 0 to 20.",
        1003 => "The radix argument must be between 2 and 36; got %1.",
        1005 => "Array index is not a positive integer (%1).",
        1006 => "%1 is not a function.",
        1007 => "Instantiation attempted on a non-constructor.",
        1009 => "Cannot access a property or method of a null object reference.",
        1010 => "A term is undefined and has no properties.",
        1014 => "Class %1 could not be found.",
        1020 => "Code cannot fall off the end of a method.",
        1021 => "At least one branch target was not on a valid instruction in the method.",
        1023 => "Stack overflow occurred.",
        1024 => "Stack underflow occurred.",
        1025 => "An invalid register %1 was accessed.",
        1032 => "Cpool index %1 is out of range %2.",
        1033 => "Cpool entry %1 is wrong type.",
        1034 => "Type Coercion failed: cannot convert %1 to %2.",
        1037 => "Cannot assign to a method %1 on %2.",
        1040 => "The right-hand side of instanceof must be a class or function.",
        1041 => "The right-hand side of operator must be a class.",
        1050 => "Cannot convert %1 to primitive.",
        1056 => "Cannot create property %1 on %2.",
        1063 => "Argument count mismatch on %1. Expected %2, got %3.",
        1065 => "Variable %1 is not defined.",
        1069 => "Property %1 not found on %2 and there is no default value.",
        1074 => "Illegal write to read-only property %1 on %2.",
        1103 => "Class %1 cannot extend final base class.",
        1107 => "The ABC data is corrupt, attempt to read out of bounds: %1.",
        1112 => "Argument count mismatch on class coercion. Expected 1, got %1.",
        1125 => "The index %1 is out of range %2.",
        1502 => "A script has executed for longer than the allowed instruction budget.",
        _ => "Unknown error.",
    }
}

/// The formatted text of error `code`.
pub fn error_message(code: u32, args: &[&str]) -> String {
    let mut text = template(code).to_owned();
    for (i, arg) in args.iter().enumerate().rev() {
        text = text.replace(&format!("%{}", i + 1), arg);
    }
    text
}

/// Host-visible description of an error that escaped the outermost
/// activation of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtError {
    pub class_name: String,
    pub error_id: Option<u32>,
    pub message: String,
}

impl fmt::Display for UncaughtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.class_name)
        } else {
            write!(f, "{}: {}", self.class_name, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        assert_eq!(
            error_message(1063, &["add()", "1", "2"]),
            "Argument count mismatch on add(). Expected 1, got 2."
        );
        assert_eq!(error_message(1023, &[]), "Stack overflow occurred.");
    }

    #[test]
    fn only_script_errors_are_catchable() {
        assert!(VmError::Script(Atom::Int(1)).is_catchable());
        assert!(!VmError::exhausted(1023).is_catchable());
        assert!(!VmError::Cancelled.is_catchable());
        assert!(!VmError::verify(1021, &[]).is_catchable());
    }

    #[test]
    fn verify_errors_render_with_code() {
        let err = VmError::verify(1032, &["9", "3"]);
        assert_eq!(
            err.to_string(),
            "VerifyError: Error #1032: Cpool index 9 is out of range 3."
        );
    }
}
