use std::fmt;

/// How a completed request should be interpreted.
///
/// The ordering matters: anything at or above [`Severity::Cancel`] is a
/// non-successful outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    /// Informational; the request still succeeded.
    Info,
    /// Cooperative cancellation. Distinct from both success and failure.
    Cancel,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    /// A context was stale or did not belong to the receiving service.
    InvalidHandle,
    /// The requested capability is not provided by this session.
    NotSupported,
    /// The debugger backend rejected the command.
    RequestFailed,
    Timeout,
    /// The target is running; cached reads are not serviceable.
    TargetBusy,
    InvalidState,
    Cancelled,
    Interrupted,
    Rejected,
    NotFound,
    DoubleCompletion,
    WrongThread,
    InternalError,
}

impl StatusCode {
    /// Codes that describe a transient condition of the target rather than
    /// the answer to a request.
    pub fn is_transient(self) -> bool {
        matches!(self, StatusCode::TargetBusy | StatusCode::Timeout)
    }

    /// Codes that indicate a bug in the caller rather than a runtime failure.
    pub fn is_programming_error(self) -> bool {
        matches!(self, StatusCode::DoubleCompletion | StatusCode::WrongThread)
    }
}

/// Outcome of an asynchronous request: severity, code and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    severity: Severity,
    code: StatusCode,
    message: String,
}

impl Status {
    pub const fn ok() -> Self {
        Self {
            severity: Severity::Ok,
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code: StatusCode::Ok,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::cancelled_with("request cancelled")
    }

    pub fn cancelled_with(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Cancel,
            code: StatusCode::Cancelled,
            message: message.into(),
        }
    }

    pub fn error(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// `OK` or `INFO`.
    pub fn is_success(&self) -> bool {
        self.severity <= Severity::Info
    }

    pub fn is_cancel(&self) -> bool {
        self.severity == Severity::Cancel
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Ok if self.message.is_empty() => f.write_str("OK"),
            Severity::Ok => write!(f, "OK: {}", self.message),
            Severity::Info => write!(f, "INFO: {}", self.message),
            Severity::Cancel => write!(f, "CANCEL: {}", self.message),
            Severity::Error => write!(f, "ERROR({:?}): {}", self.code, self.message),
        }
    }
}
