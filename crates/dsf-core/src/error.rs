use std::time::Duration;

use thiserror::Error;

use crate::{SessionId, Status, StatusCode};

pub type DsfResult<T> = Result<T, DsfError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DsfError {
    #[error("executor has been shut down")]
    Rejected,
    #[error("request monitor was completed more than once")]
    DoubleCompletion,
    #[error("operation invoked from the wrong thread")]
    WrongThread,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("wait was interrupted")]
    Interrupted,
    /// No registered service offers the requested capability. Callers treat
    /// this as "feature unavailable".
    #[error("no service registered for {0}")]
    ServiceNotFound(&'static str),
    #[error("target is not available")]
    TargetBusy,
    #[error("unknown session {0}")]
    SessionNotFound(SessionId),
    #[error("{0} has ended")]
    SessionEnded(SessionId),
    #[error("executor is already bound to {0}")]
    ExecutorInUse(SessionId),
    #[error("request failed: {0}")]
    Failed(Status),
    #[error("request cancelled: {0}")]
    Cancelled(Status),
}

impl DsfError {
    pub fn to_status(&self) -> Status {
        match self {
            DsfError::Failed(status) | DsfError::Cancelled(status) => status.clone(),
            other => Status::error(other.status_code(), other.to_string()),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            DsfError::Rejected => StatusCode::Rejected,
            DsfError::DoubleCompletion => StatusCode::DoubleCompletion,
            DsfError::WrongThread => StatusCode::WrongThread,
            DsfError::Timeout(_) => StatusCode::Timeout,
            DsfError::Interrupted => StatusCode::Interrupted,
            DsfError::ServiceNotFound(_) | DsfError::SessionNotFound(_) => StatusCode::NotFound,
            DsfError::TargetBusy => StatusCode::TargetBusy,
            DsfError::SessionEnded(_) | DsfError::ExecutorInUse(_) => StatusCode::InvalidState,
            DsfError::Failed(status) | DsfError::Cancelled(status) => status.code(),
        }
    }
}

impl From<DsfError> for Status {
    fn from(err: DsfError) -> Self {
        err.to_status()
    }
}

impl Status {
    /// `Ok(())` for `OK`/`INFO`, otherwise the matching [`DsfError`].
    pub fn into_result(self) -> DsfResult<()> {
        if self.is_success() {
            Ok(())
        } else if self.is_cancel() {
            Err(DsfError::Cancelled(self))
        } else {
            Err(DsfError::Failed(self))
        }
    }
}
