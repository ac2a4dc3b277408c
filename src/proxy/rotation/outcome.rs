use http::StatusCode;

use crate::error::ReelError;

/// How a request sent through a rotated proxy ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    /// The target answered, but the answer looks like a block page
    Ban,
    Timeout,
    ConnectionError,
}

impl RequestOutcome {
    /// Ban detection on a received response
    ///
    /// Anything other than 200/301/302 is a ban, and so is an empty 200.
    pub fn from_response(status: StatusCode, body_len: usize) -> Self {
        match status {
            StatusCode::OK if body_len == 0 => Self::Ban,
            StatusCode::OK | StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => Self::Success,
            _ => Self::Ban,
        }
    }

    /// Outcome of a request that produced no response
    pub fn from_error(err: &ReelError) -> Self {
        match err {
            ReelError::Timeout | ReelError::ExternalProcessTimeout { .. } => Self::Timeout,
            _ => Self::ConnectionError,
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Success)
    }
}
