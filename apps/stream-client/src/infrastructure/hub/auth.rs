//! Token Renewal
//!
//! An open hub session is re-authenticated with the `RenewToken` invocation
//! instead of reconnecting. The server answers with a status code:
//!
//! - 0: renewed
//! - 1: token rejected
//! - 2: the server no longer knows the session
//!
//! [`RenewAction::decide`] turns the status into what the transport does
//! next.

use crate::domain::connection::AccessToken;

/// Status returned by `RenewToken`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewStatus {
    /// Token accepted.
    Success,
    /// Token rejected.
    InvalidToken,
    /// Session unknown to the server.
    SessionNotFound,
    /// Anything else.
    Unknown(i64),
}

impl From<i64> for RenewStatus {
    fn from(code: i64) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::InvalidToken,
            2 => Self::SessionNotFound,
            other => Self::Unknown(other),
        }
    }
}

impl RenewStatus {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidToken => "invalid_token",
            Self::SessionNotFound => "session_not_found",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// What the transport does after a renewal answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewAction {
    /// Keep streaming.
    Continue,
    /// Tell the caller its token was rejected.
    NotifyUnauthorized,
    /// Stop cleanly so the caller starts a new session.
    Restart,
    /// Stop and report transport failure.
    Fail(i64),
}

impl RenewAction {
    /// Decide the follow-up for `status`, given the token that was renewed
    /// and the token that is current now.
    ///
    /// A rejection for a token that has since been replaced is ignored; the
    /// replacement triggers its own renewal.
    #[must_use]
    pub fn decide(
        status: RenewStatus,
        renewed: &AccessToken,
        current: Option<&AccessToken>,
    ) -> Self {
        match status {
            RenewStatus::Success => Self::Continue,
            RenewStatus::InvalidToken if current == Some(renewed) => Self::NotifyUnauthorized,
            RenewStatus::InvalidToken => Self::Continue,
            RenewStatus::SessionNotFound => Self::Restart,
            RenewStatus::Unknown(code) => Self::Fail(code),
        }
    }
}
