use thiserror::Error;

use crate::domain::lead::LeadStatus;
use crate::domain::offer::OfferStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid lead transition from {from:?} to {to:?}")]
    InvalidLeadTransition { from: LeadStatus, to: LeadStatus },
    #[error("invalid offer transition from {from:?} to {to:?}")]
    InvalidOfferTransition { from: OfferStatus, to: OfferStatus },
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("validation failure: {0}")]
    Validation(String),
    #[error("user {responder} may not act on a lead owned by {owner}")]
    Authorization { responder: i64, owner: i64 },
    #[error("delivery failure: {0}")]
    Delivery(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// How the dispatcher answers a failed event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Ask for the same input again; the stage does not move.
    Reprompt,
    /// Tell the sender the action is not theirs to take.
    Refuse,
    /// Tell the initiating party the other side could not be reached.
    SoftFailure,
    /// Ask the sender to resubmit; session state is left untouched.
    Retry,
    /// Drop the session and start over from language selection.
    Restart,
}

impl ApplicationError {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Validation(_) => Recovery::Reprompt,
            Self::Authorization { .. } => Recovery::Refuse,
            Self::Delivery(_) => Recovery::SoftFailure,
            Self::Persistence(_) => Recovery::Retry,
            Self::Domain(DomainError::IntegrityViolation(_)) => Recovery::Restart,
            Self::Domain(
                DomainError::InvalidLeadTransition { .. } | DomainError::InvalidOfferTransition { .. },
            ) => Recovery::Refuse,
        }
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Domain(DomainError::IntegrityViolation(_)))
    }
}
