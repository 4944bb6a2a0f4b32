use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfferId(pub i64);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Sent,
    Accepted,
    Rejected,
    /// Replaced by a newer offer before the lead owner answered it.
    Withdrawn,
}

impl OfferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn can_transition_to(self, next: OfferStatus) -> bool {
        matches!(
            (self, next),
            (OfferStatus::Sent, OfferStatus::Accepted)
                | (OfferStatus::Sent, OfferStatus::Rejected)
                | (OfferStatus::Sent, OfferStatus::Withdrawn)
        )
    }
}

impl FromStr for OfferStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sent" => Ok(Self::Sent),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(format!("unknown offer status `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub lead_id: LeadId,
    pub amount: Decimal,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
}

impl Offer {
    pub fn transition_to(&mut self, next: OfferStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidOfferTransition { from: self.status, to: next })
    }
}

/// Whole amounts print without decimals, others with at most two.
pub fn format_amount(amount: Decimal) -> String {
    amount.round_dp(2).normalize().to_string()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{format_amount, Offer, OfferId, OfferStatus};
    use crate::domain::lead::LeadId;
    use crate::errors::DomainError;

    fn offer(status: OfferStatus) -> Offer {
        Offer {
            id: OfferId(3),
            lead_id: LeadId(7),
            amount: Decimal::new(800, 0),
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sent_offer_can_be_accepted_or_rejected() {
        let mut accepted = offer(OfferStatus::Sent);
        accepted.transition_to(OfferStatus::Accepted).expect("sent -> accepted");

        let mut rejected = offer(OfferStatus::Sent);
        rejected.transition_to(OfferStatus::Rejected).expect("sent -> rejected");

        assert_eq!(accepted.status, OfferStatus::Accepted);
        assert_eq!(rejected.status, OfferStatus::Rejected);
    }

    #[test]
    fn resolved_offers_are_terminal() {
        let mut offer = offer(OfferStatus::Rejected);
        let error = offer.transition_to(OfferStatus::Accepted).expect_err("rejected is terminal");

        assert_eq!(
            error,
            DomainError::InvalidOfferTransition {
                from: OfferStatus::Rejected,
                to: OfferStatus::Accepted
            }
        );
    }

    #[test]
    fn withdrawn_offers_cannot_be_answered() {
        let mut offer = offer(OfferStatus::Sent);
        offer.transition_to(OfferStatus::Withdrawn).expect("sent -> withdrawn");

        assert!(offer.transition_to(OfferStatus::Accepted).is_err());
        assert!(offer.transition_to(OfferStatus::Rejected).is_err());
        assert_eq!("withdrawn".parse::<OfferStatus>(), Ok(OfferStatus::Withdrawn));
    }

    #[test]
    fn amounts_are_formatted_without_trailing_zeros() {
        assert_eq!(format_amount(Decimal::new(80000, 2)), "800");
        assert_eq!(format_amount(Decimal::new(65050, 2)), "650.5");
        assert_eq!(format_amount(Decimal::new(12345, 3)), "12.35");
    }
}
