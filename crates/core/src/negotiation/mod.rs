//! The pure half of the operator negotiation: the pending-action slot, price
//! parsing and responder authorization. Persistence and delivery live with the
//! dispatcher.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::conversation::Stage;
use crate::domain::lead::{Lead, LeadId, LeadStatus, UserId};
use crate::domain::offer::{OfferId, OfferStatus};
use crate::errors::ApplicationError;

/// What the next free-text message of one party is reserved for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingAction {
    #[default]
    None,
    /// The operator is about to type a price for this lead.
    PriceEntry { lead_id: LeadId },
    /// The lead owner is about to type a counter amount for this offer.
    CounterOffer { offer_id: OfferId, lead_id: LeadId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotUpdate {
    Installed,
    Replaced(PendingAction),
    /// The slot kept its current action, returned here.
    Refused(PendingAction),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextClaim {
    /// The text is not for the slot; route it to the conversation engine.
    Pass,
    Claimed { action: PendingAction, amount: Decimal },
    /// The slot wanted the text but found no amount in it. The slot stays open.
    Unparsable(PendingAction),
}

impl PendingAction {
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn lead_id(&self) -> Option<LeadId> {
        match self {
            Self::None => None,
            Self::PriceEntry { lead_id } | Self::CounterOffer { lead_id, .. } => Some(*lead_id),
        }
    }

    /// Opens `next` in the slot. Price entry belongs to the operator role and is
    /// never displaced by a counter-offer; any other combination replaces.
    pub fn install(&mut self, next: PendingAction) -> SlotUpdate {
        let current = *self;
        match (current, next) {
            (_, Self::None) => {
                *self = Self::None;
                if current.is_open() {
                    SlotUpdate::Replaced(current)
                } else {
                    SlotUpdate::Installed
                }
            }
            (Self::None, _) => {
                *self = next;
                SlotUpdate::Installed
            }
            (Self::PriceEntry { .. }, Self::CounterOffer { .. }) => SlotUpdate::Refused(current),
            _ => {
                *self = next;
                SlotUpdate::Replaced(current)
            }
        }
    }

    pub fn take(&mut self) -> PendingAction {
        std::mem::take(self)
    }

    /// Decides whether `text` belongs to the open slot. A stage that is still
    /// collecting intake fields always keeps its text.
    pub fn take_for_text(&mut self, stage: &Stage, text: &str) -> TextClaim {
        if !self.is_open() || stage.is_collecting() {
            return TextClaim::Pass;
        }

        match parse_price(text) {
            Some(amount) => TextClaim::Claimed { action: self.take(), amount },
            None => TextClaim::Unparsable(*self),
        }
    }
}

/// Extracts the first `digits[.,digits]` token. Currency signs and words around
/// it are ignored; zero is not a price.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|ch| ch.is_ascii_digit())?;

    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    let mut token: String = chars[start..end].iter().collect();

    let has_fraction = end + 1 < chars.len()
        && matches!(chars[end], '.' | ',')
        && chars[end + 1].is_ascii_digit();
    if has_fraction {
        let fraction_start = end + 1;
        let mut fraction_end = fraction_start;
        while fraction_end < chars.len() && chars[fraction_end].is_ascii_digit() {
            fraction_end += 1;
        }
        token.push('.');
        token.extend(&chars[fraction_start..fraction_end]);
    }

    let amount = token.parse::<Decimal>().ok()?;
    (amount > Decimal::ZERO).then_some(amount)
}

/// Only the user who submitted the lead may answer its offers.
pub fn authorize_responder(lead: &Lead, responder: UserId) -> Result<(), ApplicationError> {
    if lead.user_id == responder {
        return Ok(());
    }

    Err(ApplicationError::Authorization { responder: responder.0, owner: lead.user_id.0 })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferDecision {
    Accept,
    Reject,
}

impl OfferDecision {
    pub fn offer_status(self) -> OfferStatus {
        match self {
            Self::Accept => OfferStatus::Accepted,
            Self::Reject => OfferStatus::Rejected,
        }
    }

    pub fn lead_status(self) -> LeadStatus {
        match self {
            Self::Accept => LeadStatus::Accepted,
            Self::Reject => LeadStatus::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "ACCEPTED",
            Self::Reject => "REJECTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        authorize_responder, parse_price, OfferDecision, PendingAction, SlotUpdate, TextClaim,
    };
    use crate::conversation::Stage;
    use crate::domain::lead::{Lead, LeadId, LeadStatus, Locale, TransportMethod, UserId};
    use crate::domain::offer::{OfferId, OfferStatus};
    use crate::errors::{ApplicationError, Recovery};

    fn price_entry(lead: i64) -> PendingAction {
        PendingAction::PriceEntry { lead_id: LeadId(lead) }
    }

    fn counter(offer: i64, lead: i64) -> PendingAction {
        PendingAction::CounterOffer { offer_id: OfferId(offer), lead_id: LeadId(lead) }
    }

    fn lead_owned_by(user: i64) -> Lead {
        Lead {
            id: LeadId(7),
            user_id: UserId(user),
            username: None,
            locale: Locale::En,
            plate: "123 ABC".to_owned(),
            owner_name: "Jaan".to_owned(),
            is_owner: None,
            curb_weight: 1500,
            completeness: None,
            missing_parts: None,
            transport_method: Some(TransportMethod::Tow),
            needs_tow: Some(true),
            tow_address: Some("Tallinn".to_owned()),
            coordinates: None,
            phone: "+37251234567".to_owned(),
            status: LeadStatus::Replied,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn price_parsing_takes_first_number() {
        assert_eq!(parse_price("800"), Some(Decimal::new(800, 0)));
        assert_eq!(parse_price("€ 650,50"), Some(Decimal::new(65050, 2)));
        assert_eq!(parse_price("offer: 1200.5 eur, not 99"), Some(Decimal::new(12005, 1)));
        assert_eq!(parse_price("12,"), Some(Decimal::new(12, 0)));
    }

    #[test]
    fn price_parsing_rejects_missing_or_zero() {
        assert_eq!(parse_price("a lot"), None);
        assert_eq!(parse_price("0"), None);
        assert_eq!(parse_price("0,00 €"), None);
    }

    #[test]
    fn empty_slot_installs() {
        let mut slot = PendingAction::None;
        assert_eq!(slot.install(price_entry(7)), SlotUpdate::Installed);
        assert_eq!(slot, price_entry(7));
    }

    #[test]
    fn newer_action_of_same_kind_replaces() {
        let mut slot = price_entry(7);
        assert_eq!(slot.install(price_entry(8)), SlotUpdate::Replaced(price_entry(7)));

        let mut slot = counter(3, 7);
        assert_eq!(slot.install(counter(4, 7)), SlotUpdate::Replaced(counter(3, 7)));
        assert_eq!(slot, counter(4, 7));
    }

    #[test]
    fn price_entry_wins_over_counter_offer() {
        let mut slot = counter(3, 7);
        assert_eq!(slot.install(price_entry(9)), SlotUpdate::Replaced(counter(3, 7)));

        let mut slot = price_entry(9);
        assert_eq!(slot.install(counter(3, 7)), SlotUpdate::Refused(price_entry(9)));
        assert_eq!(slot, price_entry(9));
    }

    #[test]
    fn slot_claims_numeric_text_outside_intake() {
        let mut slot = price_entry(7);
        let claim = slot.take_for_text(&Stage::Idle, "800");

        assert_eq!(
            claim,
            TextClaim::Claimed { action: price_entry(7), amount: Decimal::new(800, 0) }
        );
        assert!(!slot.is_open());
    }

    #[test]
    fn slot_never_swallows_intake_input() {
        let mut slot = counter(3, 7);
        let stage = Stage::Plate { locale: Locale::Ee };

        assert_eq!(slot.take_for_text(&stage, "51234567"), TextClaim::Pass);
        assert_eq!(slot, counter(3, 7));
    }

    #[test]
    fn unparsable_text_keeps_slot_open() {
        let mut slot = price_entry(7);
        assert_eq!(slot.take_for_text(&Stage::Idle, "hmm"), TextClaim::Unparsable(price_entry(7)));
        assert_eq!(slot, price_entry(7));
    }

    #[test]
    fn only_lead_owner_may_respond() {
        let lead = lead_owned_by(1001);
        authorize_responder(&lead, UserId(1001)).expect("owner may respond");

        let error = authorize_responder(&lead, UserId(42)).expect_err("stranger is refused");
        assert_eq!(error, ApplicationError::Authorization { responder: 42, owner: 1001 });
        assert_eq!(error.recovery(), Recovery::Refuse);
    }

    #[test]
    fn decisions_map_to_both_statuses() {
        assert_eq!(OfferDecision::Accept.offer_status(), OfferStatus::Accepted);
        assert_eq!(OfferDecision::Accept.lead_status(), LeadStatus::Accepted);
        assert_eq!(OfferDecision::Reject.offer_status(), OfferStatus::Rejected);
        assert_eq!(OfferDecision::Reject.lead_status(), LeadStatus::Rejected);
    }
}
