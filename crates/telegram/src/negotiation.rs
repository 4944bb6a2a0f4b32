//! Operator pricing and the lead owner's answer to it. Every handler here runs
//! under the sender's session lock, so the pending slot it touches is the
//! sender's own.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};

use romupunkt_core::domain::{format_amount, Lead, LeadId, LeadStatus, Locale, Offer, OfferId, OfferStatus};
use romupunkt_core::errors::ApplicationError;
use romupunkt_core::negotiation::{authorize_responder, OfferDecision, PendingAction, SlotUpdate};
use romupunkt_core::session::Session;
use romupunkt_db::StatusChange;

use crate::context;
use crate::dispatcher::{Dispatcher, HandleOutcome};
use crate::events::Inbound;
use crate::keyboards::KeyboardBuilder;
use crate::outbox::Outbox;

type Handled = Result<HandleOutcome, ApplicationError>;

impl Dispatcher {
    /// The operator pressed "make offer": the next amount they type prices `lead_id`.
    pub(crate) async fn open_price_entry(
        &self,
        session: &mut Session,
        inbound: &Inbound,
        lead_id: LeadId,
        outbox: &mut Outbox,
    ) -> Handled {
        if !self.is_operator(inbound.user_id) {
            return self.not_authorized(inbound, outbox);
        }
        let locale = self.settings.operator_locale;
        let Some(lead) = self.stores.leads.find(lead_id).await? else {
            return self.lead_not_found(inbound.chat_id, lead_id, outbox);
        };
        if !lead.can_transition_to(LeadStatus::Replied) {
            return self.lead_closed(inbound.chat_id, &lead, outbox);
        }

        let update = session.pending.install(PendingAction::PriceEntry { lead_id });
        debug!(
            event_name = "negotiation.slot.installed",
            user_id = inbound.user_id.0,
            lead_id = lead_id.0,
            update = ?update,
            "price entry opened"
        );
        outbox.text(inbound.chat_id, self.render(locale, "ask_price", &context! { "lead_id" => lead_id.0 })?);
        Ok(HandleOutcome::Handled)
    }

    /// A slot claimed a typed amount. The caller restores the slot on error.
    pub(crate) async fn complete_pending(
        &self,
        inbound: &Inbound,
        action: PendingAction,
        amount: Decimal,
        outbox: &mut Outbox,
    ) -> Handled {
        match action {
            PendingAction::PriceEntry { lead_id } => {
                self.send_offer(inbound, lead_id, amount, outbox).await
            }
            PendingAction::CounterOffer { offer_id, lead_id } => {
                self.forward_counter(inbound, offer_id, lead_id, amount, outbox).await
            }
            PendingAction::None => Ok(HandleOutcome::Ignored),
        }
    }

    /// The slot wanted an amount and the text had none; ask again and keep it open.
    pub(crate) async fn reprompt_pending(
        &self,
        inbound: &Inbound,
        action: PendingAction,
        outbox: &mut Outbox,
    ) -> Handled {
        let (locale, key) = match action {
            PendingAction::PriceEntry { .. } => (self.settings.operator_locale, "invalid_price"),
            PendingAction::CounterOffer { lead_id, .. } => {
                (self.lead_locale(lead_id).await, "invalid_counter")
            }
            PendingAction::None => return Ok(HandleOutcome::Ignored),
        };
        outbox.text(inbound.chat_id, self.templates.text(locale, key)?);
        Ok(HandleOutcome::Handled)
    }

    async fn send_offer(
        &self,
        inbound: &Inbound,
        lead_id: LeadId,
        amount: Decimal,
        outbox: &mut Outbox,
    ) -> Handled {
        let Some(mut lead) = self.stores.leads.find(lead_id).await? else {
            return self.lead_not_found(inbound.chat_id, lead_id, outbox);
        };
        let lead_from = lead.status;
        if lead.transition_to(LeadStatus::Replied).is_err() {
            return self.lead_closed(inbound.chat_id, &lead, outbox);
        }

        let created = self.stores.offers.create(lead_id, amount, lead_from, Utc::now()).await?;
        let Some(offer) = created else {
            return self.lead_changed(inbound.chat_id, lead_id, outbox).await;
        };
        let operator_locale = self.settings.operator_locale;
        let offer_text =
            self.render(lead.locale, "offer_text", &context! { "amount" => format_amount(amount) })?;
        let controls = KeyboardBuilder::new(&self.templates, lead.locale).offer_actions(offer.id)?;
        let failure_notice = self.render(
            operator_locale,
            "offer_delivery_failed",
            &context! { "lead_id" => lead_id.0 },
        )?;
        outbox
            .buttons(lead.user_id.0, offer_text, controls)
            .on_failure_tell(inbound.chat_id, failure_notice);
        outbox.text(
            inbound.chat_id,
            self.render(operator_locale, "offer_sent", &context! { "lead_id" => lead_id.0 })?,
        );

        info!(
            event_name = "negotiation.offer.sent",
            correlation_id = inbound.update_id,
            lead_id = lead_id.0,
            offer_id = offer.id.0,
            amount = %amount,
            "offer sent to lead owner"
        );
        Ok(HandleOutcome::Handled)
    }

    pub(crate) async fn respond_to_offer(
        &self,
        session: &mut Session,
        inbound: &Inbound,
        offer_id: OfferId,
        decision: OfferDecision,
        message_id: Option<i32>,
        outbox: &mut Outbox,
    ) -> Handled {
        let Some((mut offer, mut lead)) = self.offer_with_lead(offer_id).await? else {
            return self.offer_not_found(inbound, outbox);
        };
        authorize_responder(&lead, inbound.user_id)?;

        if offer.status == OfferStatus::Withdrawn {
            return self.offer_superseded(inbound, &lead, message_id, outbox);
        }
        let offer_change = StatusChange::new(offer.status, decision.offer_status());
        let lead_change = StatusChange::new(lead.status, decision.lead_status());
        if offer.transition_to(offer_change.to).is_err() || lead.transition_to(lead_change.to).is_err() {
            return self.offer_closed(inbound, &lead, message_id, outbox);
        }
        let resolved = self
            .stores
            .offers
            .update_status(offer.id, offer_change, lead_change, Utc::now())
            .await?;
        if !resolved {
            info!(
                event_name = "negotiation.offer.conflict",
                correlation_id = inbound.update_id,
                lead_id = lead.id.0,
                offer_id = offer.id.0,
                "offer or lead changed before the answer was stored"
            );
            return self.offer_closed(inbound, &lead, message_id, outbox);
        }

        outbox.clear_controls(inbound.chat_id, message_id);
        match decision {
            OfferDecision::Accept => {
                outbox.text(inbound.chat_id, self.templates.text(lead.locale, "offer_accepted")?);
            }
            OfferDecision::Reject => {
                let slot = PendingAction::CounterOffer { offer_id: offer.id, lead_id: lead.id };
                if let SlotUpdate::Refused(kept) = session.pending.install(slot) {
                    debug!(user_id = inbound.user_id.0, kept = ?kept, "counter slot not opened");
                }
                outbox.text(inbound.chat_id, self.templates.text(lead.locale, "offer_rejected")?);
            }
        }

        let response = self.render(
            self.settings.operator_locale,
            "offer_response",
            &context! {
                "offer_id" => offer.id.0,
                "lead_id" => lead.id.0,
                "decision" => decision.as_str(),
                "plate" => lead.plate,
                "phone" => lead.phone,
                "amount" => format_amount(offer.amount),
            },
        )?;
        let unreachable = self.templates.text(lead.locale, "operator_unreachable")?;
        outbox.text(self.operator_chat(), response).on_failure_tell(inbound.chat_id, unreachable);

        info!(
            event_name = "negotiation.offer.resolved",
            correlation_id = inbound.update_id,
            lead_id = lead.id.0,
            offer_id = offer.id.0,
            decision = decision.as_str(),
            "lead owner answered offer"
        );
        Ok(HandleOutcome::Handled)
    }

    /// The lead owner pressed "counter-offer" on the newest offer, open or just
    /// rejected.
    pub(crate) async fn open_counter(
        &self,
        session: &mut Session,
        inbound: &Inbound,
        offer_id: OfferId,
        message_id: Option<i32>,
        outbox: &mut Outbox,
    ) -> Handled {
        let Some((offer, lead)) = self.offer_with_lead(offer_id).await? else {
            return self.offer_not_found(inbound, outbox);
        };
        authorize_responder(&lead, inbound.user_id)?;

        if offer.status == OfferStatus::Withdrawn || !self.is_latest_offer(&offer).await? {
            return self.offer_superseded(inbound, &lead, message_id, outbox);
        }
        if offer.status == OfferStatus::Accepted || lead.status == LeadStatus::Archived {
            return self.offer_closed(inbound, &lead, message_id, outbox);
        }

        let slot = PendingAction::CounterOffer { offer_id: offer.id, lead_id: lead.id };
        let key = match session.pending.install(slot) {
            SlotUpdate::Refused(_) => "slot_busy",
            SlotUpdate::Installed | SlotUpdate::Replaced(_) => "ask_counter",
        };
        outbox.text(inbound.chat_id, self.templates.text(lead.locale, key)?);
        Ok(HandleOutcome::Handled)
    }

    /// Relays a typed counter amount to the operator. No offer row is created;
    /// the operator answers with a fresh offer if they agree.
    async fn forward_counter(
        &self,
        inbound: &Inbound,
        offer_id: OfferId,
        lead_id: LeadId,
        amount: Decimal,
        outbox: &mut Outbox,
    ) -> Handled {
        let Some(lead) = self.stores.leads.find(lead_id).await? else {
            return self.offer_not_found(inbound, outbox);
        };
        authorize_responder(&lead, inbound.user_id)?;

        let operator_locale = self.settings.operator_locale;
        let amount_text = format_amount(amount);
        let notice = self.render(
            operator_locale,
            "counter_offer",
            &context! { "lead_id" => lead_id.0, "offer_id" => offer_id.0, "amount" => amount_text },
        )?;
        let controls = KeyboardBuilder::new(&self.templates, operator_locale).make_offer(lead_id)?;
        outbox.text(
            inbound.chat_id,
            self.render(lead.locale, "counter_forwarded", &context! { "amount" => amount_text })?,
        );
        let unreachable = self.templates.text(lead.locale, "operator_unreachable")?;
        outbox
            .buttons(self.operator_chat(), notice, controls)
            .on_failure_tell(inbound.chat_id, unreachable);

        info!(
            event_name = "negotiation.counter.forwarded",
            correlation_id = inbound.update_id,
            lead_id = lead_id.0,
            offer_id = offer_id.0,
            amount = %amount,
            "counter-offer forwarded to operator"
        );
        Ok(HandleOutcome::Handled)
    }

    async fn offer_with_lead(&self, offer_id: OfferId) -> Result<Option<(Offer, Lead)>, ApplicationError> {
        let Some(offer) = self.stores.offers.find(offer_id).await? else {
            return Ok(None);
        };
        let lead = self.stores.leads.find(offer.lead_id).await?;
        Ok(lead.map(|lead| (offer, lead)))
    }

    async fn is_latest_offer(&self, offer: &Offer) -> Result<bool, ApplicationError> {
        let history = self.stores.offers.list_for_lead(offer.lead_id).await?;
        Ok(history.last().map(|latest| latest.id) == Some(offer.id))
    }

    fn offer_closed(
        &self,
        inbound: &Inbound,
        lead: &Lead,
        message_id: Option<i32>,
        outbox: &mut Outbox,
    ) -> Handled {
        outbox.clear_controls(inbound.chat_id, message_id);
        outbox.text(inbound.chat_id, self.templates.text(lead.locale, "offer_closed")?);
        Ok(HandleOutcome::Handled)
    }

    fn offer_superseded(
        &self,
        inbound: &Inbound,
        lead: &Lead,
        message_id: Option<i32>,
        outbox: &mut Outbox,
    ) -> Handled {
        debug!(
            event_name = "negotiation.offer.superseded",
            user_id = inbound.user_id.0,
            lead_id = lead.id.0,
            "answer to an offer that a newer one replaced"
        );
        outbox.clear_controls(inbound.chat_id, message_id);
        outbox.text(inbound.chat_id, self.templates.text(lead.locale, "offer_superseded")?);
        Ok(HandleOutcome::Handled)
    }

    async fn lead_locale(&self, lead_id: LeadId) -> Locale {
        match self.stores.leads.find(lead_id).await {
            Ok(Some(lead)) => lead.locale,
            _ => self.settings.default_locale,
        }
    }

    fn offer_not_found(&self, inbound: &Inbound, outbox: &mut Outbox) -> Handled {
        outbox.text(inbound.chat_id, self.templates.text(self.settings.default_locale, "offer_not_found")?);
        Ok(HandleOutcome::Handled)
    }
}
