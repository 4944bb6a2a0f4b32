//! Operator-only lead management: the recent-leads listing, archive, delete
//! and the card sent for every new lead.

use chrono::Utc;
use tera::Context;
use tracing::info;

use romupunkt_core::domain::{Completeness, Lead, LeadId, LeadStatus, MediaRef, TransportMethod};
use romupunkt_core::errors::ApplicationError;
use romupunkt_db::StatusChange;

use crate::context;
use crate::dispatcher::{Dispatcher, HandleOutcome};
use crate::events::Inbound;
use crate::keyboards::KeyboardBuilder;
use crate::outbox::{Outbox, Outgoing};

type Handled = Result<HandleOutcome, ApplicationError>;

/// Listing replies stay well under Telegram's 4096 character message cap.
const LISTING_CHAR_LIMIT: usize = 3500;
const LINE_SEPARATOR: &str = "\n\n";

impl Dispatcher {
    pub(crate) async fn list_leads(&self, inbound: &Inbound, limit: u32, outbox: &mut Outbox) -> Handled {
        if !self.is_operator(inbound.user_id) {
            return self.not_authorized(inbound, outbox);
        }
        let locale = self.settings.operator_locale;
        let overviews = self.stores.leads.list_recent(limit).await?;
        if overviews.is_empty() {
            outbox.text(inbound.chat_id, self.templates.text(locale, "leads_empty")?);
            return Ok(HandleOutcome::Handled);
        }

        let mut lines = Vec::with_capacity(overviews.len());
        for overview in &overviews {
            let lead = &overview.lead;
            lines.push(self.render(
                locale,
                "lead_line",
                &context! {
                    "badge" => lead.status.badge(),
                    "lead_id" => lead.id.0,
                    "plate" => lead.plate,
                    "owner_name" => lead.owner_name,
                    "phone" => lead.phone,
                    "photo_count" => overview.photo_count,
                    "created_at" => lead.created_at.format("%Y-%m-%d %H:%M").to_string(),
                },
            )?);
        }
        let marker = self.templates.text(locale, "truncated")?;
        outbox.text(inbound.chat_id, join_within_limit(&lines, &marker, LISTING_CHAR_LIMIT));

        info!(
            event_name = "admin.leads.listed",
            correlation_id = inbound.update_id,
            count = overviews.len(),
            "recent leads listed"
        );
        Ok(HandleOutcome::Handled)
    }

    pub(crate) async fn archive_lead(
        &self,
        inbound: &Inbound,
        lead_id: LeadId,
        message_id: Option<i32>,
        outbox: &mut Outbox,
    ) -> Handled {
        if !self.is_operator(inbound.user_id) {
            return self.not_authorized(inbound, outbox);
        }
        let Some(mut lead) = self.stores.leads.find(lead_id).await? else {
            return self.lead_not_found(inbound.chat_id, lead_id, outbox);
        };
        let change = StatusChange::new(lead.status, LeadStatus::Archived);
        if lead.transition_to(LeadStatus::Archived).is_err() {
            return self.lead_closed(inbound.chat_id, &lead, outbox);
        }
        if !self.stores.leads.update_status(lead_id, change, Utc::now()).await? {
            return self.lead_changed(inbound.chat_id, lead_id, outbox).await;
        }

        outbox.clear_controls(inbound.chat_id, message_id);
        outbox.text(
            inbound.chat_id,
            self.render(self.settings.operator_locale, "lead_archived", &context! { "lead_id" => lead_id.0 })?,
        );
        info!(event_name = "admin.lead.archived", correlation_id = inbound.update_id, lead_id = lead_id.0, "lead archived");
        Ok(HandleOutcome::Handled)
    }

    pub(crate) async fn delete_lead(
        &self,
        inbound: &Inbound,
        lead_id: LeadId,
        message_id: Option<i32>,
        outbox: &mut Outbox,
    ) -> Handled {
        if !self.is_operator(inbound.user_id) {
            return self.not_authorized(inbound, outbox);
        }
        if !self.stores.leads.delete_cascade(lead_id).await? {
            return self.lead_not_found(inbound.chat_id, lead_id, outbox);
        }

        outbox.clear_controls(inbound.chat_id, message_id);
        outbox.text(
            inbound.chat_id,
            self.render(self.settings.operator_locale, "lead_deleted", &context! { "lead_id" => lead_id.0 })?,
        );
        info!(event_name = "admin.lead.deleted", correlation_id = inbound.update_id, lead_id = lead_id.0, "lead deleted");
        Ok(HandleOutcome::Handled)
    }

    /// Queues the new-lead card for the operator: the photos as one album with
    /// the card as caption, then the lead's action buttons.
    pub(crate) fn queue_lead_card(
        &self,
        lead: &Lead,
        media: Vec<MediaRef>,
        outbox: &mut Outbox,
    ) -> Result<(), ApplicationError> {
        let locale = self.settings.operator_locale;
        let context = self.card_context(lead, media.len())?;
        let caption = self.render(locale, "lead_card", &context)?;
        outbox.push(self.operator_chat(), Outgoing::Album { media, caption });

        let prompt = self.render(locale, "lead_actions", &context! { "lead_id" => lead.id.0 })?;
        let controls = KeyboardBuilder::new(&self.templates, locale).lead_actions(lead.id)?;
        outbox.buttons(self.operator_chat(), prompt, controls);
        Ok(())
    }

    fn card_context(&self, lead: &Lead, photo_count: usize) -> Result<Context, ApplicationError> {
        let locale = self.settings.operator_locale;
        let label = |key: &str| self.templates.text(locale, key);

        let is_owner = match lead.is_owner {
            Some(true) => Some(label("value_yes")?),
            Some(false) => Some(label("value_no")?),
            None => None,
        };
        let completeness = match lead.completeness {
            Some(Completeness::Complete) => Some(label("value_complete")?),
            Some(Completeness::Missing) => Some(label("value_missing")?),
            None => None,
        };
        let transport = match lead.transport_method {
            Some(TransportMethod::SelfDelivery) => Some(label("value_self")?),
            Some(TransportMethod::Tow) => Some(label("value_tow")?),
            None => None,
        };

        Ok(context! {
            "lead_id" => lead.id.0,
            "plate" => lead.plate,
            "owner_name" => lead.owner_name,
            "is_owner" => is_owner,
            "phone" => lead.phone,
            "curb_weight" => lead.curb_weight,
            "completeness" => completeness,
            "missing_parts" => lead.missing_parts,
            "transport" => transport,
            "location" => lead.location(),
            "username" => lead.username,
            "photo_count" => photo_count,
        })
    }

    pub(crate) fn not_authorized(&self, inbound: &Inbound, outbox: &mut Outbox) -> Handled {
        info!(
            event_name = "admin.access.denied",
            correlation_id = inbound.update_id,
            user_id = inbound.user_id.0,
            "operator control used by another user"
        );
        outbox.text(inbound.chat_id, self.templates.text(self.settings.default_locale, "not_authorized")?);
        Ok(HandleOutcome::Handled)
    }

    pub(crate) fn lead_not_found(&self, chat_id: i64, lead_id: LeadId, outbox: &mut Outbox) -> Handled {
        let text = self.render(
            self.settings.operator_locale,
            "lead_not_found",
            &context! { "lead_id" => lead_id.0 },
        )?;
        outbox.text(chat_id, text);
        Ok(HandleOutcome::Handled)
    }

    /// A guarded write lost to a concurrent change; report the lead as it is now.
    pub(crate) async fn lead_changed(
        &self,
        chat_id: i64,
        lead_id: LeadId,
        outbox: &mut Outbox,
    ) -> Handled {
        match self.stores.leads.find(lead_id).await? {
            Some(lead) => self.lead_closed(chat_id, &lead, outbox),
            None => self.lead_not_found(chat_id, lead_id, outbox),
        }
    }

    pub(crate) fn lead_closed(&self, chat_id: i64, lead: &Lead, outbox: &mut Outbox) -> Handled {
        let text = self.render(
            self.settings.operator_locale,
            "lead_closed",
            &context! { "lead_id" => lead.id.0, "status" => lead.status.as_str() },
        )?;
        outbox.text(chat_id, text);
        Ok(HandleOutcome::Handled)
    }
}

/// Joins whole lines until the next one would cross `limit` characters, then
/// appends `marker`.
fn join_within_limit(lines: &[String], marker: &str, limit: usize) -> String {
    let mut body = String::new();
    let mut used = 0;
    for line in lines {
        let cost = line.chars().count() + if body.is_empty() { 0 } else { LINE_SEPARATOR.len() };
        if used + cost > limit {
            body.push_str(LINE_SEPARATOR);
            body.push_str(marker);
            return body;
        }
        if !body.is_empty() {
            body.push_str(LINE_SEPARATOR);
        }
        body.push_str(line);
        used += cost;
    }
    body
}
