//! Runs one inbound update to completion: picks the handler, executes it under
//! the sender's session lock, then delivers whatever it produced once the lock
//! is released.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tera::Context;
use tracing::{debug, error, info, warn};
use url::Url;

use romupunkt_core::config::AppConfig;
use romupunkt_core::conversation::{
    ConversationEngine, Effect, InboundEvent, IntakeLimits, Prompt, Stage, StageContext,
};
use romupunkt_core::domain::{LeadDraft, LeadId, Locale, MediaRef, UserId};
use romupunkt_core::errors::{ApplicationError, Recovery};
use romupunkt_core::negotiation::{OfferDecision, TextClaim};
use romupunkt_core::session::{Session, SessionStore};
use romupunkt_db::{
    CreateOutcome, DbPool, InMemoryStore, LeadRepository, OfferRepository, PhotoRepository,
    PhotoSessionRepository, SqlLeadRepository, SqlOfferRepository, SqlPhotoRepository,
    SqlPhotoSessionRepository,
};

use crate::callbacks::Callback;
use crate::commands::BotCommand;
use crate::events::{Inbound, InboundKind};
use crate::keyboards::KeyboardBuilder;
use crate::messenger::Messenger;
use crate::outbox::Outbox;
use crate::templates::Templates;

/// The four repositories the dispatcher writes through.
#[derive(Clone)]
pub struct Stores {
    pub leads: Arc<dyn LeadRepository>,
    pub offers: Arc<dyn OfferRepository>,
    pub photos: Arc<dyn PhotoRepository>,
    pub photo_sessions: Arc<dyn PhotoSessionRepository>,
}

impl Stores {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            leads: Arc::new(SqlLeadRepository::new(pool.clone())),
            offers: Arc::new(SqlOfferRepository::new(pool.clone())),
            photos: Arc::new(SqlPhotoRepository::new(pool.clone())),
            photo_sessions: Arc::new(SqlPhotoSessionRepository::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            leads: store.clone(),
            offers: store.clone(),
            photos: store.clone(),
            photo_sessions: store,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchSettings {
    pub operator_id: UserId,
    pub operator_locale: Locale,
    pub default_locale: Locale,
    pub dedup_window: Duration,
    /// Without it the share control says the link is unavailable.
    pub bot_username: Option<String>,
    pub limits: IntakeLimits,
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            operator_id: UserId(config.telegram.operator_id),
            operator_locale: config.telegram.operator_locale,
            default_locale: config.intake.default_locale,
            dedup_window: Duration::seconds(
                i64::try_from(config.intake.dedup_window_secs).unwrap_or(i64::MAX),
            ),
            bot_username: config.telegram.bot_username.clone(),
            limits: IntakeLimits::from(&config.intake),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    Handled,
    Ignored,
    /// The handler failed and the sender got the matching recovery message.
    Recovered(Recovery),
}

pub struct Dispatcher {
    pub(crate) engine: ConversationEngine,
    pub(crate) sessions: SessionStore,
    pub(crate) stores: Stores,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) templates: Arc<Templates>,
    pub(crate) settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        settings: DispatchSettings,
        sessions: SessionStore,
        stores: Stores,
        messenger: Arc<dyn Messenger>,
        templates: Arc<Templates>,
    ) -> Self {
        Self {
            engine: ConversationEngine::new(settings.limits.clone()),
            sessions,
            stores,
            messenger,
            templates,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle(&self, inbound: Inbound) -> HandleOutcome {
        info!(
            event_name = "ingress.telegram.update_received",
            correlation_id = inbound.update_id,
            user_id = inbound.user_id.0,
            kind = inbound.kind.tag().as_str(),
            "received telegram update"
        );

        let mut outbox = Outbox::default();
        let outcome = {
            let mut session = self.sessions.lock(inbound.user_id).await;
            session.touch(Utc::now());
            match self.route(&mut session, &inbound, &mut outbox).await {
                Ok(outcome) => outcome,
                Err(error) => self.recover(&mut session, &inbound, error, &mut outbox),
            }
        };

        let report = outbox.flush(self.messenger.as_ref()).await;
        debug!(
            event_name = "egress.telegram.flushed",
            correlation_id = inbound.update_id,
            delivered = report.delivered,
            failed = report.failed,
            "outbox flushed"
        );
        if report.failed_chats.contains(&self.operator_chat()) {
            warn!(
                event_name = "delivery.operator.failed",
                correlation_id = inbound.update_id,
                user_id = inbound.user_id.0,
                "operator notification was not delivered"
            );
        }
        outcome
    }

    async fn route(
        &self,
        session: &mut Session,
        inbound: &Inbound,
        outbox: &mut Outbox,
    ) -> Result<HandleOutcome, ApplicationError> {
        match &inbound.kind {
            InboundKind::Command(command) if command.is_restart() => {
                self.restart(session, inbound, outbox)
            }
            InboundKind::Command(BotCommand::Leads { limit }) => {
                self.list_leads(inbound, *limit, outbox).await
            }
            InboundKind::Command(command) => {
                debug!(user_id = inbound.user_id.0, command = ?command, "ignoring unknown command");
                Ok(HandleOutcome::Ignored)
            }
            InboundKind::Callback { data, message_id } => {
                let callback = match data.parse::<Callback>() {
                    Ok(callback) => callback,
                    Err(error) => {
                        debug!(user_id = inbound.user_id.0, error = %error, "ignoring callback");
                        return Ok(HandleOutcome::Ignored);
                    }
                };
                self.on_callback(session, inbound, callback, *message_id, outbox).await
            }
            InboundKind::Text(text) => match session.pending.take_for_text(&session.stage, text) {
                TextClaim::Pass => {
                    self.converse(session, inbound, InboundEvent::Text(text.clone()), outbox).await
                }
                TextClaim::Claimed { action, amount } => {
                    let result = self.complete_pending(inbound, action, amount, outbox).await;
                    if result.is_err() {
                        session.pending.install(action);
                    }
                    result
                }
                TextClaim::Unparsable(action) => {
                    self.reprompt_pending(inbound, action, outbox).await
                }
            },
            InboundKind::Photo(media) => {
                self.converse(session, inbound, InboundEvent::Media(media.clone()), outbox).await
            }
            InboundKind::Location(point) => {
                self.converse(session, inbound, InboundEvent::Location(*point), outbox).await
            }
        }
    }

    async fn on_callback(
        &self,
        session: &mut Session,
        inbound: &Inbound,
        callback: Callback,
        message_id: Option<i32>,
        outbox: &mut Outbox,
    ) -> Result<HandleOutcome, ApplicationError> {
        match callback {
            Callback::NewInquiry => self.restart(session, inbound, outbox),
            Callback::Share(locale) => self.share_bot(inbound, locale, outbox),
            Callback::AdminReply(lead_id) => {
                self.open_price_entry(session, inbound, lead_id, outbox).await
            }
            Callback::AdminArchive(lead_id) => {
                self.archive_lead(inbound, lead_id, message_id, outbox).await
            }
            Callback::AdminDelete(lead_id) => {
                self.delete_lead(inbound, lead_id, message_id, outbox).await
            }
            Callback::OfferAccept(offer_id) => {
                self.respond_to_offer(session, inbound, offer_id, OfferDecision::Accept, message_id, outbox)
                    .await
            }
            Callback::OfferReject(offer_id) => {
                self.respond_to_offer(session, inbound, offer_id, OfferDecision::Reject, message_id, outbox)
                    .await
            }
            Callback::OfferCounter(offer_id) => {
                self.open_counter(session, inbound, offer_id, message_id, outbox).await
            }
            other => match other.selection() {
                Some(selection) => {
                    self.converse(session, inbound, InboundEvent::Selection(selection), outbox).await
                }
                None => Ok(HandleOutcome::Ignored),
            },
        }
    }

    fn restart(
        &self,
        session: &mut Session,
        inbound: &Inbound,
        outbox: &mut Outbox,
    ) -> Result<HandleOutcome, ApplicationError> {
        session.reset();
        let ctx = self.stage_context(inbound, Vec::new());
        let transition = self.engine.advance(&session.stage, &InboundEvent::Restart, &ctx);
        let locale = self.settings.default_locale;
        for prompt in transition.prompts() {
            self.push_prompt(outbox, inbound.chat_id, locale, prompt)?;
        }
        session.stage = transition.to;

        info!(
            event_name = "conversation.session.restarted",
            correlation_id = inbound.update_id,
            user_id = inbound.user_id.0,
            "session restarted"
        );
        Ok(HandleOutcome::Handled)
    }

    fn share_bot(
        &self,
        inbound: &Inbound,
        locale: Locale,
        outbox: &mut Outbox,
    ) -> Result<HandleOutcome, ApplicationError> {
        let Some(bot_username) = self.settings.bot_username.as_deref() else {
            outbox.text(inbound.chat_id, self.templates.text(locale, "share_unavailable")?);
            return Ok(HandleOutcome::Handled);
        };

        let link = Url::parse(&format!("https://t.me/share?url=https://t.me/{bot_username}"))
            .map_err(|error| ApplicationError::Validation(format!("share link: {error}")))?;
        let context = crate::context! { "bot_username" => bot_username };
        let text = self.render(locale, "share_message", &context)?;
        let keyboard = KeyboardBuilder::new(&self.templates, locale).share_link(link)?;
        outbox.buttons(inbound.chat_id, text, keyboard);

        debug!(
            event_name = "conversation.share.offered",
            user_id = inbound.user_id.0,
            "share link sent"
        );
        Ok(HandleOutcome::Handled)
    }

    /// Feeds one event through the engine and executes its effects. The new
    /// stage is committed only when every effect succeeded.
    async fn converse(
        &self,
        session: &mut Session,
        inbound: &Inbound,
        event: InboundEvent,
        outbox: &mut Outbox,
    ) -> Result<HandleOutcome, ApplicationError> {
        let photos = match session.stage.photo_session() {
            Some(token) => self.stores.photo_sessions.list(inbound.user_id, token).await?,
            None => Vec::new(),
        };
        let ctx = self.stage_context(inbound, photos);
        let transition = self.engine.advance(&session.stage, &event, &ctx);
        let locale = transition
            .to
            .locale()
            .or_else(|| session.stage.locale())
            .unwrap_or(self.settings.default_locale);

        let mut prompts: Vec<Prompt> = Vec::new();
        let mut deliveries = Outbox::default();
        let mut finalized = false;
        for effect in &transition.effects {
            match effect {
                Effect::Prompt(prompt) => prompts.push(prompt.clone()),
                Effect::AppendPhoto { token, media } => {
                    let stored = self
                        .stores
                        .photo_sessions
                        .append(inbound.user_id, token, media, Utc::now())
                        .await?;
                    debug!(
                        event_name = "conversation.photo.appended",
                        user_id = inbound.user_id.0,
                        stored,
                        "photo appended to session"
                    );
                }
                Effect::Finalize(draft) => {
                    let lead_id = self.finalize(inbound, draft, &mut deliveries).await?;
                    prompts.push(Prompt::Submitted { lead_id });
                    finalized = true;
                }
            }
        }

        for prompt in &prompts {
            self.push_prompt(outbox, inbound.chat_id, locale, prompt)?;
        }
        outbox.extend(deliveries);

        if !transition.stayed() {
            info!(
                event_name = "conversation.stage.advanced",
                correlation_id = inbound.update_id,
                user_id = inbound.user_id.0,
                from = transition.from.as_str(),
                to = transition.to.tag().as_str(),
                "stage advanced"
            );
        }
        if finalized {
            session.reset();
        } else {
            session.stage = transition.to;
        }
        Ok(HandleOutcome::Handled)
    }

    /// Creates the lead (or reuses one created moments ago for the same plate
    /// and phone), moves the session photos onto it and queues the operator
    /// card. The card goes out once per lead, on whichever attempt first gets
    /// this far, so a retry after a failed photo move still notifies.
    async fn finalize(
        &self,
        inbound: &Inbound,
        draft: &LeadDraft,
        outbox: &mut Outbox,
    ) -> Result<LeadId, ApplicationError> {
        draft.validate()?;
        let now = Utc::now();
        let since = now - self.settings.dedup_window;

        let outcome = self.stores.leads.create_unless_recent(draft, since, now).await?;
        let lead = outcome.lead().clone();

        let moved = match &draft.photo_session {
            Some(token) => {
                self.stores.photo_sessions.migrate_to_lead(draft.user_id, token, lead.id, now).await?
            }
            None => 0,
        };

        let media: Vec<MediaRef> = match self.stores.photos.list_for_lead(lead.id).await {
            Ok(photos) => photos.into_iter().map(|photo| photo.media_ref).collect(),
            Err(error) => {
                warn!(
                    event_name = "conversation.finalize.photos_unavailable",
                    lead_id = lead.id.0,
                    error = %error,
                    "sending lead card without photos"
                );
                Vec::new()
            }
        };
        let mut card = Outbox::default();
        self.queue_lead_card(&lead, media, &mut card)?;

        if !self.stores.leads.claim_operator_card(lead.id, now).await? {
            info!(
                event_name = "conversation.finalize.deduplicated",
                correlation_id = inbound.update_id,
                user_id = inbound.user_id.0,
                lead_id = lead.id.0,
                moved,
                "finalize repeated within the dedup window; reusing lead"
            );
            return Ok(lead.id);
        }
        outbox.extend(card);

        match outcome {
            CreateOutcome::Created(_) => info!(
                event_name = "conversation.finalize.lead_created",
                correlation_id = inbound.update_id,
                user_id = inbound.user_id.0,
                lead_id = lead.id.0,
                photos = moved,
                "lead created"
            ),
            CreateOutcome::Duplicate(_) => info!(
                event_name = "conversation.finalize.card_recovered",
                correlation_id = inbound.update_id,
                user_id = inbound.user_id.0,
                lead_id = lead.id.0,
                photos = moved,
                "earlier attempt stored the lead but never queued its card"
            ),
        }
        Ok(lead.id)
    }

    fn recover(
        &self,
        session: &mut Session,
        inbound: &Inbound,
        error: ApplicationError,
        outbox: &mut Outbox,
    ) -> HandleOutcome {
        let recovery = error.recovery();
        let locale = session.stage.locale().unwrap_or(self.settings.default_locale);
        let reply = match recovery {
            Recovery::Reprompt | Recovery::SoftFailure => {
                warn!(
                    event_name = "dispatch.handler.soft_failure",
                    correlation_id = inbound.update_id,
                    user_id = inbound.user_id.0,
                    error = %error,
                    "handler failed softly"
                );
                None
            }
            Recovery::Refuse => {
                info!(
                    event_name = "dispatch.handler.refused",
                    correlation_id = inbound.update_id,
                    user_id = inbound.user_id.0,
                    error = %error,
                    "action refused"
                );
                self.templates.text(locale, "not_allowed").ok()
            }
            Recovery::Retry => {
                error!(
                    event_name = "persistence.operation.failed",
                    correlation_id = inbound.update_id,
                    user_id = inbound.user_id.0,
                    stage = session.stage.tag().as_str(),
                    error = %error,
                    "persistence failed; session left unchanged"
                );
                self.templates.prompt(locale, &Prompt::RetryLater).ok()
            }
            Recovery::Restart => {
                error!(
                    event_name = "conversation.integrity_violation",
                    correlation_id = inbound.update_id,
                    user_id = inbound.user_id.0,
                    stage = session.stage.tag().as_str(),
                    error = %error,
                    "integrity violation; forcing restart"
                );
                session.reset();
                session.stage = Stage::Language;
                if let Ok(notice) = self.templates.prompt(locale, &Prompt::SessionReset) {
                    outbox.text(inbound.chat_id, notice);
                }
                if let Err(error) =
                    self.push_prompt(outbox, inbound.chat_id, locale, &Prompt::ChooseLanguage)
                {
                    warn!(error = %error, "could not render language prompt");
                }
                None
            }
        };

        if let Some(text) = reply {
            outbox.text(inbound.chat_id, text);
        }
        HandleOutcome::Recovered(recovery)
    }

    fn stage_context(&self, inbound: &Inbound, photos: Vec<MediaRef>) -> StageContext {
        StageContext { user_id: inbound.user_id, username: inbound.username.clone(), photos }
    }

    pub(crate) fn push_prompt(
        &self,
        outbox: &mut Outbox,
        chat_id: i64,
        locale: Locale,
        prompt: &Prompt,
    ) -> Result<(), ApplicationError> {
        let text = self.templates.prompt(locale, prompt)?;
        match KeyboardBuilder::new(&self.templates, locale).for_prompt(prompt)? {
            Some(keyboard) => outbox.buttons(chat_id, text, keyboard),
            None => outbox.text(chat_id, text),
        };
        Ok(())
    }

    pub(crate) fn render(
        &self,
        locale: Locale,
        key: &str,
        context: &Context,
    ) -> Result<String, ApplicationError> {
        Ok(self.templates.render(locale, key, context)?)
    }

    pub(crate) fn operator_chat(&self) -> i64 {
        self.settings.operator_id.0
    }

    pub(crate) fn is_operator(&self, user_id: UserId) -> bool {
        user_id == self.settings.operator_id
    }
}
