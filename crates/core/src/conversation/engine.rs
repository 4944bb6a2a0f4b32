use tracing::debug;

use crate::config::IntakeConfig;
use crate::conversation::states::{
    Effect, InboundEvent, OwnerAnswer, OwnerDetails, PhotoIntake, Prompt, Selection, Stage,
    StageContext, TransportDetails, Transition, VehicleDetails,
};
use crate::conversation::validate::{
    is_done_word, normalize_phone, parse_country_code, parse_curb_weight, parse_owner_name,
    parse_plate, parse_yes_no,
};
use crate::domain::lead::{Completeness, Locale, TransportMethod};
use crate::domain::photo::PhotoSessionToken;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntakeLimits {
    pub min_photos: usize,
    pub max_photos: usize,
    pub ask_completeness: bool,
    /// Prefix applied when a local number arrives before any country code was picked.
    pub default_country_code: String,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self {
            min_photos: 1,
            max_photos: 4,
            ask_completeness: false,
            default_country_code: "+372".to_string(),
        }
    }
}

impl From<&IntakeConfig> for IntakeLimits {
    fn from(config: &IntakeConfig) -> Self {
        Self {
            min_photos: config.min_photos,
            max_photos: config.max_photos,
            ask_completeness: config.ask_completeness,
            default_country_code: config.default_country_code.clone(),
        }
    }
}

/// The stage transition function. It never touches storage: anything that must
/// be persisted comes back as an [`Effect`] for the caller to execute.
#[derive(Clone, Debug, Default)]
pub struct ConversationEngine {
    limits: IntakeLimits,
}

type Step = (Stage, Vec<Effect>);

impl ConversationEngine {
    pub fn new(limits: IntakeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &IntakeLimits {
        &self.limits
    }

    pub fn advance(&self, stage: &Stage, event: &InboundEvent, ctx: &StageContext) -> Transition {
        let from = stage.tag();
        let (to, effects) = match (stage, event) {
            (_, InboundEvent::Restart) => (Stage::Language, prompt(Prompt::ChooseLanguage)),
            (Stage::Idle | Stage::Finalized { .. }, _) => {
                (Stage::Language, prompt(Prompt::ChooseLanguage))
            }
            (Stage::Language, event) => self.on_language(event),
            (Stage::Welcome { locale }, _) => (Stage::Plate { locale: *locale }, prompt(Prompt::AskPlate)),
            (Stage::Plate { locale }, event) => self.on_plate(*locale, event),
            (Stage::OwnerName { locale, plate }, event) => self.on_owner_name(*locale, plate, event),
            (Stage::OwnerConfirm(owner), event) => self.on_owner_confirm(owner, event),
            (Stage::CurbWeight { owner, is_owner }, event) => {
                self.on_curb_weight(owner, *is_owner, event)
            }
            (Stage::Completeness(vehicle), event) => self.on_completeness(vehicle, event),
            (Stage::Logistics(vehicle), event) => self.on_logistics(vehicle, event),
            (Stage::Location(vehicle), event) => self.on_location(vehicle, event),
            (Stage::Photos(intake), event) => self.on_photos(intake, event, ctx),
            (Stage::Phone { intake, country_code }, event) => {
                self.on_phone(intake, country_code.as_deref(), event, ctx)
            }
        };

        debug!(
            event_name = "conversation.stage.evaluated",
            user_id = ctx.user_id.0,
            from = from.as_str(),
            to = to.tag().as_str(),
            effects = effects.len(),
            "stage evaluated"
        );

        Transition { from, to, effects }
    }

    fn on_language(&self, event: &InboundEvent) -> Step {
        let chosen = match event {
            InboundEvent::Selection(Selection::Language(locale)) => Some(*locale),
            InboundEvent::Text(text) => Locale::from_choice(text),
            _ => None,
        };

        match chosen {
            Some(locale) => (Stage::Welcome { locale }, prompt(Prompt::Welcome)),
            None => (Stage::Language, prompt(Prompt::ChooseLanguage)),
        }
    }

    fn on_plate(&self, locale: Locale, event: &InboundEvent) -> Step {
        let InboundEvent::Text(text) = event else {
            return (Stage::Plate { locale }, prompt(Prompt::AskPlate));
        };

        match parse_plate(text) {
            Some(plate) => (Stage::OwnerName { locale, plate }, prompt(Prompt::AskOwnerName)),
            None => (Stage::Plate { locale }, prompt(Prompt::InvalidPlate)),
        }
    }

    fn on_owner_name(&self, locale: Locale, plate: &str, event: &InboundEvent) -> Step {
        let stay = || Stage::OwnerName { locale, plate: plate.to_string() };
        let InboundEvent::Text(text) = event else {
            return (stay(), prompt(Prompt::AskOwnerName));
        };

        match parse_owner_name(text) {
            Some(owner_name) => (
                Stage::OwnerConfirm(OwnerDetails { locale, plate: plate.to_string(), owner_name }),
                prompt(Prompt::AskOwnership),
            ),
            None => (stay(), prompt(Prompt::InvalidOwnerName)),
        }
    }

    fn on_owner_confirm(&self, owner: &OwnerDetails, event: &InboundEvent) -> Step {
        let answer = match event {
            InboundEvent::Selection(Selection::Owner(OwnerAnswer::Yes)) => Some(Some(true)),
            InboundEvent::Selection(Selection::Owner(OwnerAnswer::No)) => Some(Some(false)),
            InboundEvent::Selection(Selection::Owner(OwnerAnswer::Skip)) => Some(None),
            InboundEvent::Text(text) => parse_yes_no(text).map(Some),
            _ => None,
        };

        match answer {
            Some(is_owner) => (
                Stage::CurbWeight { owner: owner.clone(), is_owner },
                prompt(Prompt::AskCurbWeight),
            ),
            None => (Stage::OwnerConfirm(owner.clone()), prompt(Prompt::AskOwnership)),
        }
    }

    fn on_curb_weight(
        &self,
        owner: &OwnerDetails,
        is_owner: Option<bool>,
        event: &InboundEvent,
    ) -> Step {
        let weight = match event {
            InboundEvent::Text(text) => parse_curb_weight(text),
            _ => None,
        };
        let Some(curb_weight) = weight else {
            return (
                Stage::CurbWeight { owner: owner.clone(), is_owner },
                prompt(Prompt::InvalidCurbWeight),
            );
        };

        let vehicle = VehicleDetails {
            owner: owner.clone(),
            is_owner,
            curb_weight,
            completeness: None,
            missing_parts: None,
        };
        if self.limits.ask_completeness {
            (Stage::Completeness(vehicle), prompt(Prompt::AskCompleteness))
        } else {
            (Stage::Logistics(vehicle), prompt(Prompt::AskLogistics))
        }
    }

    fn on_completeness(&self, vehicle: &VehicleDetails, event: &InboundEvent) -> Step {
        let mut vehicle = vehicle.clone();
        match event {
            InboundEvent::Selection(Selection::Complete) => {
                vehicle.completeness = Some(Completeness::Complete);
            }
            InboundEvent::Text(text) if !text.trim().is_empty() => {
                vehicle.completeness = Some(Completeness::Missing);
                vehicle.missing_parts = Some(text.trim().to_string());
            }
            _ => return (Stage::Completeness(vehicle), prompt(Prompt::AskCompleteness)),
        }

        (Stage::Logistics(vehicle), prompt(Prompt::AskLogistics))
    }

    fn on_logistics(&self, vehicle: &VehicleDetails, event: &InboundEvent) -> Step {
        match event {
            InboundEvent::Selection(Selection::Logistics(TransportMethod::SelfDelivery)) => self
                .enter_photos(
                    vehicle.clone(),
                    TransportDetails {
                        method: TransportMethod::SelfDelivery,
                        tow_address: None,
                        coordinates: None,
                    },
                ),
            InboundEvent::Selection(Selection::Logistics(TransportMethod::Tow)) => {
                (Stage::Location(vehicle.clone()), prompt(Prompt::AskTowLocation))
            }
            _ => (Stage::Logistics(vehicle.clone()), prompt(Prompt::AskLogistics)),
        }
    }

    fn on_location(&self, vehicle: &VehicleDetails, event: &InboundEvent) -> Step {
        let transport = match event {
            InboundEvent::Text(text) if !text.trim().is_empty() => TransportDetails {
                method: TransportMethod::Tow,
                tow_address: Some(text.trim().to_string()),
                coordinates: None,
            },
            InboundEvent::Location(point) => TransportDetails {
                method: TransportMethod::Tow,
                tow_address: Some(point.to_string()),
                coordinates: Some(*point),
            },
            _ => return (Stage::Location(vehicle.clone()), prompt(Prompt::AskTowLocation)),
        };

        self.enter_photos(vehicle.clone(), transport)
    }

    fn enter_photos(&self, vehicle: VehicleDetails, transport: TransportDetails) -> Step {
        let intake =
            PhotoIntake { vehicle, transport, photo_session: PhotoSessionToken::generate() };
        (Stage::Photos(intake), prompt(Prompt::AskPhotos { max: self.limits.max_photos }))
    }

    fn on_photos(&self, intake: &PhotoIntake, event: &InboundEvent, ctx: &StageContext) -> Step {
        let max = self.limits.max_photos;
        let count = ctx.photos.len();
        let stay = || Stage::Photos(intake.clone());

        match event {
            InboundEvent::Media(media) if ctx.photos.contains(media) => {
                (stay(), prompt(Prompt::PhotoReceived { count, max }))
            }
            InboundEvent::Media(_) if count >= max => {
                (stay(), prompt(Prompt::PhotoLimitReached { max }))
            }
            InboundEvent::Media(media) => {
                let count = count + 1;
                let mut effects = vec![
                    Effect::AppendPhoto {
                        token: intake.photo_session.clone(),
                        media: media.clone(),
                    },
                    Effect::Prompt(Prompt::PhotoReceived { count, max }),
                ];
                if count < max {
                    return (stay(), effects);
                }
                effects.push(Effect::Prompt(Prompt::AskCountryCode));
                (Stage::Phone { intake: intake.clone(), country_code: None }, effects)
            }
            InboundEvent::Selection(Selection::PhotosDone) => self.finish_photos(intake, count),
            InboundEvent::Text(text) if is_done_word(text) => self.finish_photos(intake, count),
            _ => (stay(), prompt(Prompt::AskPhotos { max })),
        }
    }

    fn finish_photos(&self, intake: &PhotoIntake, count: usize) -> Step {
        let min = self.limits.min_photos;
        if count < min {
            return (Stage::Photos(intake.clone()), prompt(Prompt::PhotosRequired { min }));
        }

        (Stage::Phone { intake: intake.clone(), country_code: None }, prompt(Prompt::AskCountryCode))
    }

    fn on_phone(
        &self,
        intake: &PhotoIntake,
        country_code: Option<&str>,
        event: &InboundEvent,
        ctx: &StageContext,
    ) -> Step {
        let stay = |code: Option<&str>| Stage::Phone {
            intake: intake.clone(),
            country_code: code.map(str::to_string),
        };

        match (country_code, event) {
            (_, InboundEvent::Selection(Selection::CountryCode(label))) => {
                match parse_country_code(label) {
                    Some(code) => (
                        stay(Some(&code)),
                        prompt(Prompt::AskLocalNumber { country_code: code.clone() }),
                    ),
                    None => (stay(country_code), prompt(Prompt::InvalidCountryCode)),
                }
            }
            (Some(code), InboundEvent::Text(text)) => match normalize_phone(code, text) {
                Some(phone) => self.finalize(intake, phone, ctx),
                None => (stay(Some(code)), prompt(Prompt::InvalidPhone)),
            },
            (None, InboundEvent::Text(text)) => {
                if let Some(phone) = normalize_phone("", text) {
                    return self.finalize(intake, phone, ctx);
                }
                if let Some(code) = parse_country_code(text) {
                    return (
                        stay(Some(&code)),
                        prompt(Prompt::AskLocalNumber { country_code: code.clone() }),
                    );
                }
                match normalize_phone(&self.limits.default_country_code, text) {
                    Some(phone) => self.finalize(intake, phone, ctx),
                    None => (stay(None), prompt(Prompt::InvalidCountryCode)),
                }
            }
            (Some(code), _) => {
                (stay(Some(code)), prompt(Prompt::AskLocalNumber { country_code: code.to_string() }))
            }
            (None, _) => (stay(None), prompt(Prompt::AskCountryCode)),
        }
    }

    fn finalize(&self, intake: &PhotoIntake, phone: String, ctx: &StageContext) -> Step {
        let locale = intake.vehicle.owner.locale;
        let draft = intake.clone().into_draft(ctx, phone);
        (Stage::Finalized { locale }, vec![Effect::Finalize(draft)])
    }
}

fn prompt(prompt: Prompt) -> Vec<Effect> {
    vec![Effect::Prompt(prompt)]
}

#[cfg(test)]
mod tests {
    use crate::conversation::engine::{ConversationEngine, IntakeLimits};
    use crate::conversation::states::{
        Effect, InboundEvent, OwnerAnswer, Prompt, Selection, Stage, StageContext, StageTag,
    };
    use crate::domain::lead::{Completeness, Coordinates, LeadDraft, Locale, TransportMethod, UserId};
    use crate::domain::photo::MediaRef;

    fn ctx() -> StageContext {
        StageContext { user_id: UserId(1001), username: Some("jaan".to_owned()), photos: Vec::new() }
    }

    fn ctx_with(photos: &[&str]) -> StageContext {
        StageContext {
            photos: photos.iter().map(|id| MediaRef((*id).to_owned())).collect(),
            ..ctx()
        }
    }

    fn text(value: &str) -> InboundEvent {
        InboundEvent::Text(value.to_owned())
    }

    fn select(selection: Selection) -> InboundEvent {
        InboundEvent::Selection(selection)
    }

    fn drive(engine: &ConversationEngine, events: &[InboundEvent]) -> Stage {
        events.iter().fold(Stage::Idle, |stage, event| engine.advance(&stage, event, &ctx()).to)
    }

    fn to_logistics() -> Vec<InboundEvent> {
        vec![
            text("/start"),
            select(Selection::Language(Locale::Ee)),
            select(Selection::Continue),
            text("123 abc"),
            text("Jaan"),
            select(Selection::Owner(OwnerAnswer::Yes)),
            text("1500"),
        ]
    }

    fn photos_stage(engine: &ConversationEngine) -> Stage {
        let mut events = to_logistics();
        events.push(select(Selection::Logistics(TransportMethod::SelfDelivery)));
        drive(engine, &events)
    }

    fn draft_of(effects: &[Effect]) -> Option<&LeadDraft> {
        effects.iter().find_map(|effect| match effect {
            Effect::Finalize(draft) => Some(draft),
            _ => None,
        })
    }

    #[test]
    fn happy_path_reaches_finalize_with_all_fields() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);
        assert_eq!(photos.tag(), StageTag::Photos);

        let phone = engine.advance(&photos, &text("done"), &ctx_with(&["a", "b"])).to;
        assert_eq!(phone.tag(), StageTag::Phone);

        let with_code =
            engine.advance(&phone, &select(Selection::CountryCode("+372".to_owned())), &ctx()).to;
        let finalized = engine.advance(&with_code, &text("5123 4567"), &ctx());

        assert_eq!(finalized.to, Stage::Finalized { locale: Locale::Ee });
        let draft = draft_of(&finalized.effects).expect("finalize effect");
        assert_eq!(draft.plate, "123 ABC");
        assert_eq!(draft.owner_name, "Jaan");
        assert_eq!(draft.is_owner, Some(true));
        assert_eq!(draft.curb_weight, 1500);
        assert_eq!(draft.phone, "+37251234567");
        assert_eq!(draft.transport_method, TransportMethod::SelfDelivery);
        assert!(draft.photo_session.is_some());
        draft.validate().expect("engine-built draft is complete");
    }

    #[test]
    fn invalid_weight_keeps_stage_and_reprompts() {
        let engine = ConversationEngine::default();
        let mut events = to_logistics();
        events.pop();
        let stage = drive(&engine, &events);

        let transition = engine.advance(&stage, &text("12000"), &ctx());

        assert!(transition.stayed());
        assert_eq!(transition.to, stage);
        assert_eq!(transition.effects, vec![Effect::Prompt(Prompt::InvalidCurbWeight)]);
    }

    #[test]
    fn blank_plate_is_rejected_without_lockout() {
        let engine = ConversationEngine::default();
        let stage = Stage::Plate { locale: Locale::En };

        for _ in 0..5 {
            let transition = engine.advance(&stage, &text("  "), &ctx());
            assert_eq!(transition.to, stage);
        }
        let accepted = engine.advance(&stage, &text("abc 123"), &ctx());
        assert_eq!(accepted.to.tag(), StageTag::OwnerName);
    }

    #[test]
    fn restart_from_any_stage_reenters_language() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);

        for stage in [Stage::Idle, Stage::Plate { locale: Locale::Ru }, photos] {
            let transition = engine.advance(&stage, &InboundEvent::Restart, &ctx());
            assert_eq!(transition.to, Stage::Language);
            assert_eq!(transition.effects, vec![Effect::Prompt(Prompt::ChooseLanguage)]);
        }
    }

    #[test]
    fn language_can_be_typed() {
        let engine = ConversationEngine::default();
        let transition = engine.advance(&Stage::Language, &text("Русский"), &ctx());
        assert_eq!(transition.to, Stage::Welcome { locale: Locale::Ru });
    }

    #[test]
    fn skipped_ownership_leaves_flag_unset() {
        let engine = ConversationEngine::default();
        let mut events = to_logistics();
        events[5] = select(Selection::Owner(OwnerAnswer::Skip));
        let stage = drive(&engine, &events);

        let Stage::Logistics(vehicle) = stage else {
            panic!("expected logistics stage, got {stage:?}");
        };
        assert_eq!(vehicle.is_owner, None);
    }

    #[test]
    fn completeness_stage_only_when_enabled() {
        let engine = ConversationEngine::new(IntakeLimits {
            ask_completeness: true,
            ..IntakeLimits::default()
        });
        let stage = drive(&engine, &to_logistics());
        assert_eq!(stage.tag(), StageTag::Completeness);

        let next = engine.advance(&stage, &text("no engine"), &ctx()).to;
        let Stage::Logistics(vehicle) = next else {
            panic!("expected logistics stage, got {next:?}");
        };
        assert_eq!(vehicle.completeness, Some(Completeness::Missing));
        assert_eq!(vehicle.missing_parts.as_deref(), Some("no engine"));

        let default_engine = ConversationEngine::default();
        assert_eq!(drive(&default_engine, &to_logistics()).tag(), StageTag::Logistics);
    }

    #[test]
    fn tow_location_accepts_shared_coordinates() {
        let engine = ConversationEngine::default();
        let mut events = to_logistics();
        events.push(select(Selection::Logistics(TransportMethod::Tow)));
        let location = drive(&engine, &events);
        assert_eq!(location.tag(), StageTag::Location);

        let point = Coordinates { latitude: 59.437, longitude: 24.7536 };
        let photos = engine.advance(&location, &InboundEvent::Location(point), &ctx()).to;

        let Stage::Photos(intake) = photos else {
            panic!("expected photos stage, got {photos:?}");
        };
        assert_eq!(intake.transport.method, TransportMethod::Tow);
        assert_eq!(intake.transport.coordinates, Some(point));
        assert_eq!(intake.transport.tow_address.as_deref(), Some("59.437, 24.7536"));
    }

    #[test]
    fn photo_upload_emits_append_and_stays() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);

        let transition =
            engine.advance(&photos, &InboundEvent::Media(MediaRef("p1".to_owned())), &ctx());

        assert_eq!(transition.to, photos);
        assert!(matches!(
            transition.effects.as_slice(),
            [Effect::AppendPhoto { media, .. }, Effect::Prompt(Prompt::PhotoReceived { count: 1, max: 4 })]
                if media.0 == "p1"
        ));
    }

    #[test]
    fn redelivered_photo_is_acknowledged_without_append() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);

        let transition = engine.advance(
            &photos,
            &InboundEvent::Media(MediaRef("p1".to_owned())),
            &ctx_with(&["p1"]),
        );

        assert_eq!(transition.to, photos);
        assert_eq!(
            transition.effects,
            vec![Effect::Prompt(Prompt::PhotoReceived { count: 1, max: 4 })]
        );
    }

    #[test]
    fn upload_reaching_limit_moves_to_phone() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);

        let transition = engine.advance(
            &photos,
            &InboundEvent::Media(MediaRef("p4".to_owned())),
            &ctx_with(&["p1", "p2", "p3"]),
        );

        assert_eq!(transition.to.tag(), StageTag::Phone);
        assert!(transition.effects.contains(&Effect::Prompt(Prompt::AskCountryCode)));
    }

    #[test]
    fn upload_beyond_limit_is_refused() {
        let engine = ConversationEngine::new(IntakeLimits { max_photos: 2, ..IntakeLimits::default() });
        let photos = photos_stage(&engine);

        let transition = engine.advance(
            &photos,
            &InboundEvent::Media(MediaRef("p3".to_owned())),
            &ctx_with(&["p1", "p2"]),
        );

        assert_eq!(transition.to, photos);
        assert_eq!(transition.effects, vec![Effect::Prompt(Prompt::PhotoLimitReached { max: 2 })]);
    }

    #[test]
    fn done_without_photos_reprompts() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);

        let transition = engine.advance(&photos, &select(Selection::PhotosDone), &ctx());

        assert_eq!(transition.to, photos);
        assert_eq!(transition.effects, vec![Effect::Prompt(Prompt::PhotosRequired { min: 1 })]);
    }

    #[test]
    fn local_number_without_code_uses_default_prefix() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);
        let phone = engine.advance(&photos, &text("valmis"), &ctx_with(&["a"])).to;

        let transition = engine.advance(&phone, &text("51234567"), &ctx());
        let draft = draft_of(&transition.effects).expect("finalize effect");
        assert_eq!(draft.phone, "+37251234567");
    }

    #[test]
    fn typed_country_code_then_invalid_number_stays() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);
        let phone = engine.advance(&photos, &text("done"), &ctx_with(&["a"])).to;

        let with_code = engine.advance(&phone, &text("🇫🇮 +358"), &ctx());
        assert_eq!(
            with_code.effects,
            vec![Effect::Prompt(Prompt::AskLocalNumber { country_code: "+358".to_owned() })]
        );

        let invalid = engine.advance(&with_code.to, &text("12"), &ctx());
        assert_eq!(invalid.to, with_code.to);
        assert_eq!(invalid.effects, vec![Effect::Prompt(Prompt::InvalidPhone)]);
    }

    #[test]
    fn international_number_bypasses_country_code() {
        let engine = ConversationEngine::default();
        let photos = photos_stage(&engine);
        let phone = engine.advance(&photos, &text("done"), &ctx_with(&["a"])).to;

        let transition = engine.advance(&phone, &text("+358 40 123 4567"), &ctx());
        let draft = draft_of(&transition.effects).expect("finalize effect");
        assert_eq!(draft.phone, "+358401234567");
    }
}
