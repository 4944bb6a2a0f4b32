pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod negotiation;
pub mod session;

pub use conversation::{
    ConversationEngine, Effect, InboundEvent, IntakeLimits, Prompt, Selection, Stage,
    StageContext, StageTag, Transition,
};
pub use domain::{
    format_amount, Lead, LeadDraft, LeadId, LeadOverview, LeadStatus, Locale, MediaRef, Offer,
    OfferId, OfferStatus, Photo, PhotoSessionToken, TransportMethod, UserId,
};
pub use errors::{ApplicationError, DomainError, Recovery};
pub use negotiation::{
    authorize_responder, parse_price, OfferDecision, PendingAction, SlotUpdate, TextClaim,
};
pub use session::{Session, SessionStore};
