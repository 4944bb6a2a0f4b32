pub mod engine;
pub mod states;
pub mod validate;

pub use engine::{ConversationEngine, IntakeLimits};
pub use states::{
    Effect, InboundEvent, OwnerAnswer, OwnerDetails, PhotoIntake, Prompt, Selection, Stage,
    StageContext, StageTag, TransportDetails, Transition, VehicleDetails,
};
