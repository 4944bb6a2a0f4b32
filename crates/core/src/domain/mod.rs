pub mod lead;
pub mod offer;
pub mod photo;

pub use lead::{
    Completeness, Coordinates, Lead, LeadDraft, LeadId, LeadOverview, LeadStatus, Locale,
    TransportMethod, UserId,
};
pub use offer::{format_amount, Offer, OfferId, OfferStatus};
pub use photo::{MediaRef, Photo, PhotoSessionToken};
