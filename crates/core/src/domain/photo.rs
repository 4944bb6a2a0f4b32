use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::LeadId;

/// Transport-issued handle for an uploaded image (a Telegram file id).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaRef(pub String);

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keys the ephemeral photo accumulation of one intake run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoSessionToken(pub String);

impl PhotoSessionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for PhotoSessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub lead_id: LeadId,
    pub media_ref: MediaRef,
    pub local_path: Option<String>,
}
