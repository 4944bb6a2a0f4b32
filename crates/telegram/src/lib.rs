//! Telegram interface for romupunkt
//!
//! This crate turns Bot API updates into intake, negotiation and admin work:
//! - **Transport** (`bot`) - teloxide long polling and message delivery
//! - **Runner** (`runner`) - per-user lanes with reconnect backoff
//! - **Dispatcher** (`dispatcher`) - session-locked routing and the intake flow
//! - **Negotiation** (`negotiation`) - operator offers, answers and counter-offers
//! - **Admin** (`admin`) - lead listing, archive, delete and lead cards
//! - **Copy** (`templates`, `keyboards`) - localized text and inline keyboards
//!
//! # Architecture
//!
//! ```text
//! getUpdates → PollingRunner → lane per user → Dispatcher → core engine
//!                                                   ↓
//!                               Messenger ← Outbox (flushed after unlock)
//! ```

pub mod admin;
pub mod bot;
pub mod callbacks;
pub mod commands;
pub mod dispatcher;
pub mod events;
pub mod keyboards;
pub mod messenger;
pub mod negotiation;
pub mod outbox;
pub mod runner;
pub mod templates;

pub use bot::TelegramTransport;
pub use dispatcher::{DispatchSettings, Dispatcher, HandleOutcome, Stores};
pub use events::{Inbound, InboundKind};
pub use messenger::{DeliveryError, Messenger, RecordingMessenger};
pub use runner::{PollingRunner, ReconnectPolicy, RunnerError, TransportError, UpdateSource};
pub use templates::{TemplateError, Templates};
