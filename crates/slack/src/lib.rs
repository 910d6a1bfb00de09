//! Slack side of hakatabot.
//!
//! - **Events** (`events`) - envelope normalization and the ordered listener dispatcher
//! - **Signal detector** (`detector`) - watches one channel and emits chatter signals
//! - **Feature commands** (`state_commands`) - `<prefix> optin|optout|id` for scheduled features
//! - **Signatures** (`signature`) - `x-slack-signature` verification
//! - **Web API** (`client`) - posts listener replies through `chat.postMessage`
//! - **Block Kit** (`blocks`) - reply templates
//!
//! ```text
//! Events API → normalize_event → EventDispatcher → listeners → Reply → ChatClient
//!                                                     ↓
//!                                              state documents
//! ```

pub mod blocks;
pub mod client;
pub mod commands;
pub mod detector;
pub mod events;
pub mod signature;
pub mod state_commands;

pub use client::{ChatClient, ChatClientError, PostMessageRequest, SlackWebClient};
pub use detector::{DetectorOutcome, SignalDetector};
pub use events::{
    normalize_event, DispatchReport, EventContext, EventDispatcher, EventHandler, EventLogger,
    SlackEnvelope, SlackEvent,
};
pub use signature::{SignatureError, SignatureVerifier};
pub use state_commands::FeatureCommandHandler;
