//! Inbound provider events - normalization, signatures and engagement

mod engagement;
mod normalizer;
mod signature;

pub use engagement::{
    EngagementScore, EngagementSignal, EngagementTracker, InMemoryEngagementTracker,
};
pub use normalizer::{EventNormalizer, ResendEventName, SendGridEventName, UnrecognizedPayload};
pub use signature::{sign_webhook, verify_webhook_signature, SignatureError, SignatureHeaders};
