//! Conversation layer for building a travel expense report.
//!
//! The crate turns free text into cart items:
//! - `control` recognizes steering utterances (reset, change, submit, ...)
//! - `slots` extracts item fields from text and asks for what is missing
//! - `identity` resolves the requester's email and department
//! - `session` owns one conversation and drives pricing, coding and submission
//!
//! Amounts and account codes are never guessed. Pricing comes from the per diem
//! lookup or the configured mileage rate, and coding from the expense code lookup.

pub mod control;
pub mod identity;
pub mod session;
pub mod slots;

pub use control::{recognize, ControlIntent};
pub use identity::{DepartmentResolution, DepartmentSource, IdentityError, IdentityResolver};
pub use session::{
    Backends, ConversationContext, ConversationSession, PendingQuestion, Reply, SessionSettings,
    TurnIssue,
};
pub use slots::{CompletedSlots, SlotField, SlotFiller, SlotIssue, SlotValues, StructuredSlots};
