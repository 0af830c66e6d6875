//! Guardrails: policy checks bracketing every model call.
//!
//! Input checks run before generation (prompt injection, domain relevance),
//! output checks after it (PII leakage, forbidden phrasing, empty response).
//! Each check is a pure `text -> verdict` function; composition order and
//! retry semantics live in the turn state machine.

#![warn(missing_docs, clippy::pedantic)]

pub mod checks;
pub mod domain;
mod error;
pub mod response;

pub use checks::{
    ForbiddenPhrase, GuardrailVerdict, InjectionScreen, OutputScreen, INJECTION_REFUSAL,
};
pub use domain::{DomainClassifier, DomainClassifierConfig, DOMAIN_REFUSAL};
pub use error::{GuardError, GuardResult};
pub use response::{DisclaimerRule, FinalizedResponse, ResponsePolicy, SAFE_RESPONSE};
