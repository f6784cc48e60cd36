//! Core types and error definitions for the Cascade gateway.
//!
//! This crate provides the foundational types shared across all Cascade crates,
//! including the error taxonomy and the chat request representation.
//!
//! # Main types
//!
//! - [`CascadeError`]: Caller-visible error enum (configuration, validation, exhaustion).
//! - [`CascadeResult`]: Convenience alias for `Result<T, CascadeError>`.
//! - [`ProviderError`]: Failure of a single upstream attempt.
//! - [`AttemptFailure`]: One entry of the ordered failure history of a cascade.
//! - [`Role`]: Message role (system, user, assistant).
//! - [`Message`]: A single chat message, plain text or multi-part.
//! - [`ChatRequest`]: An inbound "create chat completion" request.
//! - [`Modality`]: Text-only vs. media-bearing classification of a request.

pub mod error;
pub mod message;

pub use error::{AttemptFailure, CascadeError, CascadeResult, FailureKind, ProviderError};
pub use message::{ChatRequest, ContentPart, MediaRef, Message, MessageContent, Modality, Role};
