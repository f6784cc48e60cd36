//! Routing and cascading dispatch for the Cascade gateway.
//!
//! A request is resolved to a [`ModelProfile`], expanded into an ordered
//! chain of [`Candidate`]s and driven through the [`Dispatcher`] until one
//! upstream answers. Streamed answers are relayed by [`relay`].

pub mod backends;
pub mod budget;
pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod provider;
pub mod relay;
pub mod resolver;
pub mod secrets;

pub use backends::openai::OpenAiCompatBackend;
pub use backends::{FragmentStream, ProviderBackend, ProviderReply, ProviderRequest};
pub use budget::BudgetError;
pub use chain::Candidate;
pub use config::{ModelProfile, RoutingConfig, RoutingTable, TableHandle};
pub use dispatcher::{CascadeOutcome, DispatchReply, DispatchState, Dispatched, Dispatcher};
pub use provider::Provider;
pub use relay::{RelayChunk, RelayStream};
pub use resolver::ResolvedProfile;
pub use secrets::{EnvSecrets, SecretSource, StaticSecrets};
