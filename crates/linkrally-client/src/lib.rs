//! HTTP surface of the race backend plus the canonical title resolver.
//!
//! `BackendApi` is the seam the engine depends on; `HttpBackend` is the
//! reqwest implementation. `CanonicalTitleResolver` sits on top of either,
//! deduplicating and caching canonical-title lookups.

pub mod backend;
pub mod config;
pub mod resolver;

pub use backend::{
    BackendApi, ChatRequest, ChatResponse, HttpBackend, MoveValidation, MoveValidationRequest,
    TokenUsage,
};
pub use config::BackendConfig;
pub use resolver::CanonicalTitleResolver;
