//! scout-providers: language-model providers for festival-scout
//!
//! Implementations of `scout_core::Provider` that the research loop talks to.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
