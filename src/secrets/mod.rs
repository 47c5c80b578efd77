//! Secret lookup and output redaction
//!
//! - [`SecretProvider`] - Resolves `secrets.<NAME>` references
//! - [`OutputMasker`] - Replaces known secret values in output with `***`

pub mod mask;
pub mod provider;

pub use mask::{OutputMasker, DEFAULT_MASK};
pub use provider::{EnvSecrets, SecretProvider, StaticSecrets, ENV_SECRET_PREFIX};
