//! Error taxonomy, identifiers and small numeric helpers shared by every layer.

/// Error taxonomy and result aliases.
pub mod error;
/// Opaque scene and entity identifiers.
pub mod ids;
pub(crate) mod math;
