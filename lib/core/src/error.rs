//! Error handling foundation for opsflow.
//!
//! Only the `Result` alias lives here. Each crate defines its own
//! domain-specific error enums and carries them in a rootcause `Report`
//! as errors propagate across layers.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
