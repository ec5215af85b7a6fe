//! Stratix Core - Entity Types
//!
//! Pure data structures for the progress and KPI engine. Every other crate
//! depends on this one. No I/O lives here.

mod clock;
mod config;
mod entities;
mod enums;
mod error;
mod filter;
mod identity;
mod summary;

pub use clock::*;
pub use config::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use filter::*;
pub use identity::*;
pub use summary::*;

/// Round to two decimal places, half away from zero.
///
/// Non-finite input rounds to 0.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

/// Clamp a percentage into [0, 100]. NaN becomes 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
