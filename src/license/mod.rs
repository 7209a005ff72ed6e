//! License strings as they appear in package metadata.
//!
//! - [`spdx`] normalizes common non-SPDX names and recognizes LICENSE file texts.
//! - [`expression`] flattens SPDX expressions into the comma-joined form used
//!   by report rows.

pub mod expression;
pub mod spdx;

pub use expression::DeclaredLicense;
