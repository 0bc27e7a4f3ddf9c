//! Ambisonic decoding into speaker layouts.

pub mod decoder;
pub mod filter;
pub mod layout;
