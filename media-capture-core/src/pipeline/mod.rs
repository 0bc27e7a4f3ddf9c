//! Pipeline graph construction over a native media framework.

pub mod encoding;
pub mod graph;
pub mod memory;
pub mod message;
