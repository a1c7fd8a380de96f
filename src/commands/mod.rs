//! Command implementations

pub mod info;
pub mod serve;
pub mod util;

// Re-export command functions
pub use info::*;
pub use serve::*;
pub use util::*;
