//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod analysis;
pub mod assets;
pub mod bills;
pub mod events;
pub mod health;
pub mod rules;

// Re-export all handlers for use in router
pub use analysis::*;
pub use assets::*;
pub use bills::*;
pub use events::*;
pub use health::*;
pub use rules::*;
