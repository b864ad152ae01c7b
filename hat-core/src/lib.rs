pub mod engine;
pub mod game;
pub mod signal;
pub mod store;

// Re-export main components
pub use engine::*;
pub use game::*;
pub use signal::*;
pub use store::*;
