pub mod errors;
pub mod game;
pub mod messages;
pub mod user;

// Re-export all types
pub use errors::*;
pub use game::*;
pub use messages::*;
pub use user::*;

/// Ids are assigned by the database (users) and the session registry (games).
pub type UserId = u32;
pub type GameId = u32;
