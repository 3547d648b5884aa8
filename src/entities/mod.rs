pub mod prelude;

pub mod conversations;
pub mod definitions;
pub mod messages;
pub mod refresh_tokens;
pub mod users;
