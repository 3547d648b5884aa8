pub mod conversation;
pub mod definition;
pub mod refresh_token;
pub mod user;
