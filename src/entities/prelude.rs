pub use super::conversations::Entity as Conversations;
pub use super::definitions::Entity as Definitions;
pub use super::messages::Entity as Messages;
pub use super::refresh_tokens::Entity as RefreshTokens;
pub use super::users::Entity as Users;
