mod definitions;
mod user;

pub use definitions::{cmd_definitions_list, cmd_definitions_seed};
pub use user::{cmd_user_add, cmd_user_list};
