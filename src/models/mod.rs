pub mod collection;
pub mod token;

pub use collection::{TokenCollection, SCHEMA_VERSION};
pub use token::{EmptyPermissionPolicy, NewToken, Token, TokenStatus, TokenUpdate};
