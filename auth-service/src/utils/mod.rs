pub mod cookies;
pub mod password;
pub mod validation;

pub use cookies::Notification;
pub use password::{HashParams, Password, PasswordError, PasswordHasher};
pub use validation::{wants_json, ValidatedInput, ValidatedJson};
