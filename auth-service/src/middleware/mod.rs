pub mod access_token;
pub mod csrf;
pub mod session;

pub use access_token::access_token_middleware;
pub use csrf::{csrf_middleware, CSRF_HEADER};
pub use session::{session_middleware, CurrentSession, CurrentUser};
