//! Persisted entities and the request principal.

pub mod application;
pub mod organization;
pub mod permission;
pub mod principal;
pub mod refresh_token;
pub mod user;

pub use application::{Application, ApplicationResponse};
pub use organization::Organization;
pub use permission::{Effect, Permission, PolicyRule, Role};
pub use principal::Principal;
pub use refresh_token::RefreshToken;
pub use user::{User, UserResponse};
