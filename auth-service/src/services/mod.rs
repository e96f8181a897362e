//! Business logic for the auth service.
//!
//! Every operation that acts on behalf of a user takes the [`Principal`]
//! explicitly; authorization decisions go through [`AccessControl`].
//!
//! [`Principal`]: crate::models::Principal

pub mod access_control;
pub mod auth;
pub mod database;
pub mod email;
pub mod error;
pub mod oauth;
pub mod org;
pub mod policy_provider;
pub mod session;
pub mod templates;
pub mod token_vault;
pub mod user;

pub use access_control::{AccessControl, PolicyModel};
pub use auth::AuthService;
pub use database::{AuthStore, Database, MockStore};
pub use email::{EmailProvider, EmailService, MockEmailService, SentEmail};
pub use error::ServiceError;
pub use oauth::OAuthService;
pub use org::OrganizationService;
pub use policy_provider::{PolicyProvider, StorePolicyProvider};
pub use session::{fingerprint, SessionData, SessionStore, SESSION_COOKIE};
pub use templates::{TemplateData, TemplateSet};
pub use token_vault::{Purpose, TokenTtls, TokenVault};
pub use user::UserService;
