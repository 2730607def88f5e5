// Library root: domain logic for the Keystone account service.
//
// Everything that does not depend on HTTP lives here so the services can be
// exercised directly from integration tests and from the CLI.

pub mod auth_service;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod model;
pub mod password;
pub mod token;
pub mod user_service;
pub mod validate;

pub use auth_service::{AccessToken, AuthService, TokenPair};
pub use cache::TtlCache;
pub use config::Config;
pub use db::Database;
pub use error::{ServiceError, ServiceResult};
pub use mailer::{Email, LogMailer, Mailer, MemoryMailer};
pub use model::{Gender, User, UserProfile, UserStatus, UserType};
pub use user_service::UserService;
