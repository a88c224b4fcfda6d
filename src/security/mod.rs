//! Sessions and access control.
//!
//! - [`session`]: signed cookie sessions ([`SessionStore`], [`Session`]).
//! - [`auth`]: the [`User`] contract, flat [`Role`]s and [`authorize`].

pub mod auth;
pub mod session;

pub use auth::{AuthzError, GUEST, Role, User, authorize, decode_destination};
pub use session::{Session, SessionError, SessionStore};
