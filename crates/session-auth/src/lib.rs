//! Session credentials for the calendar backend
//!
//! Owns everything about the app's own session token (the JWT issued at
//! sign-in), as opposed to the OAuth tokens of linked calendar providers:
//! 1. `Credentials` are created at sign-in and saved via `TokenStore::save()`
//! 2. The client reads the access token for every request
//! 3. `token::refresh_access_token()` exchanges the refresh token for a new
//!    access token, persisted via `TokenStore::store_access_token()`
//! 4. `token::logout()` + `TokenStore::clear()` destroy the session
//!
//! `FileTokenStore` persists to a 0600 JSON file; `MemoryTokenStore` keeps
//! credentials in process only.

pub mod constants;
pub mod credentials;
pub mod error;
pub mod store;
pub mod token;

pub use constants::*;
pub use credentials::{Credentials, FileTokenStore};
pub use error::{Error, Result};
pub use store::{MemoryTokenStore, StoreFuture, TokenStore};
pub use token::{RefreshResponse, logout, refresh_access_token};
