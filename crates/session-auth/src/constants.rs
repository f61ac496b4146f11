//! Backend auth routes and header values
//!
//! Paths are relative to the backend base URL. The client matches incoming
//! 401s against these to decide whether a refresh is allowed.

/// Exchanges a refresh token for a new access token
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Invalidates the session server-side
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Unauthenticated liveness check. A 401 here never triggers a refresh.
pub const HEALTH_PATH: &str = "/health";

/// Token type recorded at sign-in when the backend doesn't send one
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";
