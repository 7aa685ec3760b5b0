//! Runtime environment detection.
//!
//! Provides a single source of truth for which relay deployment the agent
//! talks to, based on the `TERMLY_ENV` environment variable.
//!
//! # Usage
//!
//! ```rust
//! use termly::env::Environment;
//!
//! let env = Environment::current();
//! println!("relay: {}", env.default_server_url());
//! ```
//!
//! # Environment Variable
//!
//! Set `TERMLY_ENV` to one of:
//! - `local` - Relay on `localhost:3000`
//! - `development` or `dev` - Development deployment
//! - (anything else or unset) - Production

/// Relay deployment selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production relay (default).
    Production,
    /// Development relay.
    Development,
    /// Relay running on this machine.
    Local,
}

impl Environment {
    /// Detect the current environment from `TERMLY_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("TERMLY_ENV").ok().as_deref())
    }

    /// Map a `TERMLY_ENV` value to an environment.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("local") => Self::Local,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Default WebSocket relay URL.
    #[must_use]
    pub fn default_server_url(self) -> &'static str {
        match self {
            Self::Production => "wss://api.termly.dev",
            Self::Development => "wss://dev-api.termly.dev",
            Self::Local => "ws://localhost:3000",
        }
    }

    /// Default HTTP API URL (pairing registration).
    #[must_use]
    pub fn default_api_url(self) -> &'static str {
        match self {
            Self::Production => "https://api.termly.dev",
            Self::Development => "https://dev-api.termly.dev",
            Self::Local => "http://localhost:3000",
        }
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Local => write!(f, "local"),
        }
    }
}
