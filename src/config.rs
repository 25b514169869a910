use crate::transport::TlsPolicy;
use std::time::Duration;
use thiserror::Error;

pub const PRODUCTION_URL: &str = "wss://rtc.telnyx.com";
pub const DEVELOPMENT_URL: &str = "wss://rtcdev.telnyx.com";

const DEFAULT_USER_AGENT: &str = concat!("verto-rtc-rust-", env!("CARGO_PKG_VERSION"));

/// Which signaling server to talk to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Production,
    Development,
    Custom(String),
}

impl Environment {
    pub fn url(&self) -> &str {
        match self {
            Self::Production => PRODUCTION_URL,
            Self::Development => DEVELOPMENT_URL,
            Self::Custom(url) => url,
        }
    }

    pub fn is_production(&self) -> bool {
        match self {
            Self::Production => true,
            Self::Development => false,
            Self::Custom(url) => url.trim_end_matches('/') == PRODUCTION_URL,
        }
    }

    /// STUN/TURN servers matching the environment. Custom endpoints get the
    /// production set.
    pub fn default_ice_servers(&self) -> Vec<IceServer> {
        let (stun, turn) = match self {
            Self::Development => ("stundev.telnyx.com", "turndev.telnyx.com"),
            _ => ("stun.telnyx.com", "turn.telnyx.com"),
        };
        vec![
            IceServer::new(vec![format!("stun:{stun}:3478")]),
            IceServer::new(vec![
                format!("turn:{turn}:3478?transport=udp"),
                format!("turn:{turn}:3478?transport=tcp"),
            ])
            .with_credentials("testuser", "testpassword"),
        ]
    }
}

/// Login credentials. Without credentials the client connects anonymously
/// and never establishes a session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    SipUser { user: String, password: String },
    Token(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SipUser { user, .. } => f
                .debug_struct("SipUser")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Self::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Exponential backoff for reconnect attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub auto_reconnect: bool,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepAliveConfig {
    pub interval: Duration,
    /// How long a ping may stay unanswered before the link is declared dead.
    pub timeout: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(10),
        }
    }
}

/// A STUN/TURN server handed to the media engine untouched.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
        }
    }

    pub fn with_credentials(mut self, username: &str, credential: &str) -> Self {
        self.username = Some(username.to_string());
        self.credential = Some(credential.to_string());
        self
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub environment: Environment,
    pub tls: TlsPolicy,
    pub credentials: Option<Credentials>,
    pub user_agent: String,
    pub reconnect: ReconnectPolicy,
    pub keepalive: KeepAliveConfig,
    pub request_timeout: Duration,
    pub ice_servers: Vec<IceServer>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            tls: TlsPolicy::Strict,
            credentials: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            reconnect: ReconnectPolicy::default(),
            keepalive: KeepAliveConfig::default(),
            request_timeout: Duration::from_secs(30),
            ice_servers: Environment::default().default_ice_servers(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("permissive TLS is not allowed for the production endpoint")]
    PermissiveTlsOnProduction,
    #[error("credentials are empty")]
    EmptyCredentials,
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
    #[error("invalid reconnect policy: {0}")]
    InvalidReconnectPolicy(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

impl ClientConfig {
    pub fn with_environment(environment: Environment) -> Self {
        Self {
            ice_servers: environment.default_ice_servers(),
            environment,
            ..Self::default()
        }
    }

    pub fn url(&self) -> &str {
        self.environment.url()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls == TlsPolicy::Permissive && self.environment.is_production() {
            return Err(ConfigError::PermissiveTlsOnProduction);
        }

        let url = self.url();
        if !(url.starts_with("wss://") || url.starts_with("ws://")) {
            return Err(ConfigError::InvalidUrl(url.to_string()));
        }

        match &self.credentials {
            Some(Credentials::SipUser { user, password })
                if user.trim().is_empty() || password.is_empty() =>
            {
                return Err(ConfigError::EmptyCredentials);
            }
            Some(Credentials::Token(token)) if token.trim().is_empty() => {
                return Err(ConfigError::EmptyCredentials);
            }
            _ => {}
        }

        let policy = &self.reconnect;
        if policy.initial_delay.is_zero() {
            return Err(ConfigError::InvalidReconnectPolicy(
                "initial delay must be non-zero",
            ));
        }
        if !(policy.multiplier.is_finite() && policy.multiplier >= 1.0) {
            return Err(ConfigError::InvalidReconnectPolicy(
                "multiplier must be at least 1.0",
            ));
        }
        if policy.max_delay < policy.initial_delay {
            return Err(ConfigError::InvalidReconnectPolicy(
                "max delay is shorter than the initial delay",
            ));
        }

        if self.keepalive.interval.is_zero() {
            return Err(ConfigError::ZeroDuration("keep-alive interval"));
        }
        if self.keepalive.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("keep-alive timeout"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("request timeout"));
        }
        Ok(())
    }
}
