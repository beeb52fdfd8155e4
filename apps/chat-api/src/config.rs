/// Chat API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. When unset the server runs on the
    /// in-memory store.
    pub database_url: Option<String>,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Origins allowed by CORS. `*` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Per-connection outbound queue depth. A connection whose queue is full
    /// is treated as failed and evicted.
    pub outbound_buffer: usize,
    /// HS256 secret shared with the auth service that issues access tokens.
    pub jwt_secret: String,
    pub push: PushConfig,
}

/// Secret used when `SECRET_KEY` is unset. Only fit for local runs.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Web push settings.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Base64url VAPID public key handed to browsers.
    pub vapid_public_key: Option<String>,
    /// Path to the PEM-encoded EC private key used to sign VAPID tokens.
    pub vapid_private_key_pem: Option<String>,
    /// Contact for the VAPID `sub` claim (e.g. `mailto:ops@example.com`).
    pub vapid_email: Option<String>,
    /// Number of push worker tasks.
    pub workers: usize,
    /// Bounded push job queue size.
    pub queue_capacity: usize,
    /// `TTL` header sent with each push, in seconds.
    pub ttl_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_public_key: None,
            vapid_private_key_pem: None,
            vapid_email: None,
            workers: 4,
            queue_capacity: 1024,
            ttl_secs: 86_400,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = PushConfig::default();
        Self {
            database_url: optional_var("DATABASE_URL"),
            port: parsed_var("PORT").unwrap_or(8000),
            allowed_origins: optional_var("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]),
            outbound_buffer: parsed_var("OUTBOUND_BUFFER").unwrap_or(256),
            jwt_secret: optional_var("SECRET_KEY").unwrap_or_else(|| DEV_JWT_SECRET.to_string()),
            push: PushConfig {
                vapid_public_key: optional_var("VAPID_PUBLIC_KEY"),
                vapid_private_key_pem: optional_var("VAPID_PRIVATE_KEY_PEM"),
                vapid_email: optional_var("VAPID_EMAIL"),
                workers: parsed_var("PUSH_WORKERS").unwrap_or(defaults.workers),
                queue_capacity: parsed_var("PUSH_QUEUE_CAPACITY")
                    .unwrap_or(defaults.queue_capacity),
                ttl_secs: parsed_var("PUSH_TTL_SECS").unwrap_or(defaults.ttl_secs),
            },
        }
    }

    /// Configuration for tests and local runs: in-memory store, no VAPID.
    pub fn local() -> Self {
        Self {
            database_url: None,
            port: 0,
            allowed_origins: vec!["*".to_string()],
            outbound_buffer: 256,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            push: PushConfig::default(),
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Read a variable that must be present, panicking with a descriptive message.
pub fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
