use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Per-endpoint sliding-window limits. Windows are fixed (a minute for
/// login/password, an hour for deletion); only the max counts are tunable.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_max_per_minute: u32,
    pub password_max_per_minute: u32,
    pub deletion_max_per_hour: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Base URL used to build password-reset links in outbound mail.
    pub public_base_url: String,
    pub reset_token_ttl_secs: i64,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    pub smtp: SmtpConfig,
    pub rate_limits: RateLimitConfig,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "membergate".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "membergate-users".into()),
            ttl_minutes: env_parsed("JWT_TTL_MINUTES", 60 * 24 * 7),
        };
        let stripe = StripeConfig {
            secret_key: std::env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".into()),
            timeout_secs: env_parsed("STRIPE_TIMEOUT_SECS", 10),
        };
        let smtp = SmtpConfig {
            host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".into()),
            port: env_parsed("SMTP_PORT", 587),
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            from: std::env::var("SMTP_FROM").unwrap_or_else(|_| "no-reply@membergate.local".into()),
        };
        let rate_limits = RateLimitConfig {
            login_max_per_minute: env_parsed("RATE_LIMIT_LOGIN_PER_MINUTE", 10),
            password_max_per_minute: env_parsed("RATE_LIMIT_PASSWORD_PER_MINUTE", 5),
            deletion_max_per_hour: env_parsed("RATE_LIMIT_DELETION_PER_HOUR", 3),
        };
        Ok(Self {
            database_url,
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            reset_token_ttl_secs: env_parsed("RESET_TOKEN_TTL_SECS", 3600),
            jwt,
            stripe,
            smtp,
            rate_limits,
        })
    }
}
