use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use crate::models::Program;
use crate::programs::{AttendanceSource, ProgramProfiles};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
    pub auth: AuthConfig,
    pub programs: ProgramProfiles,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(&var_or("APP_ENV", "development"));

        let host = var_or("APP_HOST", "127.0.0.1");
        let port = var_or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = var_or("APP_LOG_LEVEL", "info");

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            max_connections: parse_number("DB_MAX_CONNECTIONS", 5)?,
            query_timeout: Duration::from_millis(parse_number("DB_QUERY_TIMEOUT_MS", 5_000)?),
        };

        let jwt_secret = env::var("JWT_SECRET").ok().filter(|secret| !secret.is_empty());
        if environment == AppEnvironment::Production && jwt_secret.is_none() {
            return Err(ConfigError::MissingJwtSecret);
        }

        let mut programs = ProgramProfiles::default();
        for program in Program::ALL {
            let name = attendance_var(program);
            if let Ok(value) = env::var(&name) {
                let source = value
                    .parse::<AttendanceSource>()
                    .map_err(|_| ConfigError::InvalidAttendance { name, value })?;
                programs.set_attendance(program, source);
            }
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            database,
            telemetry: TelemetryConfig { log_level },
            auth: AuthConfig { jwt_secret },
            programs,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(default),
    }
}

fn attendance_var(program: Program) -> String {
    format!("{}_ATTENDANCE", program.slug().to_ascii_uppercase())
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    /// Upper bound on a single statement, including pool acquisition.
    pub query_timeout: Duration,
}

impl DatabaseConfig {
    pub fn require_url(&self) -> Result<&str, ConfigError> {
        self.url.as_deref().ok_or(ConfigError::MissingDatabaseUrl)
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16")]
    InvalidPort,
    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost { source: std::net::AddrParseError },
    #[error("{name} must be a non-negative integer, got `{value}`")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} must be `status` or `flag`, got `{value}`")]
    InvalidAttendance { name: String, value: String },
    #[error("DATABASE_URL must point at the admissions MySQL database")]
    MissingDatabaseUrl,
    #[error("JWT_SECRET is required when APP_ENV=production")]
    MissingJwtSecret,
}
