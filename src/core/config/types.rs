use thiserror::Error;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) server: ServerSettings,
    pub(super) runtime: RuntimeSettings,
    pub(super) api: ApiSettings,
    pub(super) database: DatabaseSettings,
    pub(super) telegram: TelegramSettings,
    pub(super) schedule: ScheduleSettings,
    pub(super) notifications: NotificationSettings,
    pub(super) delivery_retry: RetrySettings,
    pub(super) outbound_retry: RetrySettings,
    pub(super) reporting: ReportingSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    pub(super) host: ServerHost,
    pub(super) port: ServerPort,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) api_v1_str: String,
}

#[derive(Debug, Clone)]
pub(crate) struct DatabaseSettings {
    pub(crate) postgres_server: String,
    pub(crate) postgres_port: u16,
    pub(crate) postgres_user: String,
    pub(crate) postgres_password: String,
    pub(crate) postgres_db: String,
    pub(crate) database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct TelegramSettings {
    pub(crate) token: String,
    pub(crate) api_base: String,
    pub(crate) timeout_seconds: u64,
    pub(crate) connect_timeout_seconds: u64,
}

/// Timer periods and batch bounds for the background passes.
#[derive(Debug, Clone)]
pub(crate) struct ScheduleSettings {
    pub(crate) webhook_interval_seconds: u64,
    pub(crate) deadline_interval_minutes: u64,
    pub(crate) delivery_interval_seconds: u64,
    pub(crate) reminder_trigger_hour: u8,
    pub(crate) webhook_batch_size: u32,
    pub(crate) notification_batch_size: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct NotificationSettings {
    pub(crate) deadline_warning_hours: u32,
    pub(crate) reminder_enabled: bool,
    pub(crate) reminder_days_back: u32,
    pub(crate) display_utc_offset_hours: i8,
    pub(crate) platform_base_url: String,
    pub(crate) send_pause_ms: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct RetrySettings {
    pub(crate) max_retries: u32,
    pub(crate) base_delay_seconds: f64,
    pub(crate) max_delay_seconds: f64,
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct ReportingSettings {
    pub(crate) api_token: String,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHost(pub(super) String);

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPort(pub(super) u16);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid server host: {0}")]
    InvalidHost(String),
    #[error("invalid server port: {0}")]
    InvalidPort(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl DatabaseSettings {
    pub(crate) fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl RetrySettings {
    pub(crate) fn base_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.base_delay_seconds)
    }

    pub(crate) fn max_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.max_delay_seconds)
    }
}

impl ServerHost {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidHost(value));
        }

        Ok(Self(value))
    }
}

impl ServerPort {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        let parsed: u16 = value.parse().map_err(|_| ConfigError::InvalidPort(value.clone()))?;
        if parsed == 0 {
            return Err(ConfigError::InvalidPort(value));
        }

        Ok(Self(parsed))
    }
}
