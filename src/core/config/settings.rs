use time::UtcOffset;

use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_i8, parse_seconds,
    parse_u16, parse_u32, parse_u64, parse_u8,
};
use super::types::{
    ApiSettings, ConfigError, DatabaseSettings, NotificationSettings, ReportingSettings,
    RetrySettings, RuntimeSettings, ScheduleSettings, ServerHost, ServerPort, ServerSettings,
    Settings, TelegramSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("MENTOR_NOTIFY_HOST", "0.0.0.0");
        let port = env_or_default("MENTOR_NOTIFY_PORT", "8000");

        let environment = parse_environment(
            env_optional("MENTOR_NOTIFY_ENV").or_else(|| env_optional("SERVER_ENV")),
        );
        let strict_config = env_optional("MENTOR_NOTIFY_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "mentor_notify");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "mentor_notify");
        let database_url = env_optional("DATABASE_URL");

        let telegram_token = env_or_default("TG_TOKEN", "");
        let telegram_api_base = env_or_default("TELEGRAM_API_BASE", "https://api.telegram.org");
        let http_timeout = parse_u64("HTTP_TIMEOUT", env_or_default("HTTP_TIMEOUT", "30"))?;
        let http_connect_timeout =
            parse_u64("HTTP_CONNECT_TIMEOUT", env_or_default("HTTP_CONNECT_TIMEOUT", "10"))?;

        let webhook_interval_seconds = parse_u64(
            "WEBHOOK_PROCESSING_INTERVAL",
            env_or_default("WEBHOOK_PROCESSING_INTERVAL", "30"),
        )?;
        let deadline_interval_minutes = parse_u64(
            "DEADLINE_CHECK_INTERVAL_MINUTES",
            env_or_default("DEADLINE_CHECK_INTERVAL_MINUTES", "60"),
        )?;
        let delivery_interval_seconds = parse_u64(
            "NOTIFICATION_SEND_INTERVAL",
            env_or_default("NOTIFICATION_SEND_INTERVAL", "15"),
        )?;
        let reminder_trigger_hour =
            parse_u8("REMINDER_TRIGGER_HOUR", env_or_default("REMINDER_TRIGGER_HOUR", "12"))?;
        let webhook_batch_size =
            parse_u32("WEBHOOK_BATCH_SIZE", env_or_default("WEBHOOK_BATCH_SIZE", "50"))?;
        let notification_batch_size =
            parse_u32("NOTIFICATION_BATCH_SIZE", env_or_default("NOTIFICATION_BATCH_SIZE", "20"))?;

        let deadline_warning_hours =
            parse_u32("DEADLINE_WARNING_HOURS", env_or_default("DEADLINE_WARNING_HOURS", "36"))?;
        let reminder_enabled =
            env_optional("REMINDER_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);
        let reminder_days_back = parse_u32(
            "REMINDER_ANALYSIS_DAYS_BACK",
            env_or_default("REMINDER_ANALYSIS_DAYS_BACK", "2"),
        )?;
        let display_utc_offset_hours =
            parse_i8("DISPLAY_UTC_OFFSET_HOURS", env_or_default("DISPLAY_UTC_OFFSET_HOURS", "3"))?;
        let platform_base_url =
            env_or_default("PLATFORM_BASE_URL", "https://strongmanager.ru/teach/control/stat");
        let send_pause_ms = parse_u64("SEND_PAUSE_MS", env_or_default("SEND_PAUSE_MS", "500"))?;

        let delivery_retry = RetrySettings {
            max_retries: parse_u32(
                "NOTIFICATION_MAX_RETRIES",
                env_or_default("NOTIFICATION_MAX_RETRIES", "3"),
            )?,
            base_delay_seconds: parse_seconds(
                "NOTIFICATION_RETRY_BASE_DELAY",
                env_or_default("NOTIFICATION_RETRY_BASE_DELAY", "2.0"),
            )?,
            max_delay_seconds: parse_seconds(
                "NOTIFICATION_RETRY_MAX_DELAY",
                env_or_default("NOTIFICATION_RETRY_MAX_DELAY", "60.0"),
            )?,
            failure_threshold: parse_u32(
                "CIRCUIT_FAILURE_THRESHOLD",
                env_or_default("CIRCUIT_FAILURE_THRESHOLD", "5"),
            )?,
            recovery_timeout_seconds: parse_u64(
                "CIRCUIT_RECOVERY_TIMEOUT_SECONDS",
                env_or_default("CIRCUIT_RECOVERY_TIMEOUT_SECONDS", "180"),
            )?,
        };
        let outbound_retry = RetrySettings {
            max_retries: parse_u32("MAX_RETRIES", env_or_default("MAX_RETRIES", "3"))?,
            base_delay_seconds: parse_seconds(
                "RETRY_BASE_DELAY",
                env_or_default("RETRY_BASE_DELAY", "1.0"),
            )?,
            max_delay_seconds: parse_seconds(
                "RETRY_MAX_DELAY",
                env_or_default("RETRY_MAX_DELAY", "60.0"),
            )?,
            failure_threshold: delivery_retry.failure_threshold,
            recovery_timeout_seconds: delivery_retry.recovery_timeout_seconds,
        };

        let reporting_api_token = env_or_default("REPORTING_API_TOKEN", "");

        let log_level = env_or_default("MENTOR_NOTIFY_LOG_LEVEL", "info");
        let json =
            env_optional("MENTOR_NOTIFY_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { api_v1_str },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            telegram: TelegramSettings {
                token: telegram_token,
                api_base: telegram_api_base.trim_end_matches('/').to_string(),
                timeout_seconds: http_timeout,
                connect_timeout_seconds: http_connect_timeout,
            },
            schedule: ScheduleSettings {
                webhook_interval_seconds,
                deadline_interval_minutes,
                delivery_interval_seconds,
                reminder_trigger_hour,
                webhook_batch_size,
                notification_batch_size,
            },
            notifications: NotificationSettings {
                deadline_warning_hours,
                reminder_enabled,
                reminder_days_back,
                display_utc_offset_hours,
                platform_base_url: platform_base_url.trim_end_matches('/').to_string(),
                send_pause_ms,
            },
            delivery_retry,
            outbound_retry,
            reporting: ReportingSettings { api_token: reporting_api_token },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api_v1_str(&self) -> &str {
        &self.api.api_v1_str
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn telegram(&self) -> &TelegramSettings {
        &self.telegram
    }

    pub(crate) fn schedule(&self) -> &ScheduleSettings {
        &self.schedule
    }

    pub(crate) fn notifications(&self) -> &NotificationSettings {
        &self.notifications
    }

    pub(crate) fn delivery_retry(&self) -> &RetrySettings {
        &self.delivery_retry
    }

    pub(crate) fn outbound_retry(&self) -> &RetrySettings {
        &self.outbound_retry
    }

    pub(crate) fn reporting(&self) -> &ReportingSettings {
        &self.reporting
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    /// Offset used when rendering times for mentors. Validated at load.
    pub(crate) fn display_offset(&self) -> UtcOffset {
        UtcOffset::from_hms(self.notifications.display_utc_offset_hours, 0, 0)
            .unwrap_or(UtcOffset::UTC)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.webhook_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "WEBHOOK_BATCH_SIZE",
                value: String::from("0"),
            });
        }
        if self.schedule.notification_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "NOTIFICATION_BATCH_SIZE",
                value: String::from("0"),
            });
        }
        for (field, value) in [
            ("WEBHOOK_PROCESSING_INTERVAL", self.schedule.webhook_interval_seconds),
            ("DEADLINE_CHECK_INTERVAL_MINUTES", self.schedule.deadline_interval_minutes),
            ("NOTIFICATION_SEND_INTERVAL", self.schedule.delivery_interval_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue { field, value: String::from("0") });
            }
        }
        if self.schedule.reminder_trigger_hour > 23 {
            return Err(ConfigError::InvalidValue {
                field: "REMINDER_TRIGGER_HOUR",
                value: self.schedule.reminder_trigger_hour.to_string(),
            });
        }
        if UtcOffset::from_hms(self.notifications.display_utc_offset_hours, 0, 0).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "DISPLAY_UTC_OFFSET_HOURS",
                value: self.notifications.display_utc_offset_hours.to_string(),
            });
        }
        for (field, retry) in [
            ("NOTIFICATION_RETRY_BASE_DELAY", &self.delivery_retry),
            ("RETRY_BASE_DELAY", &self.outbound_retry),
        ] {
            if retry.base_delay_seconds > retry.max_delay_seconds {
                return Err(ConfigError::InvalidValue {
                    field,
                    value: retry.base_delay_seconds.to_string(),
                });
            }
        }
        if self.delivery_retry.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "CIRCUIT_FAILURE_THRESHOLD",
                value: String::from("0"),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        if self.telegram.token.is_empty() {
            return Err(ConfigError::MissingSecret("TG_TOKEN"));
        }

        if self.reporting.api_token.is_empty() {
            return Err(ConfigError::MissingSecret("REPORTING_API_TOKEN"));
        }

        Ok(())
    }
}
