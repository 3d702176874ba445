use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_store_backend,
    parse_thresholds, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    ApiSettings, ConfigError, RedisSettings, RunnerSettings, RuntimeSettings, Settings,
    StoreBackendKind, StoreSettings, SubmitSettings, TelemetrySettings, TimerSettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment =
            parse_environment(env_optional("PICRETE_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("PICRETE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let base_url = env_or_default("SESSION_API_BASE_URL", "http://localhost:8000/api/v1")
            .trim_end_matches('/')
            .to_string();
        let token = env_or_default("SESSION_API_TOKEN", "");
        let request_timeout_seconds = parse_u64(
            "SESSION_REQUEST_TIMEOUT_SECONDS",
            env_or_default("SESSION_REQUEST_TIMEOUT_SECONDS", "10"),
        )?;

        let store_backend = parse_store_backend(env_or_default("SESSION_STORE_BACKEND", "file"))?;
        let store_dir = env_or_default("SESSION_STORE_DIR", ".picrete/sessions");

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let tick_interval_ms =
            parse_u64("TICK_INTERVAL_MS", env_or_default("TICK_INTERVAL_MS", "1000"))?;
        let auto_save_debounce_ms =
            parse_u64("AUTO_SAVE_DEBOUNCE_MS", env_or_default("AUTO_SAVE_DEBOUNCE_MS", "2000"))?;
        let auto_save_interval_seconds = parse_u64(
            "AUTO_SAVE_INTERVAL_SECONDS",
            env_or_default("AUTO_SAVE_INTERVAL_SECONDS", "10"),
        )?;
        let warning_thresholds = parse_thresholds(env_optional("WARNING_THRESHOLDS"))?;
        let reveal_unlock_seconds =
            parse_u64("REVEAL_UNLOCK_SECONDS", env_or_default("REVEAL_UNLOCK_SECONDS", "300"))?;

        let max_attempts =
            parse_u32("SUBMIT_MAX_ATTEMPTS", env_or_default("SUBMIT_MAX_ATTEMPTS", "5"))?;
        let backoff_base_ms =
            parse_u64("SUBMIT_BACKOFF_BASE_MS", env_or_default("SUBMIT_BACKOFF_BASE_MS", "1000"))?;
        let grace_period_seconds = parse_u64(
            "SUBMIT_GRACE_PERIOD_SECONDS",
            env_or_default("SUBMIT_GRACE_PERIOD_SECONDS", "300"),
        )?;
        let answer_max_attempts =
            parse_u32("ANSWER_MAX_ATTEMPTS", env_or_default("ANSWER_MAX_ATTEMPTS", "2"))?;

        let log_level = env_or_default("PICRETE_LOG_LEVEL", "info");
        let json = env_optional("PICRETE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { base_url, token, request_timeout_seconds },
            store: StoreSettings { backend: store_backend, dir: store_dir },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            timers: TimerSettings {
                tick_interval_ms,
                auto_save_debounce_ms,
                auto_save_interval_seconds,
                warning_thresholds,
                reveal_unlock_seconds,
            },
            submit: SubmitSettings {
                max_attempts,
                backoff_base_ms,
                grace_period_seconds,
                answer_max_attempts,
            },
            runner: RunnerSettings {
                session_id: env_optional("SESSION_ID"),
                user_id: env_optional("SESSION_USER_ID"),
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn store(&self) -> &StoreSettings {
        &self.store
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn timers(&self) -> &TimerSettings {
        &self.timers
    }

    pub(crate) fn submit(&self) -> &SubmitSettings {
        &self.submit
    }

    pub(crate) fn runner(&self) -> &RunnerSettings {
        &self.runner
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("TICK_INTERVAL_MS", self.timers.tick_interval_ms),
            ("AUTO_SAVE_DEBOUNCE_MS", self.timers.auto_save_debounce_ms),
            ("AUTO_SAVE_INTERVAL_SECONDS", self.timers.auto_save_interval_seconds),
            ("SESSION_REQUEST_TIMEOUT_SECONDS", self.api.request_timeout_seconds),
            ("SUBMIT_MAX_ATTEMPTS", u64::from(self.submit.max_attempts)),
            ("ANSWER_MAX_ATTEMPTS", u64::from(self.submit.answer_max_attempts)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue { field, value: "0".to_string() });
            }
        }

        if self.timers.auto_save_debounce_ms >= self.timers.auto_save_interval_seconds * 1000 {
            return Err(ConfigError::InvalidValue {
                field: "AUTO_SAVE_DEBOUNCE_MS",
                value: self.timers.auto_save_debounce_ms.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "SESSION_API_BASE_URL",
                value: self.api.base_url.clone(),
            });
        }
        if self.store.backend == StoreBackendKind::Memory {
            return Err(ConfigError::InvalidValue {
                field: "SESSION_STORE_BACKEND",
                value: self.store.backend.as_str().to_string(),
            });
        }
        if self.api.token.is_empty() {
            return Err(ConfigError::Missing("SESSION_API_TOKEN"));
        }

        Ok(())
    }
}
