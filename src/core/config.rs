mod parsing;
mod settings;
mod types;

pub(crate) use types::{ConfigError, Settings, StoreBackendKind};

#[cfg(test)]
mod tests {
    use super::{Settings, StoreBackendKind};
    use crate::test_support;

    #[tokio::test]
    async fn load_uses_defaults_in_test_env() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.store().backend, StoreBackendKind::Memory);
        assert_eq!(settings.timers().tick_interval_ms, 1000);
        assert_eq!(settings.timers().auto_save_interval_seconds, 10);
        assert_eq!(
            settings.timers().warning_thresholds,
            vec![("300".to_string(), 300), ("60".to_string(), 60)]
        );
        assert_eq!(settings.submit().grace_period_seconds, 300);
        assert_eq!(settings.runtime().environment.as_str(), "test");
    }

    #[tokio::test]
    async fn load_rejects_debounce_longer_than_periodic_flush() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("AUTO_SAVE_DEBOUNCE_MS", "20000");

        let result = Settings::load();
        std::env::remove_var("AUTO_SAVE_DEBOUNCE_MS");

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn strict_config_requires_https_backend() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PICRETE_STRICT_CONFIG", "1");
        std::env::set_var("SESSION_STORE_BACKEND", "file");
        std::env::set_var("SESSION_API_TOKEN", "token");

        let result = Settings::load();
        std::env::set_var("PICRETE_STRICT_CONFIG", "0");
        std::env::set_var("SESSION_STORE_BACKEND", "memory");
        std::env::remove_var("SESSION_API_TOKEN");

        assert!(result.is_err());
    }
}
