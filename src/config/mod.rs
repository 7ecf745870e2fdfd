pub mod schema;

pub use schema::{
    AgentCacheConfig, Config, ConfigSource, HttpConfig, WidgetDefaults, AGENT_TTL_ENV,
    CONFIG_PATH_ENV, SERVER_URL_ENV,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert!(!config.server_url.is_empty());
        assert_eq!(config.agent_cache, AgentCacheConfig::default());
        assert_eq!(config.http, HttpConfig::default());
        assert_eq!(config.widget, WidgetDefaults::default());
    }
}
