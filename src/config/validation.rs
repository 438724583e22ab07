//! Configuration validation
//!
//! Invalid configuration is fatal and rejected at load time.

use secrecy::ExposeSecret;
use url::Url;

use crate::error::{Error, Result};

use super::Config;

/// Validate a loaded configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    if config.llm.api_key.expose_secret().is_empty() {
        return Err(Error::Config("llm.api_key is required".to_string()));
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return Err(Error::Config(format!(
            "llm.temperature must be in [0, 2], got {}",
            config.llm.temperature
        )));
    }

    if Url::parse(&config.llm.base_url).is_err() {
        return Err(Error::Config(format!(
            "llm.base_url is not a valid URL: {}",
            config.llm.base_url
        )));
    }

    if config.agent.max_steps == 0 {
        return Err(Error::Config("agent.max_steps must be positive".to_string()));
    }

    if config.workflow.max_concurrency == 0 {
        return Err(Error::Config(
            "workflow.max_concurrency must be positive".to_string(),
        ));
    }

    if config.workflow.event_buffer == 0 {
        return Err(Error::Config(
            "workflow.event_buffer must be positive".to_string(),
        ));
    }

    for (name, server) in &config.mcp_servers {
        if Url::parse(&server.url).is_err() {
            return Err(Error::Config(format!(
                "mcp_servers.{}.url is not a valid URL: {}",
                name, server.url
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, McpServerConfig};
    use secrecy::SecretString;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.llm.api_key = SecretString::from("sk-test");
        config
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let mut config = valid_config();
        config.llm.temperature = 2.5;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn zero_max_steps_is_rejected() {
        let mut config = valid_config();
        config.agent.max_steps = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn bad_mcp_server_url_is_rejected() {
        let mut config = valid_config();
        config.mcp_servers.insert(
            "bad".to_string(),
            McpServerConfig {
                url: "not a url".to_string(),
                headers: Default::default(),
            },
        );
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("mcp_servers.bad.url"));
    }
}
