//! Configuration loading
//!
//! Layered: optional JSON file first, then `FLOWAGENT_`-prefixed environment
//! variables (`FLOWAGENT_LLM__API_KEY=...` overrides `llm.api_key`).

use std::path::Path;

use tracing::debug;

use crate::error::Result;

use super::{validate_config, Config};

/// Load configuration from an optional file plus environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        debug!("Loading configuration from {}", path.display());
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FLOWAGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config: Config = builder.build()?.try_deserialize()?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{
                "llm": {{ "api_key": "sk-test", "temperature": 0.3 }},
                "agent": {{ "max_steps": 5, "max_duration": "2m" }},
                "workflow": {{ "max_concurrency": 2 }},
                "mcp_servers": {{
                    "market": {{ "url": "https://mcp.example.com/sse" }}
                }}
            }}"#
        )
        .unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.llm.temperature, 0.3);
        assert_eq!(config.agent.max_steps, 5);
        assert_eq!(
            config.agent.max_duration,
            std::time::Duration::from_secs(120)
        );
        assert_eq!(config.workflow.max_concurrency, 2);
        assert_eq!(
            config.mcp_servers["market"].url,
            "https://mcp.example.com/sse"
        );
        // Unspecified fields keep their defaults
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "llm": { "temperature": 0.5 } }"#).unwrap();

        let err = load_config(Some(path.as_path())).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }
}
