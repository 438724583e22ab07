//! Agent factory - creates agents by type
//!
//! The workflow engine draws a fresh agent per task through this seam.
//! Unknown agent types fall back to `general`.

use std::sync::Arc;

use tracing::debug;

use crate::config::AgentConfig;
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

use super::prompts;
use super::runner::Agent;

/// The built-in agent types. The set is open: anything unrecognized is
/// treated as `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentType {
    General,
    WebScraper,
    DataAnalysis,
    FileProcessor,
}

impl AgentType {
    /// Parse an agent type string, falling back to `General`
    pub fn parse(s: &str) -> Self {
        match s {
            "web_scraper" => AgentType::WebScraper,
            "data_analysis" => AgentType::DataAnalysis,
            "file_processor" => AgentType::FileProcessor,
            "general" => AgentType::General,
            other => {
                debug!("Unknown agent type '{}', falling back to general", other);
                AgentType::General
            }
        }
    }

    /// The system prompt for this agent type
    pub fn system_prompt(&self) -> &'static str {
        match self {
            AgentType::General => prompts::DEFAULT_SYSTEM_PROMPT,
            AgentType::WebScraper => prompts::WEB_SCRAPER_PROMPT,
            AgentType::DataAnalysis => prompts::DATA_ANALYSIS_PROMPT,
            AgentType::FileProcessor => prompts::FILE_PROCESSOR_PROMPT,
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            AgentType::General => "general",
            AgentType::WebScraper => "web_scraper",
            AgentType::DataAnalysis => "data_analysis",
            AgentType::FileProcessor => "file_processor",
        }
    }
}

/// Creates agents for the workflow engine
pub trait AgentFactory: Send + Sync {
    /// Create a fresh agent of `agent_type`
    fn create(
        &self,
        agent_type: &str,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Agent;
}

/// Default factory: selects the system prompt by agent type
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAgentFactory;

impl AgentFactory for DefaultAgentFactory {
    fn create(
        &self,
        agent_type: &str,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Agent {
        let resolved = AgentType::parse(agent_type);
        Agent::new(
            resolved.name(),
            resolved.system_prompt(),
            llm,
            tools,
            config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;

    #[test]
    fn known_types_parse() {
        assert_eq!(AgentType::parse("web_scraper"), AgentType::WebScraper);
        assert_eq!(AgentType::parse("data_analysis"), AgentType::DataAnalysis);
        assert_eq!(AgentType::parse("file_processor"), AgentType::FileProcessor);
        assert_eq!(AgentType::parse("general"), AgentType::General);
    }

    #[test]
    fn unknown_type_falls_back_to_general() {
        assert_eq!(AgentType::parse("quantum_trader"), AgentType::General);
    }

    #[test]
    fn factory_resolves_the_type() {
        let factory = DefaultAgentFactory;
        let agent = factory.create(
            "no_such_type",
            Arc::new(ScriptedLlm::new()),
            Arc::new(ToolRegistry::new()),
            &AgentConfig::default(),
        );
        assert_eq!(agent.agent_type(), "general");
    }
}
