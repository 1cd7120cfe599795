// Configuration management module
// TOML settings for the Ollama provider, retrieval defaults and the chat loop

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{ChatConfig, Config, ConfigError, OllamaConfig, RagConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
