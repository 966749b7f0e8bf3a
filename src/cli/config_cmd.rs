//! Config command for mentorgate.
//!
//! Prints the effective configuration after every layer has been applied,
//! and can pin it into the project config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Options for the config command.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Output as JSON.
    pub json: bool,
    /// Suppress output.
    pub quiet: bool,
    /// Write the effective configuration to `.mentorgate/config.toml`.
    pub write_project: bool,
}

/// Output format for the config command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOutput {
    pub success: bool,
    pub config: Config,
    /// Project file written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The config command implementation.
pub struct ConfigCommand {
    config: Config,
}

impl ConfigCommand {
    /// Create a new config command.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the config command.
    pub fn run(&self, cwd: &Path, options: &ConfigOptions) -> ConfigOutput {
        let mut output = ConfigOutput {
            success: true,
            config: self.config.clone(),
            written: None,
            error: None,
        };

        if options.write_project {
            match self.config.save_project(cwd) {
                Ok(()) => {
                    output.written = Some(cwd.join(".mentorgate").join("config.toml"));
                }
                Err(e) => {
                    output.success = false;
                    output.error = Some(format!("Failed to write project config: {}", e));
                }
            }
        }
        output
    }

    /// Format the output based on options.
    pub fn format_output(&self, output: &ConfigOutput, options: &ConfigOptions) -> String {
        if options.quiet {
            return String::new();
        }
        if options.json {
            return serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string());
        }

        let mut text = toml::to_string_pretty(&output.config)
            .unwrap_or_else(|e| format!("# could not render config: {}\n", e));
        if let Some(path) = &output.written {
            text.push_str(&format!("\n# written to {}\n", path.display()));
        }
        if let Some(error) = &output.error {
            text.push_str(&format!("\n# {}\n", error));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_prints_toml() {
        let cmd = ConfigCommand::new(Config::default());
        let dir = TempDir::new().unwrap();
        let options = ConfigOptions::default();

        let output = cmd.run(dir.path(), &options);
        assert!(output.success);
        assert!(output.written.is_none());

        let text = cmd.format_output(&output, &options);
        assert!(text.contains("[cooldown]"));
        assert!(text.contains("mentor_guided_seconds = 86400"));
    }

    #[test]
    fn test_config_json() {
        let cmd = ConfigCommand::new(Config::default());
        let dir = TempDir::new().unwrap();
        let options = ConfigOptions {
            json: true,
            ..Default::default()
        };

        let output = cmd.run(dir.path(), &options);
        let value: serde_json::Value =
            serde_json::from_str(&cmd.format_output(&output, &options)).unwrap();
        assert_eq!(value["config"]["flow"]["resume_enabled"], true);
    }

    #[test]
    fn test_config_write_project_round_trips() {
        let mut config = Config::default();
        config.cooldown.timed_exam_seconds = 120;
        let cmd = ConfigCommand::new(config.clone());
        let dir = TempDir::new().unwrap();
        let options = ConfigOptions {
            write_project: true,
            ..Default::default()
        };

        let output = cmd.run(dir.path(), &options);
        assert!(output.success);
        let path = output.written.unwrap();
        assert!(path.exists());

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
