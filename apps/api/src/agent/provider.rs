//! Agent provider specs: which CLI binary to run and how.
//!
//! Each provider is one entry in the fallback chain: a non-interactive
//! binary, its unattended-execution flags, and the path of its
//! pre-provisioned credential file. The credential path is handed to the
//! child process via an environment variable; its contents are never read
//! into this process and never logged.

use std::path::{Path, PathBuf};

use crate::agent::AgentError;

#[derive(Debug, Clone)]
pub struct ProviderSpec {
    /// Short name used in logs and error codes, e.g. "claude".
    pub name: String,
    pub binary: String,
    /// Flags forcing a single, unattended, non-interactive run.
    pub args: Vec<String>,
    /// Environment variable the binary reads its credential path from.
    pub credential_env: String,
    pub credential_file: PathBuf,
}

impl ProviderSpec {
    /// A missing credential file is a ConfigurationError, surfaced
    /// distinctly so it is never silently auto-retried.
    pub fn check_credentials(&self) -> Result<(), AgentError> {
        if self.credential_file.is_file() {
            Ok(())
        } else {
            Err(AgentError::Configuration {
                provider: self.name.clone(),
                message: format!(
                    "credential file {} is missing",
                    self.credential_file.display()
                ),
            })
        }
    }
}

/// The default provider chain, in fallback order: primary, secondary,
/// tertiary. Credential files live under one pre-provisioned directory.
pub fn default_chain(credentials_dir: &Path) -> Vec<ProviderSpec> {
    vec![
        ProviderSpec {
            name: "claude".to_string(),
            binary: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            credential_env: "CLAUDE_CREDENTIALS".to_string(),
            credential_file: credentials_dir.join("claude.json"),
        },
        ProviderSpec {
            name: "codex".to_string(),
            binary: "codex".to_string(),
            args: vec![
                "exec".to_string(),
                "--json".to_string(),
                "--skip-git-repo-check".to_string(),
            ],
            credential_env: "CODEX_CREDENTIALS".to_string(),
            credential_file: credentials_dir.join("codex.json"),
        },
        ProviderSpec {
            name: "gemini".to_string(),
            binary: "gemini".to_string(),
            args: vec!["--output-format".to_string(), "json".to_string()],
            credential_env: "GEMINI_CREDENTIALS".to_string(),
            credential_file: credentials_dir.join("gemini.json"),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_order() {
        let chain = default_chain(Path::new("/etc/agents"));
        let names: Vec<&str> = chain.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["claude", "codex", "gemini"]);
    }

    #[test]
    fn test_missing_credential_is_configuration_error() {
        let spec = ProviderSpec {
            name: "claude".to_string(),
            binary: "claude".to_string(),
            args: vec![],
            credential_env: "CLAUDE_CREDENTIALS".to_string(),
            credential_file: PathBuf::from("/nonexistent/claude.json"),
        };
        let err = spec.check_credentials().unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_present_credential_passes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("claude.json");
        std::fs::write(&file, "{}").unwrap();
        let spec = ProviderSpec {
            name: "claude".to_string(),
            binary: "claude".to_string(),
            args: vec![],
            credential_env: "CLAUDE_CREDENTIALS".to_string(),
            credential_file: file,
        };
        assert!(spec.check_credentials().is_ok());
    }
}
