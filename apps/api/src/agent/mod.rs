//! Agent process runner: one non-interactive external AI-agent invocation.
//!
//! ARCHITECTURAL RULE: no other module may spawn agent binaries directly.
//! All agent interactions go through `AgentProcessRunner`.
//!
//! Providers are tried in chain order; a fatal error class (missing
//! credentials, unparsable output, timeout, process failure) escalates to
//! the next provider, and exhausting the chain returns the last provider's
//! error. Output must contain a JSON block; a parse miss gets exactly one
//! repair attempt (JSON-only re-prompt) before counting as a ParseError.

use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub mod provider;

use provider::ProviderSpec;

const JSON_REPAIR_PROMPT: &str = "Your previous reply was not valid JSON. \
    Respond again with ONLY the JSON object or array, no prose, no code fences.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider {provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("provider {provider} configuration error: {message}")]
    Configuration { provider: String, message: String },

    #[error("provider {provider} failed to run: {message}")]
    Process { provider: String, message: String },

    #[error("provider {provider} returned unparsable output: {message}")]
    Parse { provider: String, message: String },
}

impl AgentError {
    /// Stable machine code recorded on a failed generation step.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Timeout { .. } => "TIMEOUT",
            AgentError::Configuration { .. } => "CONFIGURATION_ERROR",
            AgentError::Process { .. } => "AGENT_FAILED",
            AgentError::Parse { .. } => "PARSE_ERROR",
        }
    }

    /// Whether re-advancing the step may help without operator action.
    /// Configuration and parse failures need a human first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Timeout { .. } | AgentError::Process { .. })
    }
}

/// Runs agent invocations with a hard timeout and provider fallback.
#[derive(Clone)]
pub struct AgentProcessRunner {
    providers: Vec<ProviderSpec>,
    workdir: PathBuf,
    timeout: Duration,
}

impl AgentProcessRunner {
    pub fn new(providers: Vec<ProviderSpec>, workdir: PathBuf, timeout: Duration) -> Self {
        Self {
            providers,
            workdir,
            timeout,
        }
    }

    /// Invokes the chain until one provider yields parsable JSON, and
    /// deserializes it. Fails with the last provider's error.
    pub async fn invoke_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, AgentError> {
        let value = self.invoke_value(prompt).await?;
        serde_json::from_value(value).map_err(|e| AgentError::Parse {
            provider: "chain".to_string(),
            message: format!("JSON did not match the expected schema: {e}"),
        })
    }

    /// Invokes the chain and returns the raw JSON value.
    pub async fn invoke_value(&self, prompt: &str) -> Result<serde_json::Value, AgentError> {
        let mut last_error: Option<AgentError> = None;

        for provider in &self.providers {
            match self.invoke_provider(provider, prompt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "Provider {} failed ({}), escalating to next provider",
                        provider.name,
                        e.code()
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::Configuration {
            provider: "chain".to_string(),
            message: "no agent providers configured".to_string(),
        }))
    }

    async fn invoke_provider(
        &self,
        provider: &ProviderSpec,
        prompt: &str,
    ) -> Result<serde_json::Value, AgentError> {
        provider.check_credentials()?;

        let stdout = self.run_once(provider, prompt).await?;
        match extract_json(&stdout) {
            Ok(value) => Ok(value),
            Err(parse_msg) => {
                // One bounded repair attempt, then this provider is done.
                debug!(
                    "Provider {} output was not JSON, attempting repair",
                    provider.name
                );
                let repair_prompt = format!("{prompt}\n\n{JSON_REPAIR_PROMPT}");
                let stdout = self.run_once(provider, &repair_prompt).await?;
                extract_json(&stdout).map_err(|repair_msg| AgentError::Parse {
                    provider: provider.name.clone(),
                    message: format!("{parse_msg}; repair attempt: {repair_msg}"),
                })
            }
        }
    }

    /// One subprocess run: prompt on stdin, stdout captured for parsing,
    /// stderr for diagnostics only. The process is killed at the timeout.
    async fn run_once(
        &self,
        provider: &ProviderSpec,
        prompt: &str,
    ) -> Result<String, AgentError> {
        let mut child = Command::new(&provider.binary)
            .args(&provider.args)
            .current_dir(&self.workdir)
            .env(&provider.credential_env, &provider.credential_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Process {
                provider: provider.name.clone(),
                message: format!("spawn failed: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| AgentError::Process {
                    provider: provider.name.clone(),
                    message: format!("writing prompt failed: {e}"),
                })?;
            // Close stdin so the agent sees EOF and starts.
            drop(stdin);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AgentError::Timeout {
                provider: provider.name.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| AgentError::Process {
                provider: provider.name.clone(),
                message: format!("wait failed: {e}"),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            // Diagnostics only; prompts and credentials stay out of logs.
            debug!(
                "Provider {} stderr ({} bytes): {}",
                provider.name,
                stderr.len(),
                truncate(&stderr, 500)
            );
        }

        if !output.status.success() {
            return Err(AgentError::Process {
                provider: provider.name.clone(),
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    truncate(&stderr, 200)
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Pulls the JSON block out of agent output. Accepts bare JSON, fenced
/// JSON, or JSON embedded in surrounding prose.
pub fn extract_json(text: &str) -> Result<serde_json::Value, String> {
    let trimmed = strip_json_fences(text);
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // Fall back to the outermost braced/bracketed region.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    Err(format!(
        "no JSON block found in {} bytes of output",
        text.len()
    ))
}

/// Strips ```json ... ``` or ``` ... ``` code fences from agent output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bare_json() {
        let value = extract_json(r#"{"key": "value"}"#).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_extract_fenced_json() {
        let value = extract_json("```json\n{\"key\": \"value\"}\n```").unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let value =
            extract_json("Here is the result you asked for:\n{\"score\": 7}\nHope that helps!")
                .unwrap();
        assert_eq!(value["score"], 7);
    }

    #[test]
    fn test_extract_json_array() {
        let value = extract_json(r#"[1, 2, 3]"#).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_extract_rejects_proseless_garbage() {
        assert!(extract_json("I could not complete the task.").is_err());
    }

    #[test]
    fn test_error_codes() {
        let timeout = AgentError::Timeout {
            provider: "claude".into(),
            secs: 300,
        };
        assert_eq!(timeout.code(), "TIMEOUT");
        assert!(timeout.is_retryable());

        let config = AgentError::Configuration {
            provider: "codex".into(),
            message: "missing credential".into(),
        };
        assert_eq!(config.code(), "CONFIGURATION_ERROR");
        assert!(!config.is_retryable());

        let parse = AgentError::Parse {
            provider: "gemini".into(),
            message: "not json".into(),
        };
        assert_eq!(parse.code(), "PARSE_ERROR");
        assert!(!parse.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_chain_fails_with_configuration_error() {
        let runner = AgentProcessRunner::new(
            vec![],
            std::env::temp_dir(),
            Duration::from_secs(1),
        );
        let err = runner.invoke_value("hello").await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_missing_credentials_escalate_through_chain() {
        let spec = |name: &str| provider::ProviderSpec {
            name: name.to_string(),
            binary: "/nonexistent/binary".to_string(),
            args: vec![],
            credential_env: "X_CREDENTIALS".to_string(),
            credential_file: "/nonexistent/cred.json".into(),
        };
        let runner = AgentProcessRunner::new(
            vec![spec("primary"), spec("secondary")],
            std::env::temp_dir(),
            Duration::from_secs(1),
        );
        // Both providers fail the credential check; the last error wins.
        let err = runner.invoke_value("hello").await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("secondary"));
    }
}
