//! Collaborators backed by an external program speaking JSON.
//!
//! The request is written to the program's stdin as one JSON document and
//! the response is read from its stdout.

use std::process::Stdio;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::error::CollaboratorError;
use super::traits::{Dispatcher, Publisher};
use super::types::{DispatchResults, PublishResults};
use crate::config::CommandConfig;

async fn run_json<T: DeserializeOwned>(
    config: &CommandConfig,
    request: &Value,
) -> Result<T, CollaboratorError> {
    let body = serde_json::to_vec(request).map_err(|e| CollaboratorError::InvalidResponse {
        program: config.program.clone(),
        reason: e.to_string(),
    })?;

    let mut child = Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CollaboratorError::spawn(&config.program, e))?;

    // The timeout covers writing the request as well as waiting for the answer.
    let exchange = async move {
        if let Some(mut stdin) = child.stdin.take() {
            // A program may answer without reading its input.
            if let Err(e) = write_request(&mut stdin, &body).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e);
                }
            }
        }
        child.wait_with_output().await
    };

    let output = tokio::time::timeout(config.timeout(), exchange)
        .await
        .map_err(|_| CollaboratorError::Timeout {
            program: config.program.clone(),
            secs: config.timeout_secs,
        })??;

    if !output.status.success() {
        return Err(CollaboratorError::ExitFailure {
            program: config.program.clone(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!(program = %config.program, bytes = output.stdout.len(), "Collaborator responded");
    serde_json::from_slice(&output.stdout).map_err(|e| CollaboratorError::InvalidResponse {
        program: config.program.clone(),
        reason: e.to_string(),
    })
}

async fn write_request(
    stdin: &mut tokio::process::ChildStdin,
    body: &[u8],
) -> std::io::Result<()> {
    stdin.write_all(body).await?;
    stdin.shutdown().await
}

/// [`Publisher`] that runs a deployment program.
///
/// Request: `{"action":"publish_batch","ids":[...]}`.
/// Response: `{"<id>":{"status":"PUBLISHED","url":"..."}}`.
pub struct CommandPublisher {
    config: CommandConfig,
}

impl CommandPublisher {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish_batch(&self, ids: &[String]) -> Result<PublishResults, CollaboratorError> {
        run_json(
            &self.config,
            &json!({ "action": "publish_batch", "ids": ids }),
        )
        .await
    }
}

/// [`Dispatcher`] that runs a promotion program.
///
/// Request: `{"action":"dispatch","product_id":"...","channels":[...]|null}`.
/// Response: `{"<channel>":{"ok":true}}`.
pub struct CommandDispatcher {
    config: CommandConfig,
}

impl CommandDispatcher {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Dispatcher for CommandDispatcher {
    async fn dispatch(
        &self,
        product_id: &str,
        channels: Option<&[String]>,
    ) -> Result<DispatchResults, CollaboratorError> {
        run_json(
            &self.config,
            &json!({ "action": "dispatch", "product_id": product_id, "channels": channels }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandConfig {
        CommandConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_publisher_parses_results() {
        let publisher = CommandPublisher::new(sh(
            r#"cat > /dev/null; echo '{"p1":{"status":"PUBLISHED","url":"https://x"}}'"#,
        ));
        let results = publisher.publish_batch(&["p1".to_string()]).await.unwrap();
        assert!(results["p1"].is_published());
        assert_eq!(results["p1"].url.as_deref(), Some("https://x"));
    }

    #[tokio::test]
    async fn test_dispatcher_receives_request() {
        // Echo the request's product id back as a channel name.
        let dispatcher = CommandDispatcher::new(sh(
            r#"req=$(cat); case "$req" in *'"product_id":"p9"'*) echo '{"blog":{"ok":true}}';; *) echo '{}';; esac"#,
        ));
        let results = dispatcher.dispatch("p9", None).await.unwrap();
        assert!(results["blog"].ok);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let publisher = CommandPublisher::new(sh("echo nope >&2; exit 3"));
        let err = publisher.publish_batch(&[]).await.unwrap_err();
        match err {
            CollaboratorError::ExitFailure { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let publisher = CommandPublisher::new(sh("echo not-json"));
        let err = publisher.publish_batch(&[]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let publisher = CommandPublisher::new(CommandConfig {
            program: "definitely-not-a-real-program-4711".to_string(),
            args: vec![],
            timeout_secs: 5,
        });
        let err = publisher.publish_batch(&[]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::ProgramNotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut config = sh("sleep 5");
        config.timeout_secs = 1;
        let publisher = CommandPublisher::new(config);
        let err = publisher.publish_batch(&[]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Timeout { secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_timeout_while_program_ignores_large_request() {
        let mut config = sh("sleep 30");
        config.timeout_secs = 1;
        let publisher = CommandPublisher::new(config);
        // Far more than a pipe buffer holds.
        let ids: Vec<String> = (0..20_000).map(|i| format!("product-{:06}", i)).collect();

        let started = std::time::Instant::now();
        let err = publisher.publish_batch(&ids).await.unwrap_err();

        assert!(matches!(err, CollaboratorError::Timeout { secs: 1, .. }));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
