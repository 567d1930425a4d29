//! Generation step run as a supervised child process.

use std::collections::VecDeque;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::error::CollaboratorError;
use super::traits::Generator;
use super::types::{GenerateOutcome, GenerateRequest};
use crate::config::GeneratorConfig;

/// Output lines kept for error analysis.
pub const TAIL_LINES: usize = 50;

/// [`Generator`] that runs the configured program and streams its output into the log.
pub struct ProcessGenerator {
    config: GeneratorConfig,
}

impl ProcessGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Generator for ProcessGenerator {
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateOutcome, CollaboratorError> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        info!(program = %self.config.program, batch = request.batch, topic = ?request.topic, "Starting generator");
        let mut child = cmd
            .spawn()
            .map_err(|e| CollaboratorError::spawn(&self.config.program, e))?;

        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));
        let mut tail = VecDeque::with_capacity(TAIL_LINES);

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => match line {
                    Some(line) => {
                        info!(target: "generator", "{}", line);
                        push_tail(&mut tail, line);
                    }
                    None => stdout = None,
                },
                line = next_line(&mut stderr), if stderr.is_some() => match line {
                    Some(line) => {
                        warn!(target: "generator", "{}", line);
                        push_tail(&mut tail, line);
                    }
                    None => stderr = None,
                },
            }
        }

        let status = child.wait().await?;
        let outcome = GenerateOutcome {
            exit_code: status.code(),
            tail: tail.into_iter().collect(),
        };
        if outcome.succeeded() {
            info!("Generator finished");
        } else {
            warn!("{}", outcome.describe());
        }
        Ok(outcome)
    }
}

type Lines<R> = tokio::io::Split<BufReader<R>>;

/// Next output line, decoded lossily. `None` only at end of stream or on a
/// read error, never for a line that is not valid UTF-8.
async fn next_line<R>(lines: &mut Option<Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let lines = lines.as_mut()?;
    match lines.next_segment().await {
        Ok(Some(mut bytes)) => {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Failed to read generator output");
            None
        }
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessGenerator {
        ProcessGenerator::new(GeneratorConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "generate".to_string()],
            cwd: None,
        })
    }

    #[tokio::test]
    async fn test_success_passes_batch_and_topic() {
        let generator = sh(r#"echo "args: $*""#);
        let outcome = generator
            .generate(&GenerateRequest::new(3, "kites"))
            .await
            .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.tail, vec!["args: --batch 3 --topic kites"]);
    }

    #[tokio::test]
    async fn test_failure_keeps_tail() {
        let generator = sh("i=0; while [ $i -lt 60 ]; do echo line$i; i=$((i+1)); done; echo fatal >&2; exit 4");
        let outcome = generator
            .generate(&GenerateRequest::new(1, ""))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(4));
        assert_eq!(outcome.tail.len(), TAIL_LINES);
        assert!(outcome.tail.contains(&"fatal".to_string()));
        assert!(!outcome.tail.contains(&"line0".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_output() {
        // Enough output after the bad byte to fill a pipe buffer.
        let generator = sh(
            r#"printf 'start\n\377\n'; i=0; while [ $i -lt 5000 ]; do echo "filler line number $i of the run"; i=$((i+1)); done; echo done; exit 0"#,
        );
        let outcome = generator
            .generate(&GenerateRequest::new(1, ""))
            .await
            .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.tail.last().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_decoded_lossily() {
        let generator = sh(r#"printf 'a\377b\n'; echo after"#);
        let outcome = generator
            .generate(&GenerateRequest::new(1, ""))
            .await
            .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.tail, vec!["a\u{FFFD}b", "after"]);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let generator = ProcessGenerator::new(GeneratorConfig {
            program: "no-such-generator-4711".to_string(),
            ..Default::default()
        });
        let err = generator
            .generate(&GenerateRequest::new(1, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::ProgramNotFound { .. }));
    }
}
