//! External worker client - runs one worker process per call
//!
//! Includes:
//! - Argument and stdin plumbing
//! - Bounded wait (the child is killed on timeout)
//! - Exit code and stdout classification into `WorkerError`

use crate::common::errors::WorkerError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{ffi::OsString, process::Stdio, time::Duration, time::Instant};
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};

/// A worker program plus its fixed leading arguments,
/// e.g. `python3 ./scripts/process_image.py`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerClient {
    timeout: Duration,
    stderr_excerpt_chars: usize,
}

impl WorkerClient {
    pub fn new(timeout: Duration, stderr_excerpt_chars: usize) -> Self {
        Self {
            timeout,
            stderr_excerpt_chars,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command` with `args` appended, optionally feeding `stdin_payload`,
    /// and return the JSON value the worker printed on stdout.
    ///
    /// A single attempt; retry policy belongs to the caller.
    pub async fn invoke(
        &self,
        command: &WorkerCommand,
        args: &[OsString],
        stdin_payload: Option<Vec<u8>>,
    ) -> Result<Value, WorkerError> {
        let program = command.program.clone();
        let start_time = Instant::now();

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .args(args)
            .stdin(if stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Launch {
                program: program.clone(),
                source,
            })?;

        // Feed stdin from its own task so a worker that writes a lot before
        // reading everything cannot deadlock against us.
        let feeder = match (stdin_payload, child.stdin.take()) {
            (Some(payload), Some(mut stdin)) => Some(tokio::spawn(async move {
                stdin.write_all(&payload).await
                // stdin is dropped here, closing the pipe
            })),
            _ => None,
        };

        let waited = timeout(self.timeout, child.wait_with_output()).await;
        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                abort_feeder(feeder);
                return Err(WorkerError::Launch { program, source });
            }
            Err(_) => {
                // Dropping the wait future dropped the child, and kill_on_drop killed it.
                abort_feeder(feeder);
                return Err(WorkerError::Timeout {
                    program,
                    after: self.timeout,
                });
            }
        };

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Worker `{}` did not read all of its input: {}", program, err),
                Err(err) => warn!("Stdin feeder for worker `{}` failed: {}", program, err),
            }
        }

        debug!(duration = &*format!("{:?}", start_time.elapsed());
            "Worker `{}` exited with {}",
            program,
            output.status
        );

        if !output.status.success() {
            return Err(WorkerError::Exit {
                program,
                code: output.status.code(),
                stderr: stderr_excerpt(&output.stderr, self.stderr_excerpt_chars),
            });
        }

        parse_worker_output(&program, &output.stdout)
    }
}

fn abort_feeder(feeder: Option<tokio::task::JoinHandle<std::io::Result<()>>>) {
    if let Some(feeder) = feeder {
        feeder.abort();
    }
}

/// First `limit` characters of the worker's stderr, trimmed.
pub fn stderr_excerpt(stderr: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let mut excerpt: String = trimmed.chars().take(limit).collect();
    if trimmed.chars().count() > limit {
        excerpt.push_str("...");
    }
    excerpt
}

/// Parse the whole of stdout as JSON; failing that, its last non-empty line,
/// for workers that print progress before their result.
pub fn parse_worker_output(program: &str, stdout: &[u8]) -> Result<Value, WorkerError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(WorkerError::OutputParse {
            program: program.to_string(),
            reason: "no output on stdout".to_string(),
        });
    }

    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(whole_err) => trimmed
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| WorkerError::OutputParse {
                program: program.to_string(),
                reason: whole_err.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> WorkerClient {
        WorkerClient::new(Duration::from_secs(10), 100)
    }

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh", ["-c", script])
    }

    #[test]
    fn parses_whole_output_or_last_line() {
        let value = parse_worker_output("w", b"  {\"derivedPath\": \"a.jpg\"}\n").unwrap();
        assert_eq!(value, json!({ "derivedPath": "a.jpg" }));

        let value =
            parse_worker_output("w", b"Loading model...\nDone\n{\"derivedPath\": \"b.jpg\"}\n\n")
                .unwrap();
        assert_eq!(value["derivedPath"], "b.jpg");

        let err = parse_worker_output("w", b"Successfully processed image").unwrap_err();
        assert!(matches!(err, WorkerError::OutputParse { .. }));

        let err = parse_worker_output("w", b"   \n").unwrap_err();
        assert!(err.to_string().contains("no output"));
    }

    #[test]
    fn stderr_is_truncated_by_characters() {
        assert_eq!(stderr_excerpt(b"  short error \n", 100), "short error");

        let long = "é".repeat(150);
        let excerpt = stderr_excerpt(long.as_bytes(), 100);
        assert_eq!(excerpt.chars().count(), 103);
        assert!(excerpt.ends_with("..."));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn returns_parsed_stdout_and_passes_arguments() {
        let args = [OsString::from("first"), OsString::from("second value")];
        let value = client()
            .invoke(
                &sh(r#"printf '{"args":["%s","%s"]}' "$0" "$1""#),
                &args,
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, json!({ "args": ["first", "second value"] }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn feeds_payload_through_stdin() {
        let payload = serde_json::to_vec(&json!([{ "derivedPath": "a.jpg" }])).unwrap();
        let value = client()
            .invoke(&WorkerCommand::new("cat", Vec::<String>::new()), &[], Some(payload))
            .await
            .unwrap();
        assert_eq!(value, json!([{ "derivedPath": "a.jpg" }]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_payload_does_not_deadlock() {
        let big = vec![json!({ "derivedPath": "x".repeat(200) }); 2_000];
        let payload = serde_json::to_vec(&big).unwrap();
        let value = client()
            .invoke(&WorkerCommand::new("cat", Vec::<String>::new()), &[], Some(payload))
            .await
            .unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_code_and_stderr() {
        let err = client()
            .invoke(&sh("echo 'cannot open image' >&2; exit 3"), &[], None)
            .await
            .unwrap_err();
        match err {
            WorkerError::Exit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "cannot open image");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unparseable_success_output_is_rejected() {
        let err = client()
            .invoke(&sh("echo 'Successfully processed image'"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::OutputParse { .. }));
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let err = client()
            .invoke(
                &WorkerCommand::new("phototrail-no-such-worker", Vec::<String>::new()),
                &[],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_worker_times_out() {
        let client = WorkerClient::new(Duration::from_millis(200), 100);
        let started = Instant::now();
        let err = client.invoke(&sh("sleep 5"), &[], None).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
