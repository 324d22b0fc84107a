use std::path::PathBuf;
use std::process::Stdio;

use futures::stream;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::engine::{
    EngineError, EngineFactory, EngineOptions, EngineResult, EngineStream, FailedSnafu,
    InferenceEngine, MissingModelSnafu, MissingProgramSnafu, ProgramNotFoundSnafu, SpawnSnafu,
};

pub const MODEL_PATH_PLACEHOLDER: &str = "{model_path}";
pub const MAX_TOKENS_PLACEHOLDER: &str = "{max_tokens}";

const READ_CHUNK_BYTES: usize = 4096;
const STDERR_TAIL_CHARS: usize = 400;

/// Builds [`CommandEngine`] instances for a local inference executable.
///
/// `args` may reference `{model_path}` and `{max_tokens}`; both are substituted
/// from the [`EngineOptions`] each time an instance is created.
#[derive(Debug, Clone)]
pub struct CommandEngineFactory {
    program: String,
    args: Vec<String>,
}

impl CommandEngineFactory {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into().trim().to_string(),
            args,
        }
    }
}

impl EngineFactory for CommandEngineFactory {
    fn create(&self, options: &EngineOptions) -> EngineResult<Box<dyn InferenceEngine>> {
        ensure!(
            !self.program.is_empty(),
            MissingProgramSnafu {
                stage: "command-factory-program",
            }
        );
        let program = which::which(&self.program).context(ProgramNotFoundSnafu {
            stage: "command-factory-resolve-program",
            program: self.program.clone(),
        })?;
        ensure!(
            options.model_path.is_file(),
            MissingModelSnafu {
                stage: "command-factory-model",
                path: options.model_path.display().to_string(),
            }
        );

        let model_path = options.model_path.display().to_string();
        let max_tokens = options.max_tokens.to_string();
        let args = self
            .args
            .iter()
            .map(|arg| {
                arg.replace(MODEL_PATH_PLACEHOLDER, &model_path)
                    .replace(MAX_TOKENS_PLACEHOLDER, &max_tokens)
            })
            .collect();

        tracing::debug!(
            program = %program.display(),
            model_path = %model_path,
            max_tokens = options.max_tokens,
            "command engine instance created"
        );
        Ok(Box::new(CommandEngine { program, args }))
    }
}

/// Runs the inference program once per generation and streams its stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    fn spawn(&self, prompt: &str) -> EngineResult<CommandRun> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu {
                stage: "command-spawn",
                program: self.program.display().to_string(),
            })?;

        let stdout = child.stdout.take().context(FailedSnafu {
            stage: "command-take-stdout",
            message: "inference program stdout is not piped".to_string(),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                // Dropping the handle afterwards closes the pipe so the program sees EOF.
                if let Err(error) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::debug!(error = %error, "inference program closed stdin early");
                }
            });
        }

        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut raw = Vec::new();
                if let Err(error) = stderr.read_to_end(&mut raw).await {
                    tracing::debug!(error = %error, "failed to collect inference stderr");
                }
                String::from_utf8_lossy(&raw).into_owned()
            })
        });

        Ok(CommandRun {
            child,
            stdout,
            stderr,
            pending: Vec::new(),
            finished: false,
        })
    }
}

impl InferenceEngine for CommandEngine {
    fn generate<'a>(&'a mut self, prompt: &'a str) -> EngineStream<'a> {
        let run = match self.spawn(prompt) {
            Ok(run) => run,
            Err(error) => return Box::pin(stream::once(async move { Err::<String, _>(error) })),
        };

        Box::pin(stream::unfold(run, |mut run| async move {
            let item = run.next_fragment().await?;
            Some((item, run))
        }))
    }
}

// Dropping the run kills the child through `kill_on_drop`.
struct CommandRun {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    pending: Vec<u8>,
    finished: bool,
}

impl CommandRun {
    async fn next_fragment(&mut self) -> Option<EngineResult<String>> {
        if self.finished {
            return None;
        }

        let mut buffer = [0_u8; READ_CHUNK_BYTES];
        loop {
            let read = match self.stdout.read(&mut buffer).await {
                Ok(read) => read,
                Err(source) => {
                    self.finished = true;
                    return Some(Err(EngineError::Io {
                        stage: "command-read-stdout",
                        source,
                    }));
                }
            };

            if read == 0 {
                if !self.pending.is_empty() {
                    let tail = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    return Some(Ok(tail));
                }
                return self.finish().await;
            }

            self.pending.extend_from_slice(&buffer[..read]);
            let text = drain_utf8(&mut self.pending);
            if !text.is_empty() {
                return Some(Ok(text));
            }
        }
    }

    async fn finish(&mut self) -> Option<EngineResult<String>> {
        self.finished = true;
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(source) => {
                return Some(Err(EngineError::Io {
                    stage: "command-wait",
                    source,
                }));
            }
        };

        if status.success() {
            return None;
        }

        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        tracing::warn!(status = %status, "inference program failed");
        Some(Err(EngineError::ExitStatus {
            stage: "command-exit-status",
            status: status.to_string(),
            stderr: stderr_tail(&stderr),
        }))
    }
}

/// Decodes the complete UTF-8 prefix of `pending`, keeping an incomplete
/// trailing sequence for the next read. Invalid bytes become U+FFFD.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return text;
            }
            Err(error) => {
                let valid_up_to = error.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[..valid_up_to]));
                match error.error_len() {
                    Some(invalid_len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid_up_to + invalid_len);
                    }
                    None => {
                        pending.drain(..valid_up_to);
                        return text;
                    }
                }
            }
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let char_count = trimmed.chars().count();
    if char_count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(char_count - STDERR_TAIL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn drain_utf8_keeps_split_sequences_for_the_next_read() {
        let mut pending = vec![b'a', 0xC3];
        assert_eq!(drain_utf8(&mut pending), "a");
        assert_eq!(pending, vec![0xC3]);

        pending.push(0xA9);
        assert_eq!(drain_utf8(&mut pending), "é");
        assert!(pending.is_empty());

        let mut invalid = vec![b'x', 0xFF, b'y'];
        assert_eq!(drain_utf8(&mut invalid), "x\u{FFFD}y");
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(STDERR_TAIL_CHARS) + "END";
        let tail = stderr_tail(&long);
        assert!(tail.ends_with("END"));
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
    }

    #[test]
    fn uninstalled_program_fails_creation() {
        let model = NamedTempFile::new().expect("model file");
        let factory = CommandEngineFactory::new("lumen-test-no-such-inference-program", Vec::new());
        let error = match factory.create(&EngineOptions::new(model.path(), 16)) {
            Ok(_) => panic!("an uninstalled program must not produce an engine"),
            Err(error) => error,
        };
        assert!(matches!(error, EngineError::ProgramNotFound { .. }));
        assert!(error.is_missing_program());

        let absent_path = CommandEngineFactory::new("/definitely/not/a/program", Vec::new());
        assert!(matches!(
            absent_path.create(&EngineOptions::new(model.path(), 16)),
            Err(EngineError::ProgramNotFound { .. })
        ));
    }

    #[test]
    fn spawn_not_found_counts_as_missing_program() {
        let error = EngineError::Spawn {
            stage: "test",
            program: "gone".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(error.is_missing_program());

        let denied = EngineError::Spawn {
            stage: "test",
            program: "locked".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!denied.is_missing_program());
    }

    #[cfg(unix)]
    #[test]
    fn missing_model_or_program_fails_creation() {
        let factory = CommandEngineFactory::new("sh", Vec::new());
        let options = EngineOptions::new("/definitely/not/a/model.gguf", 16);
        assert!(matches!(
            factory.create(&options),
            Err(EngineError::MissingModel { .. })
        ));

        let model = NamedTempFile::new().expect("model file");
        let blank = CommandEngineFactory::new("  ", Vec::new());
        assert!(matches!(
            blank.create(&EngineOptions::new(model.path(), 16)),
            Err(EngineError::MissingProgram { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_program_output() {
        let model = NamedTempFile::new().expect("model file");
        let factory = CommandEngineFactory::new("sh", vec!["-c".to_string(), "cat".to_string()]);
        let mut engine = factory
            .create(&EngineOptions::new(model.path(), 64))
            .unwrap_or_else(|error| panic!("create failed: {error}"));

        let fragments = engine.generate("hello from stdin").collect::<Vec<_>>().await;
        let text = fragments
            .into_iter()
            .map(|fragment| fragment.expect("fragment"))
            .collect::<String>();
        assert_eq!(text, "hello from stdin");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn substitutes_placeholders() {
        let model = NamedTempFile::new().expect("model file");
        let factory = CommandEngineFactory::new(
            "sh",
            vec![
                "-c".to_string(),
                "printf '%s %s' \"$0\" \"$1\"".to_string(),
                MODEL_PATH_PLACEHOLDER.to_string(),
                MAX_TOKENS_PLACEHOLDER.to_string(),
            ],
        );
        let mut engine = factory
            .create(&EngineOptions::new(model.path(), 128))
            .unwrap_or_else(|error| panic!("create failed: {error}"));

        let text = engine
            .generate("ignored")
            .map(|fragment| fragment.expect("fragment"))
            .collect::<String>()
            .await;
        assert_eq!(text, format!("{} 128", model.path().display()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let model = NamedTempFile::new().expect("model file");
        let factory = CommandEngineFactory::new(
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()],
        );
        let mut engine = factory
            .create(&EngineOptions::new(model.path(), 64))
            .unwrap_or_else(|error| panic!("create failed: {error}"));

        let fragments = engine.generate("prompt").collect::<Vec<_>>().await;
        let Some(Err(EngineError::ExitStatus { stderr, .. })) = fragments.last() else {
            panic!("expected exit status error, got {fragments:?}");
        };
        assert_eq!(stderr, "boom");
    }
}
