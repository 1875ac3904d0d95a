use async_trait::async_trait;
use pilotcore::services::{CodeEvaluator, CodeRequest};
use pilotcore::{CollaboratorError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How code of one language is run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpreter {
    /// Executable, e.g. `python3`
    pub program: String,
    /// Arguments placed before the code, e.g. `["-c"]`
    #[serde(default)]
    pub args: Vec<String>,
}

impl Interpreter {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Runs code in a child process, optionally inside a throwaway container
///
/// The run context is written to stdin as JSON. Stdout is the result: parsed
/// as JSON when possible, otherwise returned as trimmed text.
pub struct ProcessCodeEvaluator {
    interpreters: BTreeMap<String, Interpreter>,
    docker_image: Option<String>,
}

impl ProcessCodeEvaluator {
    pub fn new(interpreters: BTreeMap<String, Interpreter>) -> Self {
        Self {
            interpreters,
            docker_image: None,
        }
    }

    /// Run every snippet with `docker run --rm -i <image>`
    pub fn with_docker_image(mut self, image: impl Into<String>) -> Self {
        self.docker_image = Some(image.into());
        self
    }

    pub fn default_interpreters() -> BTreeMap<String, Interpreter> {
        BTreeMap::from([
            ("python".to_string(), Interpreter::new("python3", &["-c"])),
            ("javascript".to_string(), Interpreter::new("node", &["-e"])),
            ("shell".to_string(), Interpreter::new("sh", &["-c"])),
        ])
    }

    fn command(&self, interpreter: &Interpreter, code: &str) -> Command {
        let mut cmd = match &self.docker_image {
            Some(image) => {
                let mut cmd = Command::new("docker");
                cmd.arg("run").arg("--rm").arg("-i").arg(image);
                cmd.arg(&interpreter.program);
                cmd
            }
            None => Command::new(&interpreter.program),
        };
        cmd.args(&interpreter.args).arg(code);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for ProcessCodeEvaluator {
    fn default() -> Self {
        Self::new(Self::default_interpreters())
    }
}

#[async_trait]
impl CodeEvaluator for ProcessCodeEvaluator {
    async fn evaluate(&self, request: CodeRequest) -> Result<Value, CollaboratorError> {
        let interpreter = self
            .interpreters
            .get(&request.language.to_lowercase())
            .ok_or_else(|| {
                CollaboratorError::Unavailable(format!("no interpreter for '{}'", request.language))
            })?;

        let input = serde_json::to_vec(&request.context)
            .map_err(|e| CollaboratorError::Evaluation(format!("context not serializable: {}", e)))?;

        let mut child = self
            .command(interpreter, &request.code)
            .spawn()
            .map_err(|e| CollaboratorError::Unavailable(format!("failed to spawn: {}", e)))?;

        // Feed stdin while both output pipes drain, so a chatty child never
        // blocks on a full pipe
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A script that never reads stdin closes the pipe early
                if let Err(e) = stdin.write_all(&input).await {
                    tracing::debug!("code process did not consume stdin: {}", e);
                }
            }
        };
        let (_, output) = tokio::join!(feed, child.wait_with_output());
        let output = output
            .map_err(|e| CollaboratorError::Evaluation(format!("failed to wait: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::Evaluation(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(match serde_json::from_str::<serde_json::Value>(&stdout) {
            Ok(json) => Value::from(json),
            Err(_) => Value::String(stdout),
        })
    }
}
