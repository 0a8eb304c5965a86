//! Subprocess-backed collaborators
//!
//! Each call spawns the configured program, writes the input on stdin and
//! reads stdout. Model-backed classifiers tend to wrap their JSON in prose
//! or code fences, so the classifier output goes through `extract_json`.

use super::{Classifier, CollaboratorError, CollaboratorResult, Fetcher, Summarizer, Verdict};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Run once, feeding `input` on stdin. Non-zero exit is a failure
    /// carrying the trimmed stderr.
    pub async fn run(&self, input: &str) -> CollaboratorResult<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("cannot spawn '{}': {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading its input is judged by
            // its exit status, not by the broken pipe.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::Failed(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| CollaboratorError::Parse(format!("stdout is not UTF-8: {}", e)))
    }
}

/// Extract a JSON object from free-form program output.
///
/// Tries, in order:
/// 1. Direct parse (output is pure JSON)
/// 2. Extract from ```json ... ``` or ``` ... ``` fenced block
/// 3. Find the first `{` to last `}` span and parse that
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();

    let parse_object = |s: &str| {
        serde_json::from_str::<serde_json::Value>(s.trim())
            .ok()
            .filter(|v| v.is_object())
    };

    if let Some(v) = parse_object(trimmed) {
        return Some(v);
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```\n") {
        let after = &trimmed[start + 4..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };
    if let Some(v) = fenced.and_then(parse_object) {
        return Some(v);
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => parse_object(&trimmed[start..=end]),
        _ => None,
    }
}

/// Classifier that delegates to an external program.
///
/// The program receives the link text on stdin and prints
/// `{"isClickbait": bool, "confidence": number, "reason": string}`.
pub struct CommandClassifier {
    id: String,
    command: CommandSpec,
}

impl CommandClassifier {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            id: format!("command:{}", command.program),
            command,
        }
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn classify(&self, text: &str) -> CollaboratorResult<Verdict> {
        let output = self.command.run(text).await?;
        let value = extract_json(&output).ok_or_else(|| {
            CollaboratorError::Parse(format!("no JSON object in output: {}", output.trim()))
        })?;
        let verdict: Verdict = serde_json::from_value(value)
            .map_err(|e| CollaboratorError::Parse(e.to_string()))?;
        Ok(verdict.clamped())
    }
}

/// Fetcher that delegates to an external program (URL on stdin, article
/// text on stdout).
pub struct CommandFetcher {
    command: CommandSpec,
}

impl CommandFetcher {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Fetcher for CommandFetcher {
    async fn fetch(&self, url: &str) -> CollaboratorResult<String> {
        let text = self.command.run(url).await?;
        if text.trim().is_empty() {
            return Err(CollaboratorError::Failed(format!("no article text for {}", url)));
        }
        Ok(text)
    }
}

/// Summarizer that delegates to an external program (article on stdin,
/// summary on stdout).
pub struct CommandSummarizer {
    command: CommandSpec,
}

impl CommandSummarizer {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Summarizer for CommandSummarizer {
    async fn summarize(&self, article: &str) -> CollaboratorResult<String> {
        Ok(self.command.run(article).await?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_direct() {
        let v = extract_json(r#"{"isClickbait": true}"#).unwrap();
        assert_eq!(v["isClickbait"], true);
    }

    #[test]
    fn extract_json_fenced() {
        let text = "Here you go:\n```json\n{\"isClickbait\": false, \"confidence\": 0.2}\n```\n";
        let v = extract_json(text).unwrap();
        assert_eq!(v["isClickbait"], false);
    }

    #[test]
    fn extract_json_embedded() {
        let text = "Verdict: {\"isClickbait\": true, \"confidence\": 0.9} -- done";
        let v = extract_json(text).unwrap();
        assert_eq!(v["confidence"], 0.9);
    }

    #[test]
    fn extract_json_rejects_non_objects() {
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("no json here").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_classifier_parses_program_output() {
        let spec = CommandSpec::new("sh").with_arg("-c").with_arg(
            r#"cat >/dev/null; echo 'result: {"isClickbait": true, "confidence": 1.4, "reason": "teaser"}'"#,
        );
        let classifier = CommandClassifier::new(spec);

        let verdict = classifier.classify("You won't believe this").await.unwrap();
        assert!(verdict.is_clickbait);
        assert_eq!(verdict.confidence, 1.0);
        assert_eq!(verdict.reason, "teaser");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_failure_carries_stderr() {
        let spec = CommandSpec::new("sh")
            .with_arg("-c")
            .with_arg("echo boom >&2; exit 3");
        let err = spec.run("input").await.unwrap_err();
        match err {
            CollaboratorError::Failed(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let spec = CommandSpec::new("baitguard-no-such-program-xyz");
        let err = spec.run("").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }
}
