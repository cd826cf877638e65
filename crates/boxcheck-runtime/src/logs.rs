//! Container log handling.

use serde::{Deserialize, Serialize};

/// Log streams captured from a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLogs {
    /// Lines the container wrote to stdout.
    pub stdout: String,
    /// Lines the container wrote to stderr.
    pub stderr: String,
}

impl ContainerLogs {
    /// Returns whether both streams are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }

    /// Returns both streams interleaved by stream, each trimmed to `lines`.
    #[must_use]
    pub fn tail(&self, lines: usize) -> String {
        let mut out = Vec::new();
        let stdout = tail_lines(&self.stdout, lines);
        let stderr = tail_lines(&self.stderr, lines);
        if !stdout.is_empty() {
            out.push(stdout);
        }
        if !stderr.is_empty() {
            out.push(format!("[stderr]\n{stderr}"));
        }
        out.join("\n")
    }
}

/// Returns the last `lines` non-trailing lines of `text`.
#[must_use]
pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
