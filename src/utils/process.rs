/// External tool invocation. Every pipeline stage blocks on exactly one
/// child process here; there is no pipelining between stages.
use std::path::Path;

use anyhow::anyhow;
use log::debug;
use tokio::process::Command;

use crate::config::defs::PipelineError;

#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external tool to completion, capturing both output streams.
///
/// A spawn failure maps to `ToolMissing`, a non-zero exit to `ToolFailed`
/// carrying the stderr tail for diagnosis.
///
/// # Arguments
///
/// * `tool` - Binary name (resolved through PATH).
/// * `args` - Argument vector, one token per element.
///
/// # Returns
///
/// ToolOutput with captured stdout/stderr on success.
pub async fn run_tool(tool: &str, args: &[String]) -> Result<ToolOutput, PipelineError> {
    debug!("Invoking: {} {}", tool, args.join(" "));

    let output = Command::new(tool)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ToolMissing(tool.to_string())
            } else {
                PipelineError::Other(anyhow!("Failed to spawn {}: {}", tool, e))
            }
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(PipelineError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: stderr_tail(&stderr, 20),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Runs a tool whose useful output goes to stdout, writing that stdout to
/// `out_path` instead of holding it in memory. Used for text-heavy stages
/// such as `samtools depth` over a whole reference.
pub async fn run_tool_to_file(
    tool: &str,
    args: &[String],
    out_path: &Path,
) -> Result<(), PipelineError> {
    debug!("Invoking: {} {} > {}", tool, args.join(" "), out_path.display());

    let out_file = std::fs::File::create(out_path)?;
    let output = Command::new(tool)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::from(out_file))
        .stderr(std::process::Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ToolMissing(tool.to_string())
            } else {
                PipelineError::Other(anyhow!("Failed to spawn {}: {}", tool, e))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(PipelineError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: stderr_tail(&stderr, 20),
        });
    }

    Ok(())
}

fn stderr_tail(stderr: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let err = run_tool("definitely-not-a-real-tool-xyz", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolMissing(_)));
    }

    #[tokio::test]
    async fn test_run_tool_nonzero_exit() {
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = run_tool("sh", &args).await.unwrap_err();
        match err {
            PipelineError::ToolFailed { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected ToolFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_tool_captures_stdout() -> anyhow::Result<()> {
        let args = vec!["-c".to_string(), "echo hello".to_string()];
        let out = run_tool("sh", &args).await?;
        assert_eq!(out.stdout.trim(), "hello");
        Ok(())
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long: String = (0..50).map(|i| format!("line{}\n", i)).collect();
        let tail = stderr_tail(&long, 20);
        assert_eq!(tail.lines().count(), 20);
        assert!(tail.ends_with("line49"));
    }
}
