use std::io;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tether_protocol::Command;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command as Process};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ReplyStream, Service, ServiceContext};
use crate::error::NodeError;

const CHUNK_SIZE: usize = 8 * 1024;

/// `EXEC <program> [args...]`: run a program and stream its output back
///
/// `params.dir` sets the working directory (default `.`). `params.env`, a
/// `;`-separated list of `KEY=VALUE` pairs, replaces the environment; without
/// it the environment is inherited. Stdout and stderr are interleaved onto the
/// stream as they arrive. The process is killed when the command is
/// cancelled, including while waiting for it to exit after its pipes close,
/// or when the stream breaks.
pub struct ExecService;

#[async_trait]
impl Service for ExecService {
    async fn invoke(
        &self,
        ctx: &ServiceContext,
        command: &Command,
        reply: &mut ReplyStream<'_>,
    ) -> Result<(), NodeError> {
        let (program, args) = command
            .args
            .split_first()
            .ok_or_else(|| NodeError::BadParam("exec requires a program".to_string()))?;

        let mut process = Process::new(program);
        process
            .args(args)
            .current_dir(command.param_or("dir", "."))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = command.param("env") {
            process.env_clear().envs(parse_env(env)?);
        }

        let mut child = process.spawn()?;
        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(NodeError::Io(io::Error::other("child output not captured")));
        };
        info!(app = %ctx.session.id(), stream = reply.id(), pid = ?child.id(), "Running {}", program);

        let stream = reply.accept().await?;
        match supervise(&mut child, &mut stdout, &mut stderr, stream, &ctx.cancel).await {
            Ok(Some(status)) => {
                debug!(stream = reply.id(), "{} exited with {}", program, status);
                Ok(())
            }
            Ok(None) => {
                debug!(stream = reply.id(), "Killed {} on cancel", program);
                Err(NodeError::Cancelled)
            }
            Err(e) => {
                warn!(stream = reply.id(), "Running {} failed: {}", program, e);
                Err(e.into())
            }
        }
    }
}

/// Stream the child's output to `out` and reap it
///
/// Returns `None` when `cancel` fires first, after the child has been
/// killed. A failed write also kills the child.
async fn supervise<O, E, W>(
    child: &mut Child,
    stdout: &mut O,
    stderr: &mut E,
    out: &mut W,
    cancel: &CancellationToken,
) -> io::Result<Option<ExitStatus>>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let finished = tokio::select! {
        result = async {
            pump_output(stdout, stderr, out).await?;
            child.wait().await
        } => Some(result),
        _ = cancel.cancelled() => None,
    };

    match finished {
        Some(Ok(status)) => Ok(Some(status)),
        Some(Err(e)) => {
            if let Err(kill) = child.kill().await {
                debug!("Kill after failure: {}", kill);
            }
            Err(e)
        }
        None => {
            child.kill().await?;
            Ok(None)
        }
    }
}

/// Copy both pipes to `out` until each reaches EOF
async fn pump_output<O, E, W>(stdout: &mut O, stderr: &mut E, out: &mut W) -> io::Result<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut out_buf = vec![0u8; CHUNK_SIZE];
    let mut err_buf = vec![0u8; CHUNK_SIZE];
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            n = stdout.read(&mut out_buf), if out_open => {
                match n? {
                    0 => out_open = false,
                    n => out.write_all(&out_buf[..n]).await?,
                }
            }
            n = stderr.read(&mut err_buf), if err_open => {
                match n? {
                    0 => err_open = false,
                    n => out.write_all(&err_buf[..n]).await?,
                }
            }
        }
    }
    out.flush().await
}

/// Parse `KEY=VALUE;KEY2=VALUE2`; empty entries are skipped
fn parse_env(env: &str) -> Result<Vec<(&str, &str)>, NodeError> {
    env.split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| NodeError::BadParam(format!("invalid env entry: {}", entry)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        let env = parse_env("A=1;B=x=y;;C=").unwrap();
        assert_eq!(env, vec![("A", "1"), ("B", "x=y"), ("C", "")]);
        assert!(parse_env("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_env_rejects_malformed() {
        assert!(matches!(parse_env("A=1;oops"), Err(NodeError::BadParam(_))));
        assert!(matches!(parse_env("=1"), Err(NodeError::BadParam(_))));
    }

    #[tokio::test]
    async fn test_pump_output_interleaves_both_pipes() {
        let mut stdout: &[u8] = b"out";
        let mut stderr: &[u8] = b"err";
        let mut sink = Vec::new();

        pump_output(&mut stdout, &mut stderr, &mut sink).await.unwrap();

        assert_eq!(sink.len(), 6);
        let text = String::from_utf8(sink).unwrap();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[cfg(unix)]
    fn spawn_shell(script: &str) -> (Child, tokio::process::ChildStdout, tokio::process::ChildStderr) {
        let mut child = Process::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        (child, stdout, stderr)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_supervise_collects_output_and_status() {
        let (mut child, mut stdout, mut stderr) = spawn_shell("echo out; echo err >&2; exit 3");
        let mut sink = Vec::new();
        let cancel = CancellationToken::new();

        let status = supervise(&mut child, &mut stdout, &mut stderr, &mut sink, &cancel)
            .await
            .unwrap()
            .expect("child should exit on its own");
        assert_eq!(status.code(), Some(3));

        let text = String::from_utf8(sink).unwrap();
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_child_after_pipes_close() {
        // Output is redirected away, so only the wait is left pending
        let (mut child, mut stdout, mut stderr) = spawn_shell("exec >/dev/null 2>&1; sleep 30");
        let mut sink = Vec::new();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            token.cancel();
        });

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            supervise(&mut child, &mut stdout, &mut stderr, &mut sink, &cancel),
        )
        .await
        .expect("cancel did not interrupt the wait")
        .unwrap();
        assert!(outcome.is_none());
        assert!(sink.is_empty());
        assert!(child.try_wait().unwrap().is_some());
    }
}
