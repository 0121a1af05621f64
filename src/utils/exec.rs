use anyhow::{bail, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Run a command and capture its exit code, stdout and stderr.
///
/// `wait_with_output` drains stdout and stderr concurrently, so a chatty
/// child can never deadlock on a full pipe. The deadline bounds the whole
/// invocation; on expiry the child is killed (`kill_on_drop`).
pub async fn exec_capture(cmd: &str, args: &[&str], limit: Duration) -> Result<(i32, Vec<u8>, Vec<u8>)> {
    let mut c = Command::new(cmd);
    c.args(args);
    c.stdin(Stdio::null());
    c.stdout(Stdio::piped());
    c.stderr(Stdio::piped());
    c.kill_on_drop(true);
    let child = c.spawn()?;
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => bail!("{} did not exit within {:?}", cmd, limit),
    };
    let code = output.status.code().unwrap_or(-1);
    Ok((code, output.stdout, output.stderr))
}
