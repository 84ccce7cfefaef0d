// Library root for the rosterbook binary: command parsing, dispatch and the
// stdin loop, exposed so they can be tested without a process.

pub mod command;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use command::{error_json, parse_line, Session};

/// Read commands line by line from `input` and write one JSON document per
/// command to `output`. Returns the number of commands that failed.
pub async fn run_lines<R, W>(session: &Session, input: R, mut output: W) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut failures = 0;
    while let Some(line) = lines.next_line().await? {
        let result = parse_line(&line).and_then(|parsed| match parsed {
            Some(parsed) => session.execute(parsed).map(Some),
            None => Ok(None),
        });
        let rendered: Value = match result {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(e) => {
                warn!("command {line:?} failed: {e:#}");
                failures += 1;
                error_json(&e)
            }
        };
        output.write_all(rendered.to_string().as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    info!("input closed; {failures} command(s) failed");
    Ok(failures)
}
