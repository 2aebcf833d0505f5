use crate::config::IndexConfig;
use crate::execute::{spawn_engine, EngineHandle};
use crate::storage::Result;
use tokio::io::{stdin, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::select;
use tokio::sync::oneshot::{channel, Receiver};

pub async fn run_repl(config: IndexConfig) -> Result<()> {
    let (engine, task) = spawn_engine(config).await?;

    // A task waits for ctrl-c and tells the loop, which selects between
    // that and the next line of input.
    let (sender, mut receiver) = channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = sender.send(());
        }
    });

    let mut out = tokio::io::stdout();
    out.write_all(b"Welcome to ehash kv!\n").await?;
    let result = inner_loop(BufReader::new(stdin()), &mut out, &engine, &mut receiver).await;
    engine.shutdown().await;
    task.await??;
    result
}

/// Feeds lines to the engine until `EXIT`, end of input or ctrl-c.
pub async fn inner_loop<R, W>(
    reader: BufReader<R>,
    out: &mut W,
    engine: &EngineHandle,
    ctrlc: &mut Receiver<()>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        out.write_all(b"> ").await?;
        out.flush().await?;
        let line = select! {
            _ = &mut *ctrlc => {
                out.write_all(b"\nReceived ctrl-c\n").await?;
                "EXIT".to_string()
            }
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => line,
                None => "EXIT".to_string(),
            },
        };
        let reply = engine.execute(line).await?;
        out.write_all(reply.output.as_bytes()).await?;
        out.write_all(b"\n").await?;
        if reply.exit {
            return Ok(());
        }
    }
}
