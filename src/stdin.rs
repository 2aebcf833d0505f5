use crate::config::IndexConfig;
use crate::execute::{spawn_engine, EngineHandle};
use crate::storage::Result;
use tokio::select;
use tokio::{
    io::{stdin, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot},
};

/// Runs one command per line of stdin and prints one reply per command.
pub async fn process_from_stdin(config: IndexConfig) -> Result<()> {
    let (engine, task) = spawn_engine(config).await?;
    let (send, mut recv) = mpsc::channel::<String>(100);
    let (ctlrs, mut ctlrc) = oneshot::channel::<()>();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctlrs.send(());
        }
    });

    let read_task = tokio::spawn(async move { read_line_from_stdin(BufReader::new(stdin()), &send).await });

    let mut out = tokio::io::stdout();
    let result = process_lines_from_stdin(&mut recv, &mut ctlrc, &engine, &mut out).await;
    read_task.abort();
    engine.shutdown().await;
    task.await??;
    result
}

pub async fn process_lines_from_stdin<W: AsyncWrite + Unpin>(
    reciever: &mut mpsc::Receiver<String>,
    ctlrc_signal: &mut oneshot::Receiver<()>,
    engine: &EngineHandle,
    out: &mut W,
) -> Result<()> {
    loop {
        let line = select! {
            _ = &mut *ctlrc_signal => break,
            line = reciever.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = engine.execute(line).await?;
        out.write_all(reply.output.as_bytes()).await?;
        out.write_all(b"\n").await?;
        if reply.exit {
            return Ok(());
        }
    }
    let reply = engine.execute("EXIT".to_string()).await?;
    out.write_all(reply.output.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

async fn read_line_from_stdin<R: AsyncRead + Unpin>(
    reader: BufReader<R>,
    send: &mpsc::Sender<String>,
) -> Result<()> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if send.send(line).await.is_err() {
            break;
        }
    }
    Ok(())
}
