use crate::command::Command;
use crate::config::IndexConfig;
use crate::execute::{spawn_engine, EngineHandle};
use crate::storage::Result;

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    select,
    signal::ctrl_c,
    spawn,
    sync::oneshot::channel as one_channel,
};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_ADDR: &str = "127.0.0.1:5476";

/// Serves line-based commands over TCP until ctrl-c. Every connection shares
/// the one storage engine.
pub async fn run_server(config: IndexConfig, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let (engine, engine_task) = spawn_engine(config).await?;
    info!(addr, "listening");

    let (ctlrs, mut ctlrc) = one_channel::<()>();
    spawn(async move {
        if ctrl_c().await.is_ok() {
            let _ = ctlrs.send(());
        }
    });

    loop {
        select! {
            _ = &mut ctlrc => {
                info!("received ctrl-c, shutting down");
                break;
            },
            res = listener.accept() => {
                let (socket, peer) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let engine = engine.clone();
                let span = info_span!("connection", id = %Uuid::new_v4(), %peer);
                spawn(
                    async move {
                        info!("connected");
                        if let Err(e) = handle_socket(socket, &engine).await {
                            warn!(error = %e, "connection closed with error");
                        }
                        info!("disconnected");
                    }
                    .instrument(span),
                );
            }
        }
    }

    engine.shutdown().await;
    engine_task.await?
}

/// Answers each line from `socket` with one line. `EXIT` only ends this
/// connection, the engine keeps running for the others.
pub async fn handle_socket<S>(socket: S, engine: &EngineHandle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (r, mut w) = tokio::io::split(socket);
    let mut lines = BufReader::new(r).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if matches!(line.parse::<Command>(), Ok(Command::Exit)) {
            w.write_all(b"Bye\n").await?;
            break;
        }
        let output = engine.execute(line).await?.output;
        w.write_all(output.as_bytes()).await?;
        w.write_all(b"\n").await?;
    }
    w.flush().await?;
    Ok(())
}
