//! Bidirectional TCP stream tasks

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use super::{Control, Shared, cancellation, checkpoint};
use crate::backend::types::{TaskId, TaskMetrics};
use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 16 * 1024;

pub(super) async fn run(
    shared: Arc<Shared>,
    task: TaskId,
    host: String,
    port: u16,
    writes: mpsc::UnboundedReceiver<Bytes>,
    mut control: watch::Receiver<Control>,
) {
    let mut metrics = TaskMetrics {
        fetch_start: Some(Instant::now()),
        ..TaskMetrics::default()
    };
    let result = pump(&shared, task, &host, port, writes, &mut control, &mut metrics).await;
    metrics.response_end = Some(Instant::now());
    shared.complete(task, Some(metrics), result.err());
}

async fn pump(
    shared: &Arc<Shared>,
    task: TaskId,
    host: &str,
    port: u16,
    mut writes: mpsc::UnboundedReceiver<Bytes>,
    control: &mut watch::Receiver<Control>,
    metrics: &mut TaskMetrics,
) -> Result<()> {
    let connection = tokio::select! {
        _ = cancellation(control) => return Err(Error::Cancelled),
        connection = TcpStream::connect((host, port)) => connection.map_err(|error| Error::Network {
            code: -1004,
            message: format!("could not connect to {}:{}: {}", host, port, error),
        })?,
    };
    metrics.response_start = Some(Instant::now());
    tracing::debug!(%task, host, port, "stream connected");

    let (mut reader, mut writer) = connection.into_split();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut writes_open = true;

    loop {
        if checkpoint(control).await.is_some() {
            return Err(Error::Cancelled);
        }
        buffer.reserve(READ_BUFFER_SIZE);

        tokio::select! {
            _ = cancellation(control) => return Err(Error::Cancelled),
            outgoing = writes.recv(), if writes_open => match outgoing {
                Some(data) => {
                    writer.write_all(&data).await?;
                    metrics.bytes_sent += data.len() as u64;
                }
                None => writes_open = false,
            },
            read = reader.read_buf(&mut buffer) => {
                if read? == 0 {
                    tracing::debug!(%task, "stream closed by peer");
                    return Ok(());
                }
                let chunk = buffer.split().freeze();
                metrics.bytes_received += chunk.len() as u64;
                if let Some(delegate) = shared.delegate() {
                    delegate.did_receive_data(task, chunk);
                }
            }
        }
    }
}
