use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncSeek, AsyncSeekExt, AsyncWriteExt,
        BufReader,
    },
};
use tracing::{debug, warn};

use crate::fs::operations::read_tail_line;

use super::entities::{TrackPoint, TrackRow};

/// Read side of the append-only location log. The background collector owns the write side.
pub trait TrackLog: Send + Sync + 'static {
    /// Ordered full scan.
    fn read_all(&self) -> impl Future<Output = Result<Vec<TrackPoint>>> + Send;

    /// Number of readable rows. Agrees with `read_all().len()` for the same file contents.
    fn count(&self) -> impl Future<Output = Result<usize>> + Send;
}

impl<T> TrackLog for T
where
    T: Deref + Send + Sync + 'static,
    T::Target: TrackLog,
{
    fn read_all(&self) -> impl Future<Output = Result<Vec<TrackPoint>>> + Send {
        self.deref().read_all()
    }

    fn count(&self) -> impl Future<Output = Result<usize>> + Send {
        self.deref().count()
    }
}

/// Track log stored as one JSON row per line.
pub struct JsonLinesTrackLog {
    path: PathBuf,
}

impl JsonLinesTrackLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feeds every parseable row to `on_row` under a shared lock. A missing file reads as empty.
    async fn scan(&self, on_row: impl FnMut(TrackRow) + Send) -> Result<(), std::io::Error> {
        let file = match File::open(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        file.lock_shared()?;
        let mut reader = BufReader::new(file);
        let result = read_rows(&mut reader, on_row).await;
        reader.into_inner().unlock_async().await?;
        result
    }

    /// Appends points in order. Points older than the last stored row are dropped, so the log
    /// stays sorted by timestamp. Returns how many points were written.
    pub async fn append(&self, points: Vec<TrackPoint>) -> Result<usize> {
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?;

        file.lock_exclusive()?;
        let result = append_with_file(&mut file, points).await;
        file.unlock_async().await?;
        result
    }

    /// Drops every row. Used when a new tracked session begins.
    pub async fn clear(&self) -> Result<()> {
        let file = match File::options().write(true).open(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        file.lock_exclusive()?;
        let result = file.set_len(0).await;
        file.unlock_async().await?;
        debug!("Cleared track log {:?}", self.path);
        Ok(result?)
    }
}

impl TrackLog for JsonLinesTrackLog {
    async fn read_all(&self) -> Result<Vec<TrackPoint>> {
        let mut points = vec![];
        self.scan(|row| points.push(row.into())).await?;
        Ok(points)
    }

    async fn count(&self) -> Result<usize> {
        let mut count = 0;
        self.scan(|_| count += 1).await?;
        Ok(count)
    }
}

/// Feeds every parseable row to `on_row`. Rows that aren't valid JSON, including rows with
/// bytes that aren't UTF-8, are skipped. Only I/O failures stop the read.
async fn read_rows(
    reader: &mut (impl AsyncBufRead + Unpin),
    mut on_row: impl FnMut(TrackRow),
) -> Result<(), std::io::Error> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<TrackRow>(&line) {
            Ok(row) => on_row(row),
            // Torn write from a collector that was killed mid-flush
            Err(e) => warn!(
                "Skipping corrupt track row {:?}: {e}",
                String::from_utf8_lossy(&line)
            ),
        }
    }
}

/// Last stored timestamp. Falls back to a full scan when the tail line is torn.
async fn last_timestamp(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
) -> Result<(Option<DateTime<Utc>>, bool)> {
    let tail = read_tail_line(file, vec![0; 1024].as_mut_slice()).await?;
    if tail.text.is_empty() {
        return Ok((None, tail.terminated));
    }
    if let Ok(row) = serde_json::from_str::<TrackRow>(&tail.text) {
        return Ok((Some(row.timestamp), tail.terminated));
    }

    warn!("Last track row is corrupted, scanning the whole log");
    file.rewind().await?;
    let mut last = None;
    read_rows(&mut BufReader::new(&mut *file), |row| last = Some(row.timestamp)).await?;
    file.seek(std::io::SeekFrom::End(0)).await?;
    Ok((last, tail.terminated))
}

async fn append_with_file(
    file: &mut (impl AsyncSeek + AsyncRead + tokio::io::AsyncWrite + Unpin),
    points: Vec<TrackPoint>,
) -> Result<usize> {
    let (mut last, terminated) = last_timestamp(file).await?;

    let mut buffer = Vec::<u8>::new();
    if !terminated {
        // Keep the torn fragment on its own line so readers skip it.
        buffer.push(b'\n');
    }

    let mut written = 0;
    for point in points {
        if last.is_some_and(|last| point.timestamp < last) {
            warn!(
                "Dropping track point at {} older than the last row",
                point.timestamp
            );
            continue;
        }
        serde_json::to_writer(&mut buffer, &TrackRow::from(&point))?;
        buffer.push(b'\n');
        last = Some(point.timestamp);
        written += 1;
    }

    if written > 0 {
        file.write_all(&buffer).await?;
        file.flush().await?;
    }
    Ok(written)
}
