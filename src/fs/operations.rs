use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Last line of a file, without its newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    pub text: String,
    /// False when the file ends in the middle of a line, e.g. after a torn write.
    pub terminated: bool,
}

/// Reads the last line of a file by walking backwards from the end in `buffer` sized chunks.
/// The cursor is left at the end of the file so the caller can append right away.
pub async fn read_tail_line(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
    buffer: &mut [u8],
) -> Result<TailLine, io::Error> {
    debug_assert!(!buffer.is_empty());
    let len = file.seek(std::io::SeekFrom::End(0)).await?;
    if len == 0 {
        return Ok(TailLine {
            text: String::new(),
            terminated: true,
        });
    }

    file.seek(std::io::SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    let terminated = last[0] == b'\n';

    let end = if terminated { len - 1 } else { len };
    let mut start = end;
    while start > 0 {
        let chunk = u64::min(start, buffer.len() as u64) as usize;
        let chunk_start = start - chunk as u64;
        file.seek(std::io::SeekFrom::Start(chunk_start)).await?;
        file.read_exact(&mut buffer[..chunk]).await?;
        if let Some(index) = buffer[..chunk].iter().rposition(|v| *v == b'\n') {
            start = chunk_start + index as u64 + 1;
            break;
        }
        start = chunk_start;
    }

    let mut line = vec![0; (end - start) as usize];
    file.seek(std::io::SeekFrom::Start(start)).await?;
    file.read_exact(&mut line).await?;
    file.seek(std::io::SeekFrom::End(0)).await?;

    Ok(TailLine {
        text: String::from_utf8_lossy(&line).into_owned(),
        terminated,
    })
}
