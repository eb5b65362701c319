//! Tailing of service log files

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub const DEFAULT_TAIL_LINES: usize = 100;
pub const MAX_TAIL_LINES: usize = 10_000;

const TAIL_BLOCK_SIZE: u64 = 8 * 1024;

/// Result of reading the end of a log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTail {
    Lines { path: PathBuf, content: String },
    /// The file does not exist (yet); not an error
    Missing { path: PathBuf },
}

/// Read the last `lines` lines of `path`, like `tail -n`.
///
/// Reads backwards from the end in blocks, so cost follows the window and
/// not the file size. Invalid UTF-8 is replaced rather than rejected.
pub async fn tail_file(path: &Path, lines: usize) -> std::io::Result<LogTail> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LogTail::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e),
    };

    let tail = read_tail(&mut file, lines, TAIL_BLOCK_SIZE).await?;

    Ok(LogTail::Lines {
        path: path.to_path_buf(),
        content: String::from_utf8_lossy(&tail).into_owned(),
    })
}

async fn read_tail(file: &mut File, lines: usize, block_size: u64) -> std::io::Result<Vec<u8>> {
    if lines == 0 {
        return Ok(Vec::new());
    }

    let mut pos = file.metadata().await?.len();
    let mut data: Vec<u8> = Vec::new();

    while pos > 0 {
        let size = block_size.min(pos);
        pos -= size;

        let mut block = vec![0u8; size as usize];
        file.seek(SeekFrom::Start(pos)).await?;
        file.read_exact(&mut block).await?;
        block.extend_from_slice(&data);
        data = block;

        if let Some(start) = window_start(&data, lines) {
            data.drain(..start);
            return Ok(data);
        }
    }

    Ok(data)
}

/// Offset where the last `lines` lines of `data` begin, if `data` holds a
/// line break before them. A trailing newline does not open a new line.
fn window_start(data: &[u8], lines: usize) -> Option<usize> {
    let body = data.strip_suffix(b"\n").unwrap_or(data);
    body.iter()
        .enumerate()
        .rev()
        .filter(|(_, b)| **b == b'\n')
        .nth(lines - 1)
        .map(|(i, _)| i + 1)
}

/// Clamp a requested line count to what the API serves. Zero is allowed and
/// yields an empty tail.
pub fn clamp_lines(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_TAIL_LINES).min(MAX_TAIL_LINES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_lines(dir: &TempDir, count: usize) -> PathBuf {
        let path = dir.path().join("service.log");
        let content: String = (1..=count).map(|i| format!("line {i}\n")).collect();
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_tail_last_lines() {
        let dir = TempDir::new().unwrap();
        let path = write_lines(&dir, 250).await;

        let LogTail::Lines { content, .. } = tail_file(&path, 3).await.unwrap() else {
            panic!("expected lines");
        };
        assert_eq!(content, "line 248\nline 249\nline 250\n");
    }

    #[tokio::test]
    async fn test_tail_shorter_file() {
        let dir = TempDir::new().unwrap();
        let path = write_lines(&dir, 2).await;

        let LogTail::Lines { content, .. } = tail_file(&path, 100).await.unwrap() else {
            panic!("expected lines");
        };
        assert_eq!(content, "line 1\nline 2\n");
    }

    #[tokio::test]
    async fn test_tail_without_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.log");
        tokio::fs::write(&path, "a\nb\nc").await.unwrap();

        let LogTail::Lines { content, .. } = tail_file(&path, 2).await.unwrap() else {
            panic!("expected lines");
        };
        assert_eq!(content, "b\nc");
    }

    #[tokio::test]
    async fn test_tail_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.log");
        tokio::fs::write(&path, b"ok\n\xff\xfe bad\n").await.unwrap();

        let LogTail::Lines { content, .. } = tail_file(&path, 10).await.unwrap() else {
            panic!("expected lines");
        };
        assert!(content.starts_with("ok\n"));
        assert!(content.contains("bad"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.log");
        assert_eq!(
            tail_file(&path, 10).await.unwrap(),
            LogTail::Missing { path }
        );
    }

    #[test]
    fn test_clamp_lines() {
        assert_eq!(clamp_lines(None), 100);
        assert_eq!(clamp_lines(Some(0)), 0);
        assert_eq!(clamp_lines(Some(50)), 50);
        assert_eq!(clamp_lines(Some(1_000_000)), MAX_TAIL_LINES);
    }

    #[tokio::test]
    async fn test_tail_zero_lines_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = write_lines(&dir, 5).await;

        let LogTail::Lines { content, .. } = tail_file(&path, 0).await.unwrap() else {
            panic!("expected lines");
        };
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn test_tail_spans_many_blocks() {
        let dir = TempDir::new().unwrap();
        let path = write_lines(&dir, 20_000).await;

        let LogTail::Lines { content, .. } = tail_file(&path, 5_000).await.unwrap() else {
            panic!("expected lines");
        };
        let got: Vec<&str> = content.lines().collect();
        assert_eq!(got.len(), 5_000);
        assert_eq!(got[0], "line 15001");
        assert_eq!(got[4_999], "line 20000");
    }

    #[tokio::test]
    async fn test_read_tail_with_tiny_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.log");
        tokio::fs::write(&path, "alpha\nbeta\n\ngamma delta\n").await.unwrap();

        let mut file = File::open(&path).await.unwrap();
        let tail = read_tail(&mut file, 3, 4).await.unwrap();
        assert_eq!(tail, b"beta\n\ngamma delta\n");

        let all = read_tail(&mut file, 10, 4).await.unwrap();
        assert_eq!(all, b"alpha\nbeta\n\ngamma delta\n");
    }

    #[tokio::test]
    async fn test_tail_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.log");
        tokio::fs::write(&path, "").await.unwrap();

        let LogTail::Lines { content, .. } = tail_file(&path, 10).await.unwrap() else {
            panic!("expected lines");
        };
        assert!(content.is_empty());
    }
}
