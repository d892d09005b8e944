use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio_util::io::ReaderStream;

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MB

/// Lazy sequence of byte chunks for one file.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Produces a fresh stream of the file's bytes from offset zero.
///
/// The executor opens the source once per attempt, so a retry never reuses a
/// half-consumed stream.
pub trait ByteSource: Send + Sync {
    fn open(&self) -> ByteStream;
}

impl<F> ByteSource for F
where
    F: Fn() -> ByteStream + Send + Sync,
{
    fn open(&self) -> ByteStream {
        self()
    }
}

/// Serves an in-memory buffer in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    chunk_size: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ByteSource for MemorySource {
    fn open(&self) -> ByteStream {
        let data = self.data.clone();
        let chunk_size = self.chunk_size;
        let chunks: Vec<io::Result<Bytes>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();
        stream::iter(chunks).boxed()
    }
}

/// Streams a local file, opened lazily when the stream is first polled.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    chunk_size: usize,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl ByteSource for FileSource {
    fn open(&self) -> ByteStream {
        let path = self.path.clone();
        let chunk_size = self.chunk_size;
        async_stream::try_stream! {
            let file = tokio::fs::File::open(&path).await?;
            let mut reader = ReaderStream::with_capacity(file, chunk_size);
            while let Some(chunk) = reader.next().await {
                yield chunk?;
            }
        }
        .boxed()
    }
}
