//! Native readable sources that script code can pipe into a response.

use std::future::Future;
use std::io;
use std::path::PathBuf;

use futures::stream::{self, StreamExt, TryStreamExt};
use hyper::body::Bytes;
use reqrepl_common::ByteStream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

const CHUNK_SIZE: usize = 16 * 1024;

/// Where a pipeable stream reads from. Nothing is opened until the source
/// is piped into a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    File(PathBuf),
    Socket { host: String, port: u16 },
    Remote(String),
}

impl StreamSource {
    /// Short label for logs and the script-side `kind` property.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamSource::File(_) => "file",
            StreamSource::Socket { .. } => "socket",
            StreamSource::Remote(_) => "http",
        }
    }

    pub fn into_stream(self, http: &reqwest::Client) -> ByteStream {
        match self {
            StreamSource::File(path) => reader_stream(tokio::fs::File::open(path)),
            StreamSource::Socket { host, port } => reader_stream(TcpStream::connect(format!("{}:{}", host, port))),
            StreamSource::Remote(url) => remote_stream(http.clone(), url),
        }
    }
}

enum ReaderState<F, R> {
    Opening(F),
    Reading(R),
}

fn reader_stream<F, R>(open: F) -> ByteStream
where
    F: Future<Output = io::Result<R>> + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::try_unfold(ReaderState::Opening(open), next_chunk).boxed()
}

async fn next_chunk<F, R>(state: ReaderState<F, R>) -> io::Result<Option<(Bytes, ReaderState<F, R>)>>
where
    F: Future<Output = io::Result<R>>,
    R: AsyncRead + Unpin,
{
    let mut reader = match state {
        ReaderState::Opening(open) => open.await?,
        ReaderState::Reading(reader) => reader,
    };

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let read = reader.read(&mut chunk).await?;
    if read == 0 {
        return Ok(None);
    }
    chunk.truncate(read);
    Ok(Some((Bytes::from(chunk), ReaderState::Reading(reader))))
}

fn remote_stream(client: reqwest::Client, url: String) -> ByteStream {
    stream::once(async move { client.get(url).send().await })
        .map_ok(|response| response.bytes_stream().map_err(to_io_error))
        .map_err(to_io_error)
        .try_flatten()
        .boxed()
}

fn to_io_error(err: reqwest::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}
