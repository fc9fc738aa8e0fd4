use std::io::{self, Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, ETAG, LAST_MODIFIED, RANGE};
use reqwest::StatusCode;
use tracing::{debug, trace};

use crate::download::{RangeRequest, RemoteMetadata, TransferError, Transport};
use crate::interrupt::Interrupt;

const CHUNK_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransport {
    client: Client,
    interrupt: Interrupt,
}

impl HttpTransport {
    pub fn new(interrupt: Interrupt) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("codeupdate/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client, interrupt })
    }

    // Fallback for servers that answer HEAD without a length: a one-byte range request
    // reports the total in `Content-Range`.
    fn probe_with_range(&self, url: &str, timeout: Duration) -> Result<u64, TransferError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .timeout(timeout)
            .send()
            .map_err(map_request_error)?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                content_range_total(&response).ok_or(TransferError::MissingLength)
            }
            status if status.is_success() => {
                header_u64(&response, CONTENT_LENGTH).ok_or(TransferError::MissingLength)
            }
            status => Err(TransferError::Http {
                status: status.as_u16(),
            }),
        }
    }
}

impl Transport for HttpTransport {
    fn probe(&self, url: &str, timeout: Duration) -> Result<RemoteMetadata, TransferError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .map_err(map_request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Http {
                status: status.as_u16(),
            });
        }

        let validator = header_str(&response, ETAG).or_else(|| header_str(&response, LAST_MODIFIED));
        let total_size = match header_u64(&response, CONTENT_LENGTH) {
            Some(size) if size > 0 => size,
            _ => {
                debug!(url, "HEAD response carried no length; probing with a range request");
                self.probe_with_range(url, timeout)?
            }
        };

        trace!(url, total_size, ?validator, "probed remote artifact");
        Ok(RemoteMetadata {
            total_size,
            validator,
        })
    }

    fn fetch_range(
        &self,
        request: &RangeRequest<'_>,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError> {
        let mut response = self
            .client
            .get(request.url)
            .header(RANGE, format!("bytes={}-", request.offset))
            .timeout(request.timeout)
            .send()
            .map_err(map_request_error)?;

        let mut skip = match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                match content_range_start(&response) {
                    Some(start) if start != request.offset => {
                        return Err(TransferError::Network(format!(
                            "server resumed at byte {start} instead of {}",
                            request.offset
                        )));
                    }
                    _ => 0,
                }
            }
            StatusCode::OK => {
                if request.offset > 0 {
                    debug!(
                        offset = request.offset,
                        "server ignored the range request; skipping bytes already on disk"
                    );
                }
                request.offset
            }
            status => {
                return Err(TransferError::Http {
                    status: status.as_u16(),
                })
            }
        };

        let mut buffer = vec![0_u8; CHUNK_SIZE];
        let mut written = 0_u64;
        loop {
            if self.interrupt.is_raised() {
                return Err(TransferError::Interrupted);
            }

            let read = match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_body_error(err)),
            };

            let mut chunk = &buffer[..read];
            if skip > 0 {
                let skipped = skip.min(chunk.len() as u64) as usize;
                skip -= skipped as u64;
                chunk = &chunk[skipped..];
            }
            if chunk.is_empty() {
                continue;
            }

            sink.write_all(chunk)?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }

        Ok(written)
    }
}

fn map_request_error(err: reqwest::Error) -> TransferError {
    if err.is_timeout() {
        return TransferError::Timeout;
    }
    TransferError::Network(err.to_string())
}

fn map_body_error(err: io::Error) -> TransferError {
    if err.kind() == io::ErrorKind::TimedOut {
        return TransferError::Timeout;
    }
    TransferError::Network(err.to_string())
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn header_u64(response: &Response, name: reqwest::header::HeaderName) -> Option<u64> {
    header_str(response, name).and_then(|value| value.parse().ok())
}

fn content_range_start(response: &Response) -> Option<u64> {
    let (start, _, _) = parse_content_range(&header_str(response, CONTENT_RANGE)?)?;
    Some(start)
}

fn content_range_total(response: &Response) -> Option<u64> {
    let (_, _, total) = parse_content_range(&header_str(response, CONTENT_RANGE)?)?;
    total
}

pub(crate) fn parse_content_range(raw: &str) -> Option<(u64, u64, Option<u64>)> {
    let spec = raw.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        value => Some(value.parse().ok()?),
    };
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?, total))
}
