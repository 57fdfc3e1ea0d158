//! Streaming JSON over HTTP
//!
//! The response body is scanned as it arrives. [`ElementScanner`] finds
//! the records array (at `records_path`, or a top-level array) or reads
//! newline-delimited JSON, and yields each complete element without ever
//! holding the whole body. A chunk is up to `records_per_chunk` elements.
//!
//! The cursor counts elements already returned. Reconnecting (after an
//! error or on resume) re-requests the body and skips that many elements.

use super::traits::{build_records, unsupported_cursor, DecodedItem, SourceAdapter};
use crate::adapters::http::{build_client, request_error, status_error};
use crate::config::{JsonStreamSourceConfig, SecretString};
use crate::domain::{ProvisionalRecord, RawChunk, SourceCursor, SourceError, SourceId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Looking for the records array
    Seeking,
    /// Inside the records array
    Array,
    /// Top-level values separated by whitespace
    Lines,
    /// Records array closed
    Done,
}

#[derive(Debug)]
enum Frame {
    Object { key: Option<String>, expect_key: bool },
    Array,
}

/// Incremental splitter of a JSON body into record elements
#[derive(Debug)]
pub(crate) struct ElementScanner {
    target: Vec<String>,
    mode: Mode,
    frames: Vec<Frame>,
    key_buf: Vec<u8>,
    element: Vec<u8>,
    capturing: bool,
    scalar: bool,
    depth: usize,
    in_string: bool,
    escape: bool,
}

impl ElementScanner {
    /// `target` is the dotted records path split into keys; empty for a
    /// top-level array or NDJSON
    pub(crate) fn new(target: Vec<String>) -> Self {
        Self {
            target,
            mode: Mode::Seeking,
            frames: Vec::new(),
            key_buf: Vec::new(),
            element: Vec::new(),
            capturing: false,
            scalar: false,
            depth: 0,
            in_string: false,
            escape: false,
        }
    }

    /// True once the records array has closed; the rest of the body is
    /// irrelevant
    pub(crate) fn is_done(&self) -> bool {
        self.mode == Mode::Done
    }

    pub(crate) fn feed(&mut self, bytes: &[u8], out: &mut VecDeque<Bytes>) {
        for &b in bytes {
            match self.mode {
                Mode::Done => return,
                Mode::Seeking => self.seek(b, out),
                Mode::Array | Mode::Lines => self.capture(b, out),
            }
        }
    }

    /// Call at the end of the body
    pub(crate) fn finish(&mut self, out: &mut VecDeque<Bytes>) -> Result<(), SourceError> {
        if self.capturing {
            if self.scalar && !self.in_string {
                self.complete(out);
            } else {
                return Err(SourceError::transient("response body ended inside a record"));
            }
        }
        match self.mode {
            Mode::Seeking if !self.target.is_empty() => Err(SourceError::fatal(format!(
                "records_path '{}' not found in response",
                self.target.join(".")
            ))),
            Mode::Array => Err(SourceError::transient(
                "response body ended before the records array closed",
            )),
            _ => Ok(()),
        }
    }

    fn path_matches(&self) -> bool {
        self.frames.len() == self.target.len()
            && self.frames.iter().zip(&self.target).all(|(frame, key)| {
                matches!(frame, Frame::Object { key: Some(k), .. } if k == key)
            })
    }

    fn seek(&mut self, b: u8, out: &mut VecDeque<Bytes>) {
        if self.in_string {
            if self.escape {
                self.escape = false;
                self.key_buf.push(b);
            } else if b == b'\\' {
                self.escape = true;
                self.key_buf.push(b);
            } else if b == b'"' {
                self.in_string = false;
                if let Some(Frame::Object {
                    key,
                    expect_key: true,
                }) = self.frames.last_mut()
                {
                    let mut quoted = Vec::with_capacity(self.key_buf.len() + 2);
                    quoted.push(b'"');
                    quoted.extend_from_slice(&self.key_buf);
                    quoted.push(b'"');
                    *key = Some(
                        serde_json::from_slice(&quoted)
                            .unwrap_or_else(|_| String::from_utf8_lossy(&self.key_buf).into_owned()),
                    );
                }
            } else {
                self.key_buf.push(b);
            }
            return;
        }

        let top_level = self.frames.is_empty() && self.target.is_empty();
        match b {
            b'"' => {
                self.in_string = true;
                self.key_buf.clear();
            }
            b'[' if self.path_matches() => self.mode = Mode::Array,
            b'[' => self.frames.push(Frame::Array),
            b'{' if top_level => {
                self.mode = Mode::Lines;
                self.capture(b, out);
            }
            b'{' => self.frames.push(Frame::Object {
                key: None,
                expect_key: true,
            }),
            b':' => {
                if let Some(Frame::Object { expect_key, .. }) = self.frames.last_mut() {
                    *expect_key = false;
                }
            }
            b',' => {
                if let Some(Frame::Object { key, expect_key }) = self.frames.last_mut() {
                    *key = None;
                    *expect_key = true;
                }
            }
            b'}' | b']' => {
                self.frames.pop();
            }
            b if b.is_ascii_whitespace() => {}
            _ if top_level => {
                self.mode = Mode::Lines;
                self.capture(b, out);
            }
            _ => {}
        }
    }

    fn capture(&mut self, b: u8, out: &mut VecDeque<Bytes>) {
        if !self.capturing {
            match b {
                b if b.is_ascii_whitespace() || b == b',' => return,
                b']' if self.mode == Mode::Array => {
                    self.mode = Mode::Done;
                    return;
                }
                _ => {
                    self.capturing = true;
                    self.element.clear();
                    self.depth = 0;
                    self.scalar = b != b'{' && b != b'[';
                }
            }
        }

        if self.in_string {
            self.element.push(b);
            if self.escape {
                self.escape = false;
            } else if b == b'\\' {
                self.escape = true;
            } else if b == b'"' {
                self.in_string = false;
                if self.scalar && self.depth == 0 {
                    self.complete(out);
                }
            }
            return;
        }

        if self.scalar
            && self.depth == 0
            && !self.element.is_empty()
            && (b.is_ascii_whitespace() || matches!(b, b',' | b']' | b'}'))
        {
            self.complete(out);
            self.capture(b, out);
            return;
        }

        self.element.push(b);
        match b {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth = self.depth.saturating_sub(1);
                if self.depth == 0 {
                    self.complete(out);
                }
            }
            _ => {}
        }
    }

    fn complete(&mut self, out: &mut VecDeque<Bytes>) {
        // raw newlines can only be whitespace between tokens
        let element: Vec<u8> = self
            .element
            .drain(..)
            .map(|b| if b == b'\n' || b == b'\r' { b' ' } else { b })
            .collect();
        self.capturing = false;
        self.scalar = false;
        out.push_back(Bytes::from(element));
    }
}

pub struct JsonStreamSource {
    source_id: SourceId,
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    bearer_token: Option<SecretString>,
    records_path: Vec<String>,
    records_per_chunk: usize,
    /// Elements returned by `next()` so far
    emitted: u64,
    stream: Option<ByteStream>,
    scanner: ElementScanner,
    ready: VecDeque<Bytes>,
    /// Elements of the current response still to drop
    to_skip: u64,
    body_ended: bool,
}

impl JsonStreamSource {
    pub fn new(source_id: SourceId, config: &JsonStreamSourceConfig) -> Result<Self, SourceError> {
        let records_path: Vec<String> = config
            .records_path
            .as_deref()
            .map(|p| p.split('.').map(str::to_string).collect())
            .unwrap_or_default();
        Ok(Self {
            source_id,
            client: build_client(config.timeout_seconds)?,
            url: config.url.clone(),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            bearer_token: config.bearer_token.clone(),
            scanner: ElementScanner::new(records_path.clone()),
            records_path,
            records_per_chunk: config.records_per_chunk.max(1),
            emitted: 0,
            stream: None,
            ready: VecDeque::new(),
            to_skip: 0,
            body_ended: false,
        })
    }

    fn reset_stream(&mut self) {
        self.stream = None;
        self.ready.clear();
        self.body_ended = false;
        self.scanner = ElementScanner::new(self.records_path.clone());
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        let mut request = self.client.get(&self.url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret().as_str());
        }

        let context = format!("GET {}", self.url);
        let response = request.send().await.map_err(|e| request_error(&context, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(&context, status, &body));
        }

        self.reset_stream();
        self.to_skip = self.emitted;
        self.stream = Some(Box::pin(response.bytes_stream()));
        if self.emitted > 0 {
            tracing::info!(source_id = %self.source_id, skip = self.emitted, "Reconnected JSON stream");
        }
        Ok(())
    }

    /// Reads until a full chunk is ready or the body ends
    async fn fill(&mut self) -> Result<(), SourceError> {
        loop {
            while self.to_skip > 0 && self.ready.pop_front().is_some() {
                self.to_skip -= 1;
            }
            if self.body_ended || self.ready.len() >= self.records_per_chunk {
                return Ok(());
            }

            let Some(stream) = self.stream.as_mut() else {
                return Ok(());
            };
            match stream.next().await {
                Some(Ok(bytes)) => {
                    self.scanner.feed(&bytes, &mut self.ready);
                    if self.scanner.is_done() {
                        self.body_ended = true;
                        self.stream = None;
                    }
                }
                Some(Err(e)) => {
                    return Err(SourceError::transient(format!("JSON stream interrupted: {e}")));
                }
                None => {
                    self.scanner.finish(&mut self.ready)?;
                    self.body_ended = true;
                    self.stream = None;
                }
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for JsonStreamSource {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "json_stream"
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<RawChunk>, SourceError> {
        if self.stream.is_none() && !self.body_ended {
            self.connect().await?;
        }
        if let Err(e) = self.fill().await {
            self.reset_stream();
            return Err(e);
        }

        let take = self.records_per_chunk.min(self.ready.len());
        if take == 0 {
            return Ok(None);
        }
        let elements: Vec<Bytes> = self.ready.drain(..take).collect();

        let start = self.checkpoint();
        self.emitted += take as u64;
        let body = elements.join(&b'\n');
        Ok(Some(RawChunk::new(
            self.source_id.clone(),
            start,
            self.checkpoint(),
            Bytes::from(body),
        )))
    }

    fn checkpoint(&self) -> SourceCursor {
        SourceCursor::Stream {
            records: self.emitted,
        }
    }

    fn resume(&mut self, cursor: SourceCursor) -> Result<(), SourceError> {
        self.emitted = match cursor {
            SourceCursor::Start => 0,
            SourceCursor::Stream { records } => records,
            other => return Err(unsupported_cursor("json_stream", &other)),
        };
        self.reset_stream();
        Ok(())
    }

    fn decode(&self, chunk: &RawChunk) -> Vec<ProvisionalRecord> {
        let items: Vec<DecodedItem> = chunk
            .bytes
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| match serde_json::from_slice::<Value>(line) {
                Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
                Ok(_) => Err("record is not a JSON object".to_string()),
                Err(e) => Err(format!("invalid JSON: {e}")),
            })
            .collect();
        build_records(chunk, items)
    }

    async fn close(&mut self) {
        self.reset_stream();
    }
}
