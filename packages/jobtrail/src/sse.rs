//! `text/event-stream` connector over reqwest.
//!
//! Only `data:` fields matter to the assistant stream; `event:`, `id:` and
//! `retry:` are read and ignored, and reconnection is left to the transport.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use futures::{StreamExt, stream};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Url};
use tracing::debug;

use jobtrail_transport::{Connector, PayloadStream, StreamEndpoint, TransportError};

/// Incremental SSE framing.
///
/// Bytes go in as they arrive; complete event payloads (all `data:` lines of
/// one event joined by `\n`) come out. An event whose data grows past
/// `max_event_bytes` is discarded whole rather than buffered.
#[derive(Debug)]
pub struct SseParser {
    line: Vec<u8>,
    /// The current line holds something other than `\r`, stored or not.
    line_has_content: bool,
    data: String,
    has_data: bool,
    oversized: bool,
    max_event_bytes: usize,
}

impl SseParser {
    pub fn new(max_event_bytes: usize) -> Self {
        Self {
            line: Vec::new(),
            line_has_content: false,
            data: String::new(),
            has_data: false,
            oversized: false,
            max_event_bytes,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                // Blankness comes from what arrived, not from what was kept:
                // lines of a discarded event are never buffered.
                let blank = !std::mem::replace(&mut self.line_has_content, false);
                if blank {
                    if let Some(event) = self.dispatch() {
                        events.push(event);
                    }
                } else if !self.oversized {
                    self.process_line(&line);
                }
            } else {
                if byte != b'\r' {
                    self.line_has_content = true;
                }
                if !self.oversized {
                    self.line.push(byte);
                    if self.line.len() > self.max_event_bytes {
                        self.discard_event();
                    }
                }
            }
        }
        events
    }

    fn process_line(&mut self, line: &[u8]) {
        if line.first() == Some(&b':') {
            return;
        }

        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        if field == "data" {
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(value);
            self.has_data = true;
            if self.data.len() > self.max_event_bytes {
                self.discard_event();
            }
        }
    }

    fn dispatch(&mut self) -> Option<String> {
        let oversized = std::mem::replace(&mut self.oversized, false);
        let has_data = std::mem::replace(&mut self.has_data, false);
        let data = std::mem::take(&mut self.data);
        (has_data && !oversized).then_some(data)
    }

    fn discard_event(&mut self) {
        debug!(limit = self.max_event_bytes, "Discarding oversized SSE event");
        self.oversized = true;
        self.line.clear();
        self.data.clear();
    }
}

/// Opens the assistant stream on the configured origin.
#[derive(Clone)]
pub struct SseConnector {
    client: Client,
    origin: Url,
    max_event_bytes: usize,
}

impl SseConnector {
    /// `max_event_bytes` bounds parser memory. Keep it above the transport's
    /// payload limit so oversized payloads still reach it and get counted.
    pub fn new(client: Client, origin: Url, max_event_bytes: usize) -> Self {
        Self {
            client,
            origin,
            max_event_bytes,
        }
    }
}

impl Connector for SseConnector {
    fn open(
        &self,
        endpoint: &StreamEndpoint,
    ) -> BoxFuture<'static, Result<PayloadStream, TransportError>> {
        let url = self.origin.join(endpoint.as_str());
        let client = self.client.clone();
        let max_event_bytes = self.max_event_bytes;

        Box::pin(async move {
            let url = url.map_err(|e| TransportError::Connect(e.to_string()))?;
            let response = client
                .get(url)
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Connect(format!("server answered {status}")));
            }

            let chunks = Box::pin(response.bytes_stream());
            let parser = SseParser::new(max_event_bytes);
            let payloads = stream::unfold(
                (chunks, parser, VecDeque::new()),
                |(mut chunks, mut parser, mut ready)| async move {
                    loop {
                        if let Some(payload) = ready.pop_front() {
                            return Some((Ok(payload), (chunks, parser, ready)));
                        }
                        match chunks.next().await {
                            Some(Ok(chunk)) => ready.extend(parser.feed(&chunk)),
                            Some(Err(err)) => {
                                let err = TransportError::Stream(err.to_string());
                                return Some((Err(err), (chunks, parser, ready)));
                            }
                            None => return None,
                        }
                    }
                },
            );
            Ok(payloads.boxed())
        })
    }
}
