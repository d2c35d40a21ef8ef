//! Bridge between a blocking generation call and an async consumer.
//!
//! [`StreamingBridge::spawn`] runs the work on a dedicated OS thread. The
//! work pushes tokens through a [`TokenSink`] into a bounded channel, so a
//! slow consumer applies backpressure to the producer. The consumer reads
//! [`TokenStream::next`] until the terminal `Done` or an error.
//!
//! Termination is explicit: the worker sends exactly one `Done(result)` or
//! `Failed(error)`. A channel that closes without either (the worker
//! panicked) is reported as [`ChatError::Streaming`].

use std::time::Duration;

use libre_chat_core::{ChatError, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default channel capacity, in tokens.
pub const DEFAULT_CAPACITY: usize = 64;

/// How long [`TokenStream::next`] waits before re-polling the channel.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
enum StreamEvent<T> {
    Token(String),
    Done(T),
    Failed(ChatError),
}

/// Producer handle given to the streaming work.
pub struct TokenSink<T> {
    tx: mpsc::Sender<StreamEvent<T>>,
}

impl<T> TokenSink<T> {
    /// Send one token, blocking while the channel is full.
    ///
    /// Tokens pushed after the consumer went away are dropped.
    pub fn push(&self, token: &str) {
        if self
            .tx
            .blocking_send(StreamEvent::Token(token.to_string()))
            .is_err()
        {
            debug!("Stream consumer dropped, discarding token");
        }
    }
}

/// An item yielded by [`TokenStream::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<T> {
    /// A new fragment and the text accumulated so far.
    Token { token: String, content: String },
    /// The final result. Nothing follows it.
    Done(T),
}

pub struct StreamingBridge;

impl StreamingBridge {
    /// Run `work` on a new thread and return the consuming end.
    pub fn spawn<T, F>(capacity: usize, poll_interval: Duration, work: F) -> TokenStream<T>
    where
        T: Send + 'static,
        F: FnOnce(&TokenSink<T>) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let spawned = std::thread::Builder::new()
            .name("libre-chat-stream".to_string())
            .spawn(move || {
                let sink = TokenSink { tx };
                let event = match work(&sink) {
                    Ok(result) => StreamEvent::Done(result),
                    Err(err) => {
                        warn!(error = %err, "Streaming generation failed");
                        StreamEvent::Failed(err)
                    }
                };
                let _ = sink.tx.blocking_send(event);
            });

        let pending_error = spawned.err().map(|e| {
            ChatError::Streaming(format!("cannot start generation thread: {}", e))
        });
        TokenStream {
            rx,
            poll_interval,
            content: String::new(),
            finished: false,
            pending_error,
        }
    }
}

/// Consuming end of a [`StreamingBridge`].
pub struct TokenStream<T> {
    rx: mpsc::Receiver<StreamEvent<T>>,
    poll_interval: Duration,
    content: String,
    finished: bool,
    pending_error: Option<ChatError>,
}

impl<T> TokenStream<T> {
    /// Next item, or `None` once the stream has terminated.
    pub async fn next(&mut self) -> Option<Result<StreamItem<T>>> {
        if self.finished {
            return None;
        }
        if let Some(err) = self.pending_error.take() {
            self.finished = true;
            return Some(Err(err));
        }
        loop {
            match tokio::time::timeout(self.poll_interval, self.rx.recv()).await {
                Err(_) => continue,
                Ok(Some(StreamEvent::Token(token))) => {
                    self.content.push_str(&token);
                    return Some(Ok(StreamItem::Token {
                        token,
                        content: self.content.clone(),
                    }));
                }
                Ok(Some(StreamEvent::Done(result))) => {
                    self.finished = true;
                    return Some(Ok(StreamItem::Done(result)));
                }
                Ok(Some(StreamEvent::Failed(err))) => {
                    self.finished = true;
                    return Some(Err(err));
                }
                Ok(None) => {
                    self.finished = true;
                    return Some(Err(ChatError::Streaming(
                        "generation worker stopped without a result".to_string(),
                    )));
                }
            }
        }
    }

    /// Text accumulated from the tokens received so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Drain the stream and return the final result.
    pub async fn collect(mut self) -> Result<T> {
        while let Some(item) = self.next().await {
            if let StreamItem::Done(result) = item? {
                return Ok(result);
            }
        }
        Err(ChatError::Streaming("stream already finished".to_string()))
    }
}
