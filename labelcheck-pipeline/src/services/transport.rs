//! Message transport
//!
//! At-least-once, unordered delivery. Handlers must tolerate duplicates and
//! any arrival order; nothing here promises more.

use async_trait::async_trait;
use labelcheck_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::coordinator::{self, PipelineContext};
use crate::models::{CompletionMessage, FanOutMessage, UploadTrigger};

/// Any message the pipeline publishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineMessage {
    Upload(UploadTrigger),
    FanOut(FanOutMessage),
    Completion(CompletionMessage),
}

impl PipelineMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineMessage::Upload(_) => "upload",
            PipelineMessage::FanOut(_) => "fan_out",
            PipelineMessage::Completion(_) => "completion",
        }
    }

    pub fn job_id(&self) -> uuid::Uuid {
        match self {
            PipelineMessage::Upload(m) => m.job_id,
            PipelineMessage::FanOut(m) => m.job_id,
            PipelineMessage::Completion(m) => m.job_id,
        }
    }
}

/// Publishing side of the transport
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn publish_upload(&self, message: UploadTrigger) -> Result<()>;

    /// Publish the whole fan-out batch
    async fn publish_fan_out(&self, batch: Vec<FanOutMessage>) -> Result<()>;

    async fn publish_completion(&self, message: CompletionMessage) -> Result<()>;
}

/// Message plus its delivery attempt number (1-based)
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: PipelineMessage,
    pub attempt: u32,
}

/// In-process transport backed by an unbounded channel
///
/// Pair with a [`Dispatcher`] consuming the receiver.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, message: PipelineMessage) -> Result<()> {
        self.tx
            .send(Delivery {
                message,
                attempt: 1,
            })
            .map_err(|_| Error::Internal("transport channel closed".to_string()))
    }
}

#[async_trait]
impl MessageTransport for ChannelTransport {
    async fn publish_upload(&self, message: UploadTrigger) -> Result<()> {
        self.send(PipelineMessage::Upload(message))
    }

    async fn publish_fan_out(&self, batch: Vec<FanOutMessage>) -> Result<()> {
        for message in batch {
            self.send(PipelineMessage::FanOut(message))?;
        }
        Ok(())
    }

    async fn publish_completion(&self, message: CompletionMessage) -> Result<()> {
        self.send(PipelineMessage::Completion(message))
    }
}

/// Redelivery policy for the in-process dispatcher
#[derive(Debug, Clone, Copy)]
pub struct DispatcherOptions {
    /// Attempts per message before it is dropped
    pub max_deliveries: u32,
    /// Delay before redelivering a message whose handler failed
    pub redelivery_backoff: Duration,
    /// Deliver every fresh message twice
    pub duplicate_delivery: bool,
}

/// Consumes a [`ChannelTransport`] and invokes the coordinators
///
/// One task per delivery, so deliveries for the same job run concurrently.
/// A handler error is redelivered after a backoff, up to `max_deliveries`.
pub struct Dispatcher {
    ctx: Arc<PipelineContext>,
    rx: mpsc::UnboundedReceiver<Delivery>,
    redeliver: mpsc::UnboundedSender<Delivery>,
    options: DispatcherOptions,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<PipelineContext>,
        transport: &ChannelTransport,
        rx: mpsc::UnboundedReceiver<Delivery>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            ctx,
            rx,
            redeliver: transport.tx.clone(),
            options,
        }
    }

    /// Run until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::info!(
            max_deliveries = self.options.max_deliveries,
            duplicate_delivery = self.options.duplicate_delivery,
            "Dispatcher started"
        );

        while let Some(delivery) = self.rx.recv().await {
            if self.options.duplicate_delivery && delivery.attempt == 1 {
                self.deliver(delivery.clone());
            }
            self.deliver(delivery);
        }

        tracing::info!("Dispatcher stopped: transport closed");
    }

    fn deliver(&self, delivery: Delivery) {
        let ctx = Arc::clone(&self.ctx);
        let redeliver = self.redeliver.clone();
        let options = self.options;

        tokio::spawn(async move {
            let kind = delivery.message.kind();
            let job_id = delivery.message.job_id();

            match coordinator::dispatch(&ctx, delivery.message.clone()).await {
                Ok(outcome) => {
                    tracing::debug!(job_id = %job_id, kind, attempt = delivery.attempt, ?outcome, "Delivered");
                }
                Err(e) if delivery.attempt < options.max_deliveries => {
                    tracing::warn!(
                        job_id = %job_id,
                        kind,
                        attempt = delivery.attempt,
                        error = %e,
                        "Handler failed, scheduling redelivery"
                    );
                    tokio::time::sleep(options.redelivery_backoff).await;
                    let next = Delivery {
                        message: delivery.message,
                        attempt: delivery.attempt + 1,
                    };
                    if redeliver.send(next).is_err() {
                        tracing::error!(job_id = %job_id, kind, "Transport closed, redelivery dropped");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job_id,
                        kind,
                        attempts = delivery.attempt,
                        error = %e,
                        "Handler failed, delivery attempts exhausted"
                    );
                }
            }
        });
    }
}

/// FIFO transport for sequential mode and tests
///
/// Keeps both the pending queue and the full publish history.
#[derive(Default)]
pub struct QueueTransport {
    pending: Mutex<VecDeque<PipelineMessage>>,
    history: Mutex<Vec<PipelineMessage>>,
}

impl QueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, message: PipelineMessage) {
        self.history.lock().await.push(message.clone());
        self.pending.lock().await.push_back(message);
    }

    /// Next pending message, oldest first
    pub async fn pop(&self) -> Option<PipelineMessage> {
        self.pending.lock().await.pop_front()
    }

    /// Remove and return every pending message
    pub async fn drain(&self) -> Vec<PipelineMessage> {
        self.pending.lock().await.drain(..).collect()
    }

    /// Every message ever published, in publish order
    pub async fn published(&self) -> Vec<PipelineMessage> {
        self.history.lock().await.clone()
    }

    pub async fn fan_outs(&self) -> Vec<FanOutMessage> {
        self.published()
            .await
            .into_iter()
            .filter_map(|m| match m {
                PipelineMessage::FanOut(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub async fn completions(&self) -> Vec<CompletionMessage> {
        self.published()
            .await
            .into_iter()
            .filter_map(|m| match m {
                PipelineMessage::Completion(c) => Some(c),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessageTransport for QueueTransport {
    async fn publish_upload(&self, message: UploadTrigger) -> Result<()> {
        self.push(PipelineMessage::Upload(message)).await;
        Ok(())
    }

    async fn publish_fan_out(&self, batch: Vec<FanOutMessage>) -> Result<()> {
        for message in batch {
            self.push(PipelineMessage::FanOut(message)).await;
        }
        Ok(())
    }

    async fn publish_completion(&self, message: CompletionMessage) -> Result<()> {
        self.push(PipelineMessage::Completion(message)).await;
        Ok(())
    }
}

/// Push transport: POSTs each message to a service exposing the `/push/*` endpoints
///
/// A non-2xx reply or a timeout is a publish failure. The receiving endpoints
/// answer 202 once the message parses and own its redelivery from there, so
/// `timeout` only has to cover the acknowledgement.
pub struct HttpPushTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpPushTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("push transport client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("push to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "push to {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for HttpPushTransport {
    async fn publish_upload(&self, message: UploadTrigger) -> Result<()> {
        self.post("/push/upload", &message).await
    }

    async fn publish_fan_out(&self, batch: Vec<FanOutMessage>) -> Result<()> {
        // Pushes are independent deliveries; a failed push leaves the job
        // EXTRACTED and the upload-trigger redelivery re-publishes the batch.
        let results = futures::future::join_all(
            batch.iter().map(|message| self.post("/push/fan-out", message)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    async fn publish_completion(&self, message: CompletionMessage) -> Result<()> {
        self.post("/push/completion", &message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_queue_transport_is_fifo_and_records_history() {
        let queue = QueueTransport::new();
        let job_id = Uuid::new_v4();
        queue.publish_upload(UploadTrigger { job_id }).await.unwrap();
        queue
            .publish_completion(CompletionMessage {
                job_id,
                group_name: "identity".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(queue.pop().await.unwrap().kind(), "upload");
        assert_eq!(queue.drain().await.len(), 1);
        assert!(queue.pop().await.is_none());
        assert_eq!(queue.published().await.len(), 2);
        assert_eq!(queue.completions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_transport_delivers_first_attempt() {
        let (transport, mut rx) = ChannelTransport::new();
        let job_id = Uuid::new_v4();
        transport
            .publish_fan_out(vec![FanOutMessage {
                job_id,
                group_name: "tables".to_string(),
                facts_reference: "facts/x".to_string(),
            }])
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.attempt, 1);
        assert_eq!(delivery.message.job_id(), job_id);
    }

    #[test]
    fn test_message_wire_format() {
        let message = PipelineMessage::Completion(CompletionMessage {
            job_id: Uuid::nil(),
            group_name: "content".to_string(),
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["kind"], "completion");
        assert_eq!(value["group_name"], "content");
    }
}
