//! SQS-backed message queue.

use std::time::Duration;

use async_trait::async_trait;

use pubflow_core::queue::{MessageQueue, QueueError, QueueMessage};

/// [`MessageQueue`] implementation over SQS long-polling.
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueue {
    /// Resolve a queue by name using the ambient AWS configuration.
    pub async fn connect(queue_name: &str) -> Result<Self, QueueError> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let client = aws_sdk_sqs::Client::new(&config);

        let queue_url = client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?
            .queue_url()
            .ok_or_else(|| QueueError::Transport(format!("no url for queue {queue_name}")))?
            .to_string();

        Ok(Self { client, queue_url })
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn send(&self, body: String) -> Result<(), QueueError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        // SQS caps long-poll waits at 20 seconds.
        let wait_seconds = wait.as_secs().min(20) as i32;
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait_seconds)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;

        let Some(message) = output.messages().first() else {
            return Ok(None);
        };

        let receipt = message
            .receipt_handle()
            .ok_or_else(|| QueueError::Transport("message without receipt handle".into()))?;
        Ok(Some(QueueMessage {
            id: receipt.to_string(),
            body: message.body().unwrap_or_default().to_string(),
        }))
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.id)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;
        Ok(())
    }
}
