use async_trait::async_trait;
use jobrunner_core::SchedulerResult;
use jobrunner_domain::{NotificationSink, StatusChangedEvent};
use tokio::sync::broadcast;
use tracing::trace;

/// 基于tokio广播通道的状态变更通知
///
/// 发布从不阻塞；订阅方处理过慢时会丢失最旧的通知（`RecvError::Lagged`）。
#[derive(Debug, Clone)]
pub struct BroadcastNotificationSink {
    sender: broadcast::Sender<StatusChangedEvent>,
}

impl BroadcastNotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChangedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotificationSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotificationSink {
    async fn publish(&self, event: StatusChangedEvent) -> SchedulerResult<()> {
        let identifier = event.task.identifier.clone();
        // 没有订阅者时send返回错误，这不算发布失败
        if self.sender.send(event).is_err() {
            trace!("没有状态订阅者，丢弃通知: {}", identifier);
        }
        Ok(())
    }
}
