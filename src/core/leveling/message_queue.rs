// Message queue: chat events are buffered in a bounded channel and drained
// by a single consumer on a fixed interval.
//
// The gateway handler only ever calls `MessageQueue::enqueue`, which never
// waits. When the queue is full the message is dropped with a warning. The
// consumer leaves everything queued while the store is not ready.

use super::leveling_models::ChatEvent;
use super::leveling_service::{LevelingError, LevelingService, MessageOutcome};
use super::leveling_store::{LevelStore, SettingsStore};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(30);

/// Something that can consume queued chat events.
#[async_trait]
pub trait ChatProcessor: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn process(&self, event: &ChatEvent) -> Result<MessageOutcome, LevelingError>;

    /// Called once after every non-empty batch.
    fn finish_batch(&self) {}
}

#[async_trait]
impl<S, G> ChatProcessor for LevelingService<S, G>
where
    S: LevelStore + 'static,
    G: SettingsStore + 'static,
{
    fn is_ready(&self) -> bool {
        self.readiness().is_ready()
    }

    async fn process(&self, event: &ChatEvent) -> Result<MessageOutcome, LevelingError> {
        self.process_message(event).await
    }

    fn finish_batch(&self) {
        self.locks.prune();
        self.settings_locks.prune();
    }
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    tx: mpsc::Sender<ChatEvent>,
}

/// Consumer half, owned by the drain task.
#[derive(Debug)]
pub struct MessageQueueReceiver {
    rx: mpsc::Receiver<ChatEvent>,
}

pub fn message_queue(capacity: usize) -> (MessageQueue, MessageQueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MessageQueue { tx }, MessageQueueReceiver { rx })
}

impl MessageQueue {
    /// Queue a message for the next drain. Returns `false` if it was dropped.
    pub fn enqueue(&self, event: ChatEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    user_id = event.author_id,
                    guild_id = event.guild_id,
                    "Message queue is full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("Message queue consumer is gone, dropping message");
                false
            }
        }
    }
}

/// Outcome of a single drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub processed: usize,
    pub failed: usize,
}

impl MessageQueueReceiver {
    /// Process everything queued right now, in arrival order.
    ///
    /// Does nothing while the processor is not ready.
    pub async fn drain_once<P>(&mut self, processor: &P) -> DrainStats
    where
        P: ChatProcessor + ?Sized,
    {
        let mut stats = DrainStats::default();
        if !processor.is_ready() {
            tracing::debug!("Message queue drain skipped, store not ready");
            return stats;
        }

        let mut batch = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            batch.push(event);
        }

        for event in batch {
            match processor.process(&event).await {
                Ok(_) => stats.processed += 1,
                Err(err) => {
                    stats.failed += 1;
                    tracing::error!(
                        user_id = event.author_id,
                        guild_id = event.guild_id,
                        error = %err,
                        "Error while giving xp"
                    );
                }
            }
        }

        if stats.processed + stats.failed > 0 {
            processor.finish_batch();
            tracing::debug!(
                processed = stats.processed,
                failed = stats.failed,
                "Message queue drained"
            );
        }
        stats
    }

    /// Drain on every tick until all producers are gone.
    pub async fn run<P>(mut self, processor: Arc<P>, every: Duration)
    where
        P: ChatProcessor + ?Sized,
    {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.drain_once(processor.as_ref()).await;
            if self.rx.is_closed() && self.rx.is_empty() {
                tracing::info!("Message queue closed, consumer exiting");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::throttle::RejectReason;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeProcessor {
        ready: AtomicBool,
        seen: Mutex<Vec<u64>>,
        fail_for: u64,
    }

    impl FakeProcessor {
        fn new(ready: bool) -> Self {
            Self {
                ready: AtomicBool::new(ready),
                seen: Mutex::new(Vec::new()),
                fail_for: 0,
            }
        }
    }

    #[async_trait]
    impl ChatProcessor for FakeProcessor {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn process(&self, event: &ChatEvent) -> Result<MessageOutcome, LevelingError> {
            self.seen.lock().unwrap().push(event.author_id);
            if event.author_id == self.fail_for {
                return Err(LevelingError::invalid("broken record"));
            }
            Ok(MessageOutcome::Rejected(RejectReason::TooShort))
        }
    }

    fn event(author_id: u64) -> ChatEvent {
        ChatEvent {
            author_id,
            author_name: "someone".into(),
            author_is_bot: false,
            guild_id: 1,
            channel_id: 2,
            content: "hello there general".into(),
            arrived_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn drains_in_arrival_order() {
        let (queue, mut rx) = message_queue(16);
        for id in [3, 1, 2] {
            assert!(queue.enqueue(event(id)));
        }
        let processor = FakeProcessor::new(true);
        let stats = rx.drain_once(&processor).await;
        assert_eq!(stats, DrainStats { processed: 3, failed: 0 });
        assert_eq!(*processor.seen.lock().unwrap(), vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn full_queue_drops_messages() {
        let (queue, _rx) = message_queue(2);
        assert!(queue.enqueue(event(1)));
        assert!(queue.enqueue(event(2)));
        assert!(!queue.enqueue(event(3)));
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let (queue, mut rx) = message_queue(16);
        for id in 1..=4 {
            queue.enqueue(event(id));
        }
        let mut processor = FakeProcessor::new(true);
        processor.fail_for = 2;
        let stats = rx.drain_once(&processor).await;
        assert_eq!(stats, DrainStats { processed: 3, failed: 1 });
        assert_eq!(processor.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn not_ready_keeps_messages_queued() {
        let (queue, mut rx) = message_queue(16);
        queue.enqueue(event(1));
        let processor = FakeProcessor::new(false);
        assert_eq!(rx.drain_once(&processor).await, DrainStats::default());
        assert!(processor.seen.lock().unwrap().is_empty());

        processor.ready.store(true, Ordering::SeqCst);
        assert_eq!(rx.drain_once(&processor).await.processed, 1);
    }

    #[tokio::test]
    async fn consumer_exits_when_producers_are_dropped() {
        let (queue, rx) = message_queue(16);
        queue.enqueue(event(1));
        drop(queue);
        let processor = Arc::new(FakeProcessor::new(true));
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.run(Arc::clone(&processor), Duration::from_millis(5)),
        )
        .await
        .unwrap();
        assert_eq!(*processor.seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn real_service_processes_queued_messages() {
        let h = crate::core::leveling::leveling_service::test_support::harness();
        let (queue, mut rx) = message_queue(4);
        queue.enqueue(event(9));
        let stats = rx.drain_once(&h.service).await;
        assert_eq!(stats.processed, 1);
        assert!(h.store.get_user(9).await.unwrap().is_some());
    }
}
