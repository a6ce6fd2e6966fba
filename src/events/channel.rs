//! The notification channel: bounded publish, background fan-out.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::{sync::oneshot, task};

use super::event::PipelineEvent;
use super::sink::{EventSink, StdOutSink};

/// Capacity and timeout knobs for the channel.
#[derive(Clone, Debug)]
pub struct EventChannelConfig {
    /// Bounded channel capacity between publishers and the listener.
    pub capacity: usize,
    /// How long a publish may wait on a full channel before giving up.
    pub publish_timeout: Duration,
}

impl EventChannelConfig {
    pub const DEFAULT_CAPACITY: usize = 1024;
    pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

    #[must_use]
    pub fn new(capacity: usize, publish_timeout: Duration) -> Self {
        Self {
            capacity,
            publish_timeout,
        }
    }
}

impl Default for EventChannelConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            publish_timeout: Self::DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

struct Inner {
    sinks: Mutex<Vec<Box<dyn EventSink>>>,
    receiver: flume::Receiver<PipelineEvent>,
    listener: Mutex<Option<ListenerState>>,
}

/// Best-effort pub/sub bridge between the pipeline/workers and live
/// subscribers.
///
/// [`publish`](EventChannel::publish) never blocks longer than the
/// configured timeout and never returns an error: a full channel, a
/// stopped listener, or a failing sink is logged and dropped. Terminal
/// truth lives in the task store, not here.
#[derive(Clone)]
pub struct EventChannel {
    sender: flume::Sender<PipelineEvent>,
    publish_timeout: Duration,
    inner: Arc<Inner>,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::with_sink(EventChannelConfig::default(), StdOutSink::default())
    }
}

impl EventChannel {
    /// Create a channel with a single sink. The listener is not started;
    /// call [`listen`](Self::listen).
    pub fn with_sink<T>(config: EventChannelConfig, sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(config, vec![Box::new(sink)])
    }

    pub fn with_sinks(config: EventChannelConfig, sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (sender, receiver) = flume::bounded(config.capacity);
        Self {
            sender,
            publish_timeout: config.publish_timeout,
            inner: Arc::new(Inner {
                sinks: Mutex::new(sinks),
                receiver,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Dynamically add a sink (per-request streaming).
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.inner
            .sinks
            .lock()
            .expect("sinks poisoned")
            .push(Box::new(sink));
    }

    /// Publish an event. Fire-and-forget: waits at most the configured
    /// timeout for channel space, then logs and returns.
    pub fn publish(&self, event: PipelineEvent) {
        match self.sender.send_timeout(event, self.publish_timeout) {
            Ok(()) => {}
            Err(flume::SendTimeoutError::Timeout(event)) => {
                tracing::warn!(
                    task_id = %event.task_id(),
                    event_type = event.type_label(),
                    "event publish timed out; dropping"
                );
            }
            Err(flume::SendTimeoutError::Disconnected(event)) => {
                tracing::warn!(
                    task_id = %event.task_id(),
                    event_type = event.type_label(),
                    "event channel disconnected; dropping"
                );
            }
        }
    }

    /// Spawn the background fan-out task. Idempotent.
    pub fn listen(&self) {
        let mut guard = self.inner.listener.lock().expect("listener poisoned");
        if guard.is_some() {
            return;
        }

        let receiver = self.inner.receiver.clone();
        let inner = Arc::clone(&self.inner);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            let dispatch = |event: PipelineEvent| {
                let mut sinks = inner.sinks.lock().expect("sinks poisoned");
                for sink in sinks.iter_mut() {
                    if let Err(e) = sink.handle(&event) {
                        tracing::warn!(error = %e, "event sink error");
                    }
                }
            };
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(_) => return,
                        Ok(event) => dispatch(event),
                    }
                }
            }
            // Deliver anything still queued before the channel shuts down.
            while let Ok(event) = receiver.try_recv() {
                dispatch(event);
            }
        });

        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background fan-out task and wait for it to drain.
    pub async fn stop(&self) {
        let state = {
            let mut guard = self.inner.listener.lock().expect("listener poisoned");
            guard.take()
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(state) = guard.take() {
                let _ = state.shutdown_tx.send(());
                state.handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}
