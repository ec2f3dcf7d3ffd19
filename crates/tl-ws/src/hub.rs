use crate::frames::{ClientFrame, ServerFrame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Outbound frames queued per attachment before the socket write pump drains
/// them. A full queue closes the attachment (slow-consumer policy).
pub const ATTACHMENT_QUEUE_CAPACITY: usize = 256;

pub type OnMessage = Box<dyn Fn(&Arc<Attachment>, ClientFrame) + Send + Sync>;
pub type OnEmpty = Box<dyn Fn() + Send + Sync>;

/// Server side of one live client connection. Holds no authoritative state —
/// just the outbound queue and a closed flag.
pub struct Attachment {
    id: Uuid,
    tx: mpsc::Sender<ServerFrame>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Attachment {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(ATTACHMENT_QUEUE_CAPACITY);
        (
            Arc::new(Self {
                id: Uuid::new_v4(),
                tx,
                closed: AtomicBool::new(false),
                close_signal: Notify::new(),
            }),
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Enqueues a frame without blocking. A slow consumer whose queue is full
    /// gets closed rather than stalling the broadcast path.
    pub fn send(&self, frame: ServerFrame) {
        if self.is_closed() {
            return;
        }
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(attachment_id = %self.id, "send queue full, closing attachment");
                self.close();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.close(),
        }
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the attachment is closed.
    pub async fn wait_closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }
}

/// The set of attachments for one session plus the broadcast policy.
pub struct Hub {
    session_id: String,
    attachments: RwLock<HashMap<Uuid, Arc<Attachment>>>,
    on_message: RwLock<Option<OnMessage>>,
    on_empty: RwLock<Option<OnEmpty>>,
}

impl Hub {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            attachments: RwLock::new(HashMap::new()),
            on_message: RwLock::new(None),
            on_empty: RwLock::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn set_on_message(&self, callback: Option<OnMessage>) {
        *self.on_message.write().unwrap_or_else(|e| e.into_inner()) = callback;
    }

    pub fn set_on_empty(&self, callback: Option<OnEmpty>) {
        *self.on_empty.write().unwrap_or_else(|e| e.into_inner()) = callback;
    }

    pub fn register(&self, attachment: Arc<Attachment>) {
        self.attachments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(attachment.id(), attachment);
    }

    /// Removes and closes the attachment. Dropping to zero attachments fires
    /// the on-empty callback; the PTY process is never touched here.
    pub fn unregister(&self, attachment: &Arc<Attachment>) {
        let remaining = {
            let mut attachments = self.attachments.write().unwrap_or_else(|e| e.into_inner());
            attachments.remove(&attachment.id());
            attachments.len()
        };
        attachment.close();

        if remaining == 0 {
            let on_empty = self.on_empty.read().unwrap_or_else(|e| e.into_inner());
            if let Some(on_empty) = on_empty.as_ref() {
                on_empty();
            }
        }
    }

    pub fn broadcast(&self, frame: &ServerFrame) {
        let attachments = self.attachments.read().unwrap_or_else(|e| e.into_inner());
        for attachment in attachments.values() {
            attachment.send(frame.clone());
        }
    }

    /// Forwards one attachment-originated frame to the on-message callback.
    pub fn handle_message(&self, attachment: &Arc<Attachment>, frame: ClientFrame) {
        let on_message = self.on_message.read().unwrap_or_else(|e| e.into_inner());
        if let Some(on_message) = on_message.as_ref() {
            on_message(attachment, frame);
        }
    }

    pub fn client_count(&self) -> usize {
        self.attachments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn has_clients(&self) -> bool {
        self.client_count() > 0
    }

    pub fn close(&self) {
        let attachments: Vec<Arc<Attachment>> = {
            let mut map = self.attachments.write().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, a)| a).collect()
        };
        for attachment in attachments {
            attachment.close();
        }
    }
}

/// Session id to hub, created on demand.
pub struct HubManager {
    hubs: RwLock<HashMap<String, Arc<Hub>>>,
}

impl HubManager {
    pub fn new() -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<Hub> {
        let mut hubs = self.hubs.write().unwrap_or_else(|e| e.into_inner());
        hubs.entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Hub::new(session_id)))
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Hub>> {
        self.hubs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    pub fn remove(&self, session_id: &str) {
        let hub = self
            .hubs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(hub) = hub {
            hub.close();
        }
    }

    pub fn close_all(&self) {
        let hubs: Vec<Arc<Hub>> = {
            let mut map = self.hubs.write().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, h)| h).collect()
        };
        for hub in hubs {
            hub.close();
        }
    }
}

impl Default for HubManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn register_and_count() {
        let hub = Hub::new("s1");
        let (a, _rx_a) = Attachment::new();
        let (b, _rx_b) = Attachment::new();
        hub.register(a);
        hub.register(b);
        assert_eq!(hub.client_count(), 2);
        assert!(hub.has_clients());
    }

    #[test]
    fn broadcast_reaches_every_attachment() {
        let hub = Hub::new("s1");
        let (a, mut rx_a) = Attachment::new();
        let (b, mut rx_b) = Attachment::new();
        hub.register(a);
        hub.register(b);

        hub.broadcast(&ServerFrame::Stdout {
            data: "hi".to_string(),
        });
        assert!(matches!(rx_a.try_recv(), Ok(ServerFrame::Stdout { data }) if data == "hi"));
        assert!(matches!(rx_b.try_recv(), Ok(ServerFrame::Stdout { data }) if data == "hi"));
    }

    #[test]
    fn broadcast_preserves_enqueue_order() {
        let hub = Hub::new("s1");
        let (a, mut rx) = Attachment::new();
        hub.register(a);

        for n in 0..5 {
            hub.broadcast(&ServerFrame::Stdout {
                data: n.to_string(),
            });
        }
        for n in 0..5 {
            assert!(matches!(rx.try_recv(), Ok(ServerFrame::Stdout { data }) if data == n.to_string()));
        }
    }

    #[test]
    fn unregister_last_attachment_fires_on_empty() {
        let hub = Hub::new("s1");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        hub.set_on_empty(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let (a, _rx_a) = Attachment::new();
        let (b, _rx_b) = Attachment::new();
        hub.register(Arc::clone(&a));
        hub.register(Arc::clone(&b));

        hub.unregister(&a);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        hub.unregister(&b);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[test]
    fn slow_consumer_is_closed() {
        let hub = Hub::new("s1");
        let (a, _rx) = Attachment::new();
        hub.register(Arc::clone(&a));

        // Never drain the queue; overflowing it must close the attachment.
        for n in 0..(ATTACHMENT_QUEUE_CAPACITY + 1) {
            hub.broadcast(&ServerFrame::Stdout {
                data: n.to_string(),
            });
        }
        assert!(a.is_closed());
    }

    #[test]
    fn send_after_close_is_dropped() {
        let (a, mut rx) = Attachment::new();
        a.close();
        a.send(ServerFrame::Pong);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_closed_resolves_after_close() {
        let (a, _rx) = Attachment::new();
        let waiter = Arc::clone(&a);
        let handle = tokio::spawn(async move { waiter.wait_closed().await });
        a.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_closed_resolves_when_already_closed() {
        let (a, _rx) = Attachment::new();
        a.close();
        a.wait_closed().await;
    }

    #[test]
    fn handle_message_routes_to_callback() {
        let hub = Hub::new("s1");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        hub.set_on_message(Some(Box::new(move |_att, frame| {
            if matches!(frame, ClientFrame::Ping) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })));

        let (a, _rx) = Attachment::new();
        hub.register(Arc::clone(&a));
        hub.handle_message(&a, ClientFrame::Ping);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hub_close_empties_and_closes() {
        let hub = Hub::new("s1");
        let (a, _rx) = Attachment::new();
        hub.register(Arc::clone(&a));
        hub.close();
        assert_eq!(hub.client_count(), 0);
        assert!(a.is_closed());
    }

    #[test]
    fn manager_get_or_create_is_idempotent() {
        let mgr = HubManager::new();
        let first = mgr.get_or_create("s1");
        let second = mgr.get_or_create("s1");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(mgr.get("s2").is_none());
    }

    #[test]
    fn manager_remove_closes_hub() {
        let mgr = HubManager::new();
        let hub = mgr.get_or_create("s1");
        let (a, _rx) = Attachment::new();
        hub.register(Arc::clone(&a));

        mgr.remove("s1");
        assert!(a.is_closed());
        assert!(mgr.get("s1").is_none());
    }
}
