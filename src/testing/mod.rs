//! Deterministic stand-ins for time and connections used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::connection::{Connection, Connector, EventSink, SocketEvent};
use crate::transport::frame::{ClientFrame, Handshake, ServerFrame, encode_attachment};
use crate::utils::clock::{Clock, IntervalTask, TimerId, TimerTask};
use crate::utils::error::{Error, Result};

enum Scheduled {
    Once(TimerTask),
    Every(Duration, IntervalTask),
}

struct Pending {
    id: TimerId,
    due: u64,
    task: Scheduled,
}

/// Clock whose time only moves through [`ManualClock::advance`].
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
    next_id: AtomicU64,
    pending: Mutex<Vec<Pending>>,
}

impl ManualClock {
    pub fn new(start: u64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(start),
            ..Default::default()
        })
    }

    /// Move time forward, running every timer that falls due on the way.
    pub fn advance(&self, millis: u64) {
        let target = self.now.load(Ordering::SeqCst) + millis;
        loop {
            let next = {
                let mut pending = self.pending.lock().unwrap();
                let earliest = pending
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.due <= target)
                    .min_by_key(|(_, p)| (p.due, p.id.0))
                    .map(|(index, _)| index);
                earliest.map(|index| pending.remove(index))
            };
            let Some(entry) = next else { break };

            self.now.store(entry.due, Ordering::SeqCst);
            match entry.task {
                Scheduled::Once(task) => task(),
                Scheduled::Every(period, task) => {
                    self.pending.lock().unwrap().push(Pending {
                        id: entry.id,
                        due: entry.due + period.as_millis().max(1) as u64,
                        task: Scheduled::Every(period, task.clone()),
                    });
                    task();
                }
            }
        }
        self.now.store(target, Ordering::SeqCst);
    }

    pub fn pending_timers(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn allocate(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn set_timeout(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = self.allocate();
        self.pending.lock().unwrap().push(Pending {
            id,
            due: self.now() + delay.as_millis() as u64,
            task: Scheduled::Once(task),
        });
        id
    }

    fn set_interval(&self, period: Duration, task: IntervalTask) -> TimerId {
        let id = self.allocate();
        self.pending.lock().unwrap().push(Pending {
            id,
            due: self.now() + period.as_millis().max(1) as u64,
            task: Scheduled::Every(period, task),
        });
        id
    }

    fn cancel(&self, id: TimerId) {
        self.pending.lock().unwrap().retain(|p| p.id != id);
    }
}

/// One connection opened through [`MockConnector`]; the test plays the server.
#[derive(Clone)]
pub struct MockSocket {
    pub url: String,
    sink: EventSink,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockSocket {
    pub fn open(&self) {
        (self.sink)(SocketEvent::Open);
    }

    pub fn close(&self) {
        (self.sink)(SocketEvent::Closed(Some("test".to_string())));
    }

    pub fn error(&self, message: &str) {
        (self.sink)(SocketEvent::Error(message.to_string()));
    }

    pub fn text(&self, text: &str) {
        (self.sink)(SocketEvent::Text(text.to_string()));
    }

    pub fn binary(&self, data: Vec<u8>) {
        (self.sink)(SocketEvent::Binary(data));
    }

    pub fn server(&self, frame: ServerFrame) {
        self.text(&frame.encode().expect("server frame encodes"));
    }

    pub fn attachment(&self, id: &str, data: &[u8]) {
        self.binary(encode_attachment(id, data).expect("attachment encodes"));
    }

    /// Open and complete the handshake.
    pub fn accept(&self) {
        self.open();
        self.server(ServerFrame::Handshake(Handshake {
            platform: Some(serde_json::json!("1.0")),
            ident: Some(serde_json::json!("ident-1")),
            ..Default::default()
        }));
    }

    pub fn sent(&self) -> Vec<ClientFrame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| ClientFrame::decode(text).expect("client frame decodes"))
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<ClientFrame> {
        self.sent()
            .into_iter()
            .filter(|f| matches!(f, ClientFrame::Message { .. }))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockConnection {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl Connection for MockConnection {
    fn send(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockConnector {
    sockets: Mutex<Vec<MockSocket>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sockets(&self) -> Vec<MockSocket> {
        self.sockets.lock().unwrap().clone()
    }

    pub fn latest(&self) -> MockSocket {
        self.sockets
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a connection was opened")
    }
}

impl Connector for MockConnector {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Connection> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.sockets.lock().unwrap().push(MockSocket {
            url: url.to_string(),
            sink,
            sent: sent.clone(),
            closed: closed.clone(),
        });
        Box::new(MockConnection { sent, closed })
    }
}
