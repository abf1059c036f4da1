use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, ErrorKind, Result};
use crate::transport::{Message, Transport, TransportListener};

#[derive(Default)]
struct Recorder {
    connected: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    send_calls: usize,
    sent: Vec<Message>,
    subscriptions: Vec<String>,
    unsubscriptions: Vec<String>,
    inbound: VecDeque<Message>,
    fail_connect: bool,
    fail_send: bool,
    fail_subscribe: bool,
    listeners: Vec<Arc<dyn TransportListener>>,
}

// An in-memory transport which records every call.
//
// Clones share the same state, so a test can keep a handle to inspect the
// transport while the communication owns another one. Queued inbound
// messages are all delivered, as a broker with a wildcard subscription would.
#[derive(Clone, Default)]
pub(crate) struct MemoryTransport(Arc<Mutex<Recorder>>);

impl MemoryTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.0.lock().unwrap()
    }

    // Listeners run without the lock held.
    fn notify(&self, event: impl Fn(&dyn TransportListener)) {
        let listeners = self.recorder().listeners.clone();
        for listener in &listeners {
            event(listener.as_ref());
        }
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn TransportListener>) {
        self.recorder().listeners.push(listener);
    }

    pub(crate) fn deliver(&self, message: Message) {
        self.recorder().inbound.push_back(message);
    }

    pub(crate) fn fail_connect(&self, fail: bool) {
        self.recorder().fail_connect = fail;
    }

    pub(crate) fn fail_send(&self, fail: bool) {
        self.recorder().fail_send = fail;
    }

    pub(crate) fn fail_subscribe(&self, fail: bool) {
        self.recorder().fail_subscribe = fail;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.recorder().connected
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.recorder().connect_calls
    }

    pub(crate) fn disconnect_calls(&self) -> usize {
        self.recorder().disconnect_calls
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.recorder().send_calls
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.recorder().sent.clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.recorder().subscriptions.clone()
    }

    pub(crate) fn unsubscriptions(&self) -> Vec<String> {
        self.recorder().unsubscriptions.clone()
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<()> {
        let failed = {
            let mut recorder = self.recorder();
            recorder.connect_calls += 1;
            recorder.connected = !recorder.fail_connect;
            recorder.fail_connect
        };

        if failed {
            let error = Error::new(ErrorKind::Connection, "Broker unreachable");
            self.notify(|listener| listener.on_connection_failed(&error));
            return Err(error);
        }

        self.notify(|listener| listener.on_connect());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        self.notify(|listener| listener.on_disconnect());
        let mut recorder = self.recorder();
        recorder.disconnect_calls += 1;
        recorder.connected = false;
        Ok(())
    }

    fn send(&mut self, channel: &str, payload: &[u8]) -> Result<()> {
        let mut recorder = self.recorder();
        if !recorder.connected {
            return Err(Error::new(ErrorKind::NotConnected, "Send before connect"));
        }

        recorder.send_calls += 1;
        if recorder.fail_send {
            return Err(Error::new(ErrorKind::SendFailure, "Link down"));
        }

        recorder.sent.push(Message::new(channel, payload));
        Ok(())
    }

    fn poll(&mut self) -> Option<Message> {
        self.recorder().inbound.pop_front()
    }

    fn subscribe(&mut self, channel: &str) -> Result<()> {
        let mut recorder = self.recorder();
        if !recorder.connected {
            return Err(Error::new(
                ErrorKind::NotConnected,
                "Subscription before connect",
            ));
        }

        if recorder.fail_subscribe {
            return Err(Error::new(ErrorKind::Subscription, "Subscription refused"));
        }

        recorder.subscriptions.push(channel.into());
        drop(recorder);

        self.notify(|listener| listener.on_subscribe(channel));
        Ok(())
    }

    fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.notify(|listener| listener.on_unsubscribe(channel));
        self.recorder().unsubscriptions.push(channel.into());
        Ok(())
    }
}

// A listener which records the received events as text.
#[derive(Default)]
pub(crate) struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }
}

impl TransportListener for EventLog {
    fn on_connect(&self) {
        self.record("connect".into());
    }

    fn on_connection_failed(&self, reason: &Error) {
        self.record(format!("connection failed: {}", reason.description()));
    }

    fn on_disconnect(&self) {
        self.record("disconnect".into());
    }

    fn on_connection_lost(&self, reason: &Error) {
        self.record(format!("connection lost: {}", reason.description()));
    }

    fn on_subscribe(&self, channel: &str) {
        self.record(format!("subscribe {channel}"));
    }

    fn on_unsubscribe(&self, channel: &str) {
        self.record(format!("unsubscribe {channel}"));
    }
}
