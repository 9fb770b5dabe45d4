//! Recording session client and port helpers

use rxchain::device::{BusyState, ClientClass, SessionClient, SourceState};
use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Session client remembering every callback it received
#[derive(Default)]
pub struct RecordingClient {
    class: Option<ClientClass>,
    states: Mutex<Vec<SourceState>>,
    busy: Mutex<Vec<BusyState>>,
    fails: AtomicUsize,
    shutdowns: AtomicUsize,
    enables: AtomicUsize,
    disables: AtomicUsize,
}

impl RecordingClient {
    pub fn new(class: ClientClass) -> Arc<Self> {
        Arc::new(Self {
            class: Some(class),
            ..Default::default()
        })
    }

    pub fn states(&self) -> Vec<SourceState> {
        self.states.lock().unwrap().clone()
    }

    pub fn busy_states(&self) -> Vec<BusyState> {
        self.busy.lock().unwrap().clone()
    }

    pub fn count_state(&self, state: SourceState) -> usize {
        self.states().iter().filter(|s| **s == state).count()
    }

    pub fn fails(&self) -> usize {
        self.fails.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn enables(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn disables(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }
}

impl SessionClient for RecordingClient {
    fn client_class(&self) -> ClientClass {
        self.class.unwrap_or(ClientClass::Inactive)
    }

    fn on_state_change(&self, state: SourceState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_busy_state_change(&self, state: BusyState) {
        self.busy.lock().unwrap().push(state);
    }

    fn on_fail(&self) {
        self.fails.fetch_add(1, Ordering::SeqCst);
    }

    fn on_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn on_enable(&self) {
        self.enables.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disable(&self) {
        self.disables.fetch_add(1, Ordering::SeqCst);
    }
}

/// A listening socket standing in for a capture process's data port
pub fn fake_data_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}
