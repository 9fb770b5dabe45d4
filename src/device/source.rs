//! Capture data fan-out
//!
//! A [`SourceHub`] reads the capture process's TCP data port once the session
//! is running and feeds each subscriber its own conduit. Subscribers that fall
//! behind lose blocks rather than stalling the reader.

use crate::pipeline::conduit::{lock, Conduit};
use crate::pipeline::ConduitId;
use crate::types::{Block, BlockDecoder, Format};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(50);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const READ_BUFFER: usize = 64 * 1024;

type Subscribers = Arc<Mutex<Vec<(ConduitId, Sender<Block>)>>>;

struct Reader {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct SourceHub {
    label: String,
    format: Format,
    subscribers: Subscribers,
    reader: Mutex<Option<Reader>>,
    dropped: Arc<AtomicU64>,
}

impl SourceHub {
    pub fn new(label: impl Into<String>, format: Format) -> Self {
        Self {
            label: label.into(),
            format,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            reader: Mutex::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Open a dedicated conduit fed with every block read from the device
    pub fn subscribe(&self, capacity: usize) -> (ConduitId, Receiver<Block>) {
        let (info, tx, rx) = Conduit::new(self.format, capacity).split();
        lock(&self.subscribers).push((info.id, tx));
        tracing::debug!("{}: subscriber {} attached", self.label, info.id);
        (info.id, rx)
    }

    pub fn unsubscribe(&self, id: ConduitId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Blocks dropped because a subscriber was full
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.reader)
            .as_ref()
            .is_some_and(|r| !r.thread.is_finished())
    }

    /// Connect to the capture port and start the reader thread
    pub fn connect(&self, port: u16) -> std::io::Result<()> {
        self.disconnect();

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let subscribers = self.subscribers.clone();
        let dropped = self.dropped.clone();
        let label = self.label.clone();
        let format = self.format;

        let thread = std::thread::Builder::new()
            .name(format!("{}-source", self.label))
            .spawn(move || {
                let mut decoder = BlockDecoder::new(format);
                let mut buf = vec![0u8; READ_BUFFER];
                while !thread_stop.load(Ordering::Relaxed) {
                    match stream.read(&mut buf) {
                        Ok(0) => {
                            tracing::debug!("{}: capture port closed", label);
                            break;
                        }
                        Ok(n) => {
                            if let Some(block) = decoder.push(&buf[..n]) {
                                fan_out(&subscribers, block, &dropped);
                            }
                        }
                        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                        Err(e) if e.kind() == ErrorKind::Interrupted => {}
                        Err(e) => {
                            tracing::warn!("{}: reading capture port failed: {}", label, e);
                            break;
                        }
                    }
                }
            })?;

        tracing::debug!("{}: reading capture data from port {}", self.label, port);
        *lock(&self.reader) = Some(Reader { stop, thread });
        Ok(())
    }

    pub fn disconnect(&self) {
        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            reader.stop.store(true, Ordering::Relaxed);
            if reader.thread.join().is_err() {
                tracing::error!("{}: source reader panicked", self.label);
            }
        }
    }
}

fn fan_out(subscribers: &Subscribers, block: Block, dropped: &AtomicU64) {
    let mut subscribers = lock(subscribers);
    let count = subscribers.len();
    let mut block = Some(block);
    let mut disconnected = Vec::new();
    for (i, (id, tx)) in subscribers.iter().enumerate() {
        // Last subscriber takes the block without a copy
        let item = if i + 1 == count {
            block.take()
        } else {
            block.clone()
        };
        let Some(item) = item else { break };
        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
        }
    }
    if !disconnected.is_empty() {
        subscribers.retain(|(id, _)| !disconnected.contains(id));
    }
}

impl Drop for SourceHub {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for SourceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHub")
            .field("label", &self.label)
            .field("format", &self.format)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_fan_out_to_subscribers() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let hub = SourceHub::new("test", Format::Char);
        let (_, a) = hub.subscribe(4);
        let (b_id, b) = hub.subscribe(4);

        hub.connect(port).unwrap();
        let (mut conn, _) = listener.accept().unwrap();
        conn.write_all(b"iq").unwrap();

        assert_eq!(a.recv_timeout(Duration::from_secs(2)).unwrap(), Block::Bytes(b"iq".to_vec()));
        assert_eq!(b.recv_timeout(Duration::from_secs(2)).unwrap(), Block::Bytes(b"iq".to_vec()));

        assert!(hub.unsubscribe(b_id));
        assert_eq!(hub.subscriber_count(), 1);
        hub.disconnect();
        assert!(!hub.is_connected());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let hub = SourceHub::new("test", Format::Char);
        let (_, rx) = hub.subscribe(1);
        drop(rx);
        let dropped = AtomicU64::new(0);
        fan_out(&hub.subscribers, Block::Bytes(vec![1]), &dropped);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_full_subscriber_drops_blocks() {
        let hub = SourceHub::new("test", Format::Char);
        let (_, _rx) = hub.subscribe(1);
        fan_out(&hub.subscribers, Block::Bytes(vec![1]), &hub.dropped);
        fan_out(&hub.subscribers, Block::Bytes(vec![2]), &hub.dropped);
        assert_eq!(hub.dropped_blocks(), 1);
    }

    #[test]
    fn test_connect_refused() {
        let port = crate::device::port::available_port().unwrap();
        let hub = SourceHub::new("test", Format::ComplexFloat);
        assert!(hub.connect(port).is_err());
    }
}
