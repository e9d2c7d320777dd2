use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crate::storage::{Error, RecordId, RouterClient, ServiceAddr};

/// Configuration for a `Node`.
pub struct Config {
    /// Address the node service listens at.
    pub addr: ServiceAddr,
    /// Address of the router service to heartbeat.
    pub router: ServiceAddr,
    /// Interval between two heartbeats.
    pub heartbeat: Duration,
    /// Client used to reach the router.
    pub client: Arc<dyn RouterClient>,
}

/// A data-bearing server holding a private key to payload map.
///
/// The map is local to this node; replication across nodes is coordinated
/// entirely by the frontend.
#[derive(Clone)]
pub struct Node {
    cfg: Arc<Config>,
    records: Arc<RwLock<HashMap<RecordId, Vec<u8>>>>,
    hb_stop_tx: SyncSender<()>,
    hb_stop_rx: Arc<Mutex<Option<Receiver<()>>>>,
}

impl Node {
    /// Constructs a new `Node` with a given `cfg`.
    pub fn new(cfg: Config) -> Self {
        // Rendezvous channel: a stop signal is only sent once the loop is at
        // its non-blocking check, so `stop` returns after the loop saw it.
        let (hb_stop_tx, hb_stop_rx) = sync_channel(0);
        Node {
            cfg: Arc::new(cfg),
            records: Arc::new(RwLock::new(HashMap::new())),
            hb_stop_tx,
            hb_stop_rx: Arc::new(Mutex::new(Some(hb_stop_rx))),
        }
    }

    /// Inserts `d` under `k` if no record with that key exists, and fails
    /// with `Error::RecordExists` otherwise.
    pub fn put(&self, k: RecordId, d: Vec<u8>) -> Result<(), Error> {
        let mut records = self.records.write().unwrap();
        match records.entry(k) {
            Entry::Occupied(_) => Err(Error::RecordExists),
            Entry::Vacant(entry) => {
                entry.insert(d);
                Ok(())
            },
        }
    }

    /// Removes the record under `k` if one exists, and fails with
    /// `Error::RecordNotFound` otherwise.
    pub fn del(&self, k: RecordId) -> Result<(), Error> {
        let mut records = self.records.write().unwrap();
        match records.remove(&k) {
            Some(_) => Ok(()),
            None => Err(Error::RecordNotFound),
        }
    }

    /// Returns the payload stored under `k`, or `Error::RecordNotFound`.
    pub fn get(&self, k: RecordId) -> Result<Vec<u8>, Error> {
        let records = self.records.read().unwrap();
        match records.get(&k) {
            Some(d) => Ok(d.clone()),
            None => Err(Error::RecordNotFound),
        }
    }

    /// Starts a thread that sends a heartbeat to the router every
    /// `cfg.heartbeat` until `stop` is called.
    ///
    /// A failed heartbeat is logged and left to the next tick.
    pub fn heartbeats(&self) {
        let rx = match self.hb_stop_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                warn!("{:?} - Heartbeat loop already started.", self.cfg.addr);
                return;
            },
        };

        let cfg = Arc::clone(&self.cfg);
        thread::spawn(move || loop {
            thread::sleep(cfg.heartbeat);
            match rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => {
                    info!("{:?} - Killed heartbeat loop", cfg.addr);
                    return;
                },
                Err(TryRecvError::Empty) => {
                    if let Err(err) = cfg.client.heartbeat(&cfg.router, &cfg.addr) {
                        debug!("{:?} - Heartbeat failed: {}", cfg.addr, err);
                    }
                },
            }
        });
    }

    /// Signals the heartbeat loop to terminate and returns once the loop has
    /// observed the signal. Must not be called before `heartbeats`.
    pub fn stop(&self) {
        if self.hb_stop_tx.send(()).is_err() {
            warn!("{:?} - Heartbeat loop already stopped.", self.cfg.addr);
        }
    }

    /// Address the node is configured to listen at.
    pub fn addr(&self) -> &ServiceAddr {
        &self.cfg.addr
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Node};
    use crate::storage::{Error, RecordId, RouterClient, ServiceAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct CountingRouter {
        heartbeats: AtomicUsize,
        response: Result<(), Error>,
    }

    impl CountingRouter {
        fn new(response: Result<(), Error>) -> Arc<Self> {
            Arc::new(CountingRouter {
                heartbeats: AtomicUsize::new(0),
                response,
            })
        }
    }

    impl RouterClient for CountingRouter {
        fn heartbeat(&self, _router: &ServiceAddr, _node: &ServiceAddr) -> Result<(), Error> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }

        fn nodes_find(&self, _router: &ServiceAddr, _k: RecordId) -> Result<Vec<ServiceAddr>, Error> {
            unimplemented!()
        }

        fn list(&self, _router: &ServiceAddr) -> Result<Vec<ServiceAddr>, Error> {
            unimplemented!()
        }
    }

    fn node(client: Arc<CountingRouter>, heartbeat: Duration) -> Node {
        Node::new(Config {
            addr: ServiceAddr::from("localhost:9001"),
            router: ServiceAddr::from("localhost:9000"),
            heartbeat,
            client,
        })
    }

    #[test]
    fn test_put_is_unique_per_key() {
        let node = node(CountingRouter::new(Ok(())), Duration::from_secs(60));
        assert_eq!(node.put(7, b"hi".to_vec()), Ok(()));
        assert_eq!(node.put(7, b"hi2".to_vec()), Err(Error::RecordExists));
        assert_eq!(node.get(7), Ok(b"hi".to_vec()));
    }

    #[test]
    fn test_del_removes_a_present_record() {
        let node = node(CountingRouter::new(Ok(())), Duration::from_secs(60));
        assert_eq!(node.del(7), Err(Error::RecordNotFound));
        node.put(7, b"hi".to_vec()).unwrap();
        assert_eq!(node.del(7), Ok(()));
        assert_eq!(node.get(7), Err(Error::RecordNotFound));
    }

    #[test]
    fn test_concurrent_puts_have_a_single_winner() {
        let node = node(CountingRouter::new(Ok(())), Duration::from_secs(60));
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let node = node.clone();
            handles.push(thread::spawn(move || node.put(42, vec![i])));
        }

        let successes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|result| result.is_ok())
            .count();
        assert_eq!(successes, 1);

        let stored = node.get(42).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0] < 8);
    }

    #[test]
    fn test_heartbeats_tick_until_stopped() {
        let client = CountingRouter::new(Ok(()));
        let node = node(Arc::clone(&client), Duration::from_millis(10));
        node.heartbeats();
        thread::sleep(Duration::from_millis(100));
        assert!(client.heartbeats.load(Ordering::SeqCst) >= 1);

        node.stop();
        let after_stop = client.heartbeats.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(client.heartbeats.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_heartbeat_failures_are_absorbed() {
        let client = CountingRouter::new(Err(Error::UnknownDaemon));
        let node = node(Arc::clone(&client), Duration::from_millis(10));
        node.heartbeats();
        thread::sleep(Duration::from_millis(100));
        assert!(client.heartbeats.load(Ordering::SeqCst) >= 2);
        node.stop();
    }
}
