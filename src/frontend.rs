use std::collections::HashMap;
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::router::finder::NodesFinder;
use crate::storage::{Error, NodeClient, RecordId, RouterClient, ServiceAddr};
use crate::MIN_REDUNDANCY;

/// Interval to wait after an unsuccessful `list` request to the router.
pub const INIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Configuration for a `Frontend`.
pub struct Config {
    /// Address the frontend service listens at.
    pub addr: ServiceAddr,
    /// Address of the router service.
    pub router: ServiceAddr,
    /// Client used to reach nodes.
    pub node_client: Arc<dyn NodeClient>,
    /// Client used to reach the router.
    pub router_client: Arc<dyn RouterClient>,
    /// Finder used to place reads from the cached roster.
    pub finder: NodesFinder,
}

/// Client entry point translating record operations into quorum fan-outs
/// over the key's replica set.
///
/// Writes take their replica set from the router, which filters by liveness;
/// reads select replicas locally from a roster cached on first use and let
/// the quorum rules mask dead members.
pub struct Frontend {
    cfg: Config,
    roster: Mutex<Option<Vec<ServiceAddr>>>,
}

#[derive(Clone)]
enum WriteOp {
    Put(RecordId, Vec<u8>),
    Del(RecordId),
}

impl WriteOp {
    fn key(&self) -> RecordId {
        match *self {
            WriteOp::Put(k, _) | WriteOp::Del(k) => k,
        }
    }

    fn apply(&self, client: &dyn NodeClient, node: &ServiceAddr) -> Result<(), Error> {
        match *self {
            WriteOp::Put(k, ref d) => client.put(node, k, d),
            WriteOp::Del(k) => client.del(node, k),
        }
    }
}

impl Frontend {
    /// Constructs a new `Frontend` with a given `cfg`.
    pub fn new(cfg: Config) -> Self {
        Frontend {
            cfg,
            roster: Mutex::new(None),
        }
    }

    /// Stores `d` under `k` if a quorum of the key's replicas accepts the
    /// insert. A quorum agreeing on `Error::RecordExists` reports the key as
    /// already present.
    pub fn put(&self, k: RecordId, d: &[u8]) -> Result<(), Error> {
        self.write_quorum(WriteOp::Put(k, d.to_vec()))
    }

    /// Deletes the record under `k` if a quorum of the key's replicas held
    /// one.
    pub fn del(&self, k: RecordId) -> Result<(), Error> {
        self.write_quorum(WriteOp::Del(k))
    }

    fn write_quorum(&self, op: WriteOp) -> Result<(), Error> {
        let nodes = self
            .cfg
            .router_client
            .nodes_find(&self.cfg.router, op.key())?;
        if nodes.len() < MIN_REDUNDANCY {
            return Err(Error::NotEnoughDaemons);
        }

        let (tx, rx) = channel();
        for node in &nodes {
            let tx = tx.clone();
            let client = Arc::clone(&self.cfg.node_client);
            let node = node.clone();
            let op = op.clone();
            thread::spawn(move || {
                if tx.send(op.apply(&*client, &node)).is_err() {
                    warn!("Coordinator closed channel before write returned.");
                }
            });
        }
        drop(tx);

        // Every replica is heard before deciding: an early lone error must
        // not shadow a quorum of later successes, and vice versa.
        let mut successes = 0;
        let mut failures: HashMap<Error, usize> = HashMap::new();
        for result in rx.iter().take(nodes.len()) {
            match result {
                Ok(()) => successes += 1,
                Err(err) => *failures.entry(err).or_insert(0) += 1,
            }
        }

        for (err, count) in failures {
            if count >= MIN_REDUNDANCY {
                return Err(err);
            }
        }
        if successes >= MIN_REDUNDANCY {
            return Ok(());
        }
        Err(Error::QuorumNotReached)
    }

    /// Returns the payload a quorum of the key's replicas agrees on, the
    /// error a quorum agrees on, or `Error::QuorumNotReached`.
    pub fn get(&self, k: RecordId) -> Result<Vec<u8>, Error> {
        let roster = self.roster();
        let nodes = self.cfg.finder.nodes_find(k, &roster);

        let (tx, rx) = channel();
        for node in &nodes {
            let tx = tx.clone();
            let client = Arc::clone(&self.cfg.node_client);
            let node = node.clone();
            thread::spawn(move || {
                if tx.send(client.get(&node, k)).is_err() {
                    debug!("Coordinator reached quorum before read returned.");
                }
            });
        }
        drop(tx);

        // Results are tallied as they arrive; the first payload or error to
        // reach quorum decides. Replies still in flight land in a closed
        // channel and cannot affect the returned answer.
        let mut values: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut failures: HashMap<Error, usize> = HashMap::new();
        for result in rx.iter().take(nodes.len()) {
            match result {
                Ok(d) => {
                    let count = values.entry(d.clone()).or_insert(0);
                    *count += 1;
                    if *count >= MIN_REDUNDANCY {
                        return Ok(d);
                    }
                },
                Err(err) => {
                    let count = failures.entry(err.clone()).or_insert(0);
                    *count += 1;
                    if *count >= MIN_REDUNDANCY {
                        return Err(err);
                    }
                },
            }
        }
        Err(Error::QuorumNotReached)
    }

    /// Returns the cached roster, fetching it from the router on first use.
    ///
    /// The cache lock is held across the retry loop, so concurrent first
    /// reads trigger exactly one acquisition. The roster is never refreshed
    /// afterwards.
    fn roster(&self) -> Vec<ServiceAddr> {
        let mut roster = self.roster.lock().unwrap();
        if let Some(ref nodes) = *roster {
            return nodes.clone();
        }
        loop {
            match self.cfg.router_client.list(&self.cfg.router) {
                Ok(nodes) => {
                    *roster = Some(nodes.clone());
                    return nodes;
                },
                Err(err) => {
                    warn!("{:?} - Could not list nodes: {}", self.cfg.addr, err);
                    thread::sleep(INIT_TIMEOUT);
                },
            }
        }
    }
}
