pub mod finder;

use std::collections::HashMap;
use std::sync::RwLock;
use time::{Duration, SteadyTime};

use crate::router::finder::NodesFinder;
use crate::storage::{Error, RecordId, ServiceAddr};
use crate::{MIN_REDUNDANCY, REPLICATION_FACTOR};

/// Configuration for a `Router`.
pub struct Config {
    /// Address the router service listens at.
    pub addr: ServiceAddr,
    /// All nodes served by the router.
    pub nodes: Vec<ServiceAddr>,
    /// Window after which a node without accepted heartbeats is considered
    /// dead for placement.
    pub forget_timeout: Duration,
    /// Finder used to answer placement queries.
    pub finder: NodesFinder,
}

/// Membership and placement oracle for a fixed roster of nodes.
///
/// The roster is immutable after construction; only the per-node
/// last-heartbeat timestamps change.
pub struct Router {
    cfg: Config,
    last_hb: RwLock<HashMap<ServiceAddr, SteadyTime>>,
}

impl Router {
    /// Constructs a new `Router` serving `cfg.nodes`.
    ///
    /// Fails with `Error::NotEnoughDaemons` if fewer than
    /// `REPLICATION_FACTOR` nodes are configured. Every roster entry is
    /// seeded with the construction time, so a fresh cluster counts as live
    /// until `forget_timeout` elapses without real heartbeats.
    pub fn new(cfg: Config) -> Result<Router, Error> {
        if cfg.nodes.len() < REPLICATION_FACTOR {
            return Err(Error::NotEnoughDaemons);
        }
        let now = SteadyTime::now();
        let last_hb = cfg.nodes.iter().map(|node| (node.clone(), now)).collect();
        Ok(Router {
            cfg,
            last_hb: RwLock::new(last_hb),
        })
    }

    /// Records a heartbeat from `node`.
    ///
    /// Heartbeats from addresses outside the configured roster are rejected
    /// with `Error::UnknownDaemon`.
    pub fn heartbeat(&self, node: &ServiceAddr) -> Result<(), Error> {
        let mut last_hb = self.last_hb.write().unwrap();
        match last_hb.get_mut(node) {
            Some(timestamp) => {
                *timestamp = SteadyTime::now();
                Ok(())
            },
            None => Err(Error::UnknownDaemon),
        }
    }

    /// Returns the live replica set for `k`, or `Error::NotEnoughDaemons` if
    /// fewer than `MIN_REDUNDANCY` of its replicas are live.
    ///
    /// Placement runs over the full roster first and the result is filtered
    /// by liveness afterwards; a dead replica is dropped from the set, never
    /// substituted, so the surviving members stay stable while it is down.
    pub fn nodes_find(&self, k: RecordId) -> Result<Vec<ServiceAddr>, Error> {
        let candidates = self.cfg.finder.nodes_find(k, &self.cfg.nodes);
        let now = SteadyTime::now();
        let last_hb = self.last_hb.read().unwrap();
        let ret: Vec<ServiceAddr> = candidates
            .into_iter()
            .filter(|node| match last_hb.get(node) {
                // A negative delta means the timestamp is in the future;
                // still live.
                Some(&timestamp) => now - timestamp < self.cfg.forget_timeout,
                None => false,
            })
            .collect();

        if ret.len() < MIN_REDUNDANCY {
            return Err(Error::NotEnoughDaemons);
        }
        Ok(ret)
    }

    /// Returns the full configured roster, including nodes currently
    /// considered dead. Never fails.
    pub fn list(&self) -> Vec<ServiceAddr> {
        self.cfg.nodes.clone()
    }

    /// Address the router is configured to listen at.
    pub fn addr(&self) -> &ServiceAddr {
        &self.cfg.addr
    }
}
