use std::fmt::{self, Debug, Display, Formatter};

/// Identifier of a record in the store.
///
/// Hash inputs encode a `RecordId` as four little-endian bytes.
pub type RecordId = u32;

/// Address of a service, an opaque `host:port` style byte string.
///
/// Equality is byte equality and ordering is lexicographic byte order, which
/// placement relies on as a tie-break.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ServiceAddr(String);

impl ServiceAddr {
    pub fn new<S: Into<String>>(addr: S) -> Self {
        ServiceAddr(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl<'a> From<&'a str> for ServiceAddr {
    fn from(addr: &'a str) -> Self {
        ServiceAddr(addr.to_string())
    }
}

impl Debug for ServiceAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for ServiceAddr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcomes shared by every service.
///
/// Errors are compared, hashed, and tallied by value during quorum
/// aggregation, so each variant must remain a distinct comparable value.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    /// A record with the given key is already stored on the node.
    #[error("record already exists")]
    RecordExists,
    /// No record with the given key is stored on the node.
    #[error("record not found")]
    RecordNotFound,
    /// Fewer live nodes than the configuration requires.
    #[error("not enough daemons")]
    NotEnoughDaemons,
    /// The replicas produced neither enough successes nor enough agreeing
    /// errors.
    #[error("quorum not reached")]
    QuorumNotReached,
    /// The node is not part of the router's roster.
    #[error("unknown daemon")]
    UnknownDaemon,
    /// No response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,
    /// The transport failed before an answer was produced.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Client for issuing record operations against a single node.
pub trait NodeClient: Send + Sync {
    fn put(&self, node: &ServiceAddr, k: RecordId, d: &[u8]) -> Result<(), Error>;

    fn del(&self, node: &ServiceAddr, k: RecordId) -> Result<(), Error>;

    fn get(&self, node: &ServiceAddr, k: RecordId) -> Result<Vec<u8>, Error>;
}

/// Client for querying a router service.
pub trait RouterClient: Send + Sync {
    fn heartbeat(&self, router: &ServiceAddr, node: &ServiceAddr) -> Result<(), Error>;

    fn nodes_find(&self, router: &ServiceAddr, k: RecordId) -> Result<Vec<ServiceAddr>, Error>;

    fn list(&self, router: &ServiceAddr) -> Result<Vec<ServiceAddr>, Error>;
}
