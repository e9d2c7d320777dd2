#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod frontend;
pub mod node;
pub mod protocol;
pub mod router;
pub mod rpc;
pub mod storage;

pub use self::frontend::Frontend;
pub use self::node::Node;
pub use self::router::Router;

/// Maximum number of replicas a record is placed on.
pub const REPLICATION_FACTOR: usize = 3;

/// Minimum number of replicas that must agree before an operation commits.
/// Must be at least one and at most `REPLICATION_FACTOR`.
pub const MIN_REDUNDANCY: usize = 2;

const MESSAGE_LENGTH: usize = 8196;

// Request timeout time in milliseconds
const REQUEST_TIMEOUT: u64 = 5000;
