#[macro_use]
extern crate log;

use sha3::{Digest, Sha3_256};
use simplelog::{CombinedLogger, Config, Level, LevelFilter, TermLogger};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rendezvous_kv::router::finder::NodesFinder;
use rendezvous_kv::rpc::{NodeServer, RouterServer, RpcClient};
use rendezvous_kv::storage::ServiceAddr;
use rendezvous_kv::{frontend, node, router, Frontend, Node, Router};

const NODE_COUNT: u16 = 5;
const BASE_PORT: u16 = 8900;

fn get_key(key: &str) -> u32 {
    let mut hasher = Sha3_256::default();
    hasher.input(key.as_bytes());
    let digest = hasher.result();
    let mut ret = 0;
    for i in (0..4).rev() {
        ret = (ret << 8) | u32::from(digest[i]);
    }
    ret
}

fn main() {
    let logger_config = Config {
        time: Some(Level::Error),
        level: Some(Level::Error),
        target: None,
        location: None,
        time_format: None,
    };
    CombinedLogger::init(vec![TermLogger::new(LevelFilter::Info, logger_config).unwrap()]).unwrap();

    let router_addr = ServiceAddr::new(format!("127.0.0.1:{}", BASE_PORT));
    let node_addrs: Vec<ServiceAddr> = (1..=NODE_COUNT)
        .map(|i| ServiceAddr::new(format!("127.0.0.1:{}", BASE_PORT + i)))
        .collect();

    let router = Router::new(router::Config {
        addr: router_addr.clone(),
        nodes: node_addrs.clone(),
        forget_timeout: time::Duration::seconds(3),
        finder: NodesFinder::default(),
    })
    .expect("Error: roster is smaller than the replication factor.");
    let _router_server = RouterServer::new(router).expect("Error: could not start router server.");

    let mut nodes = Vec::new();
    let mut node_servers = Vec::new();
    for addr in &node_addrs {
        let client =
            Arc::new(RpcClient::new("127.0.0.1:0").expect("Error: could not bind client socket."));
        let node = Node::new(node::Config {
            addr: addr.clone(),
            router: router_addr.clone(),
            heartbeat: Duration::from_secs(1),
            client,
        });
        node.heartbeats();
        node_servers.push(NodeServer::new(node.clone()).expect("Error: could not start node server."));
        nodes.push(node);
    }

    let frontend = Frontend::new(frontend::Config {
        addr: ServiceAddr::new(format!("127.0.0.1:{}", BASE_PORT + NODE_COUNT + 1)),
        router: router_addr,
        node_client: Arc::new(
            RpcClient::new("127.0.0.1:0").expect("Error: could not bind client socket."),
        ),
        router_client: Arc::new(
            RpcClient::new("127.0.0.1:0").expect("Error: could not bind client socket."),
        ),
        finder: NodesFinder::default(),
    });

    let input = io::stdin();

    loop {
        let mut buffer = String::new();
        println!("Ready for input!");
        if input.read_line(&mut buffer).is_err() {
            break;
        }
        let args: Vec<&str> = buffer.trim_end().split(' ').collect();
        match args[0] {
            "put" if args.len() == 3 => match frontend.put(get_key(args[1]), args[2].as_bytes()) {
                Ok(()) => info!("Stored {}", args[1]),
                Err(err) => warn!("Put failed: {}", err),
            },
            "get" if args.len() == 2 => match frontend.get(get_key(args[1])) {
                Ok(d) => info!("{}", String::from_utf8_lossy(&d)),
                Err(err) => warn!("Get failed: {}", err),
            },
            "del" if args.len() == 2 => match frontend.del(get_key(args[1])) {
                Ok(()) => info!("Deleted {}", args[1]),
                Err(err) => warn!("Del failed: {}", err),
            },
            // Silences a node's heartbeats so the router forgets it.
            "stop" if args.len() == 2 => match args[1].parse::<usize>() {
                Ok(index) if index < nodes.len() => nodes[index].stop(),
                _ => warn!("No such node."),
            },
            _ => {},
        }
    }
}
