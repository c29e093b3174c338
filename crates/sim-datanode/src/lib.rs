//! In-process storage nodes and network for exercising the router.
//!
//! This crate stands in for the storage tier and the wire transport so the
//! router's coordination logic can be tested end to end without sockets or
//! disks.
//!
//! # Pieces
//!
//! - [`SimDataNode`]: in-memory blob store for one node, with a switchable
//!   [`FaultMode`] for failure injection
//! - [`SimNetwork`]: a [`Transport`](common::traits::Transport) that delivers
//!   responses one `send_and_poll` call late, optionally reversed or duplicated
//! - [`SimCluster`]: a cluster map plus matching nodes and network
//!
//! # Example
//!
//! ```no_run
//! use sim_datanode::{FaultMode, SimCluster};
//! use common::ServerErrorCode;
//!
//! let cluster = SimCluster::uniform(2, 3, 4).unwrap();
//! cluster.nodes()[0].set_fault(FaultMode::ErrorCode(ServerErrorCode::IoError));
//! // Hand cluster.map() and cluster.network() to a router.
//! ```

pub mod cluster;
pub mod network;
pub mod node;

pub use cluster::SimCluster;
pub use network::{SimNetwork, SimNetworkConfig};
pub use node::{FaultMode, SimDataNode};
