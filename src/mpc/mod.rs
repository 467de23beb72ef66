//! Threshold signing: node client, session coordinator and co-signer acceptor

pub mod acceptor;
pub mod client;
pub mod coordinator;
pub mod types;

pub use acceptor::SignAcceptor;
pub use client::{MpcApi, MpcClient};
pub use coordinator::SigningCoordinator;
