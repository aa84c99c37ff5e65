//! `Link` (spec.md §3) — a directed edge between two resolved ports.

use super::port::PortRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Internal,
    ExternalToInternal,
    InternalToExternal,
    External,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub msg_type: String,
    pub from_port: PortRef,
    pub to_port: PortRef,
    pub namespace: Vec<String>,
    pub connection_type: ConnectionType,
}
