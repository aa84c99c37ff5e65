//! Typed port endpoints (spec.md §3 "Port") with hierarchical reference
//! propagation, grounded in `original_source/.../builder/runtime/ports.py`.

use std::rc::Rc;
use std::cell::RefCell;

use crate::error::{DesignerError, Result};

pub fn port_path(namespace: &[String], suffix: &str) -> String {
    if namespace.is_empty() {
        format!("/{suffix}")
    } else {
        format!("/{}/{}", namespace.join("/"), suffix)
    }
}

/// Shared, mutably-aliased port handle. Ports are linked into `users` /
/// `servers` / `reference` graphs that must observe topic propagation
/// through shared mutation, mirroring the Python implementation's
/// plain-object-reference semantics.
pub type PortRef = Rc<RefCell<PortState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone)]
pub struct PortState {
    pub name: String,
    pub msg_type: String,
    pub namespace: Vec<String>,
    pub direction: Direction,
    pub is_global: bool,
    pub remap_target: String,
    pub topic: Vec<String>,
    /// Downstream subscribers (OutPort only).
    pub users: Vec<PortRef>,
    /// Upstream publishers (InPort only).
    pub servers: Vec<PortRef>,
    /// Hierarchical expansion: the concrete port(s) this composite port
    /// stands for. Invariant (spec.md §3): an OutPort has at most one
    /// reference.
    pub reference: Vec<PortRef>,
}

impl PortState {
    pub fn new(direction: Direction, name: &str, msg_type: &str, namespace: Vec<String>) -> Self {
        let remap_target = match direction {
            Direction::In => format!("~/input/{name}"),
            Direction::Out => format!("~/output/{name}"),
        };
        let mut state = Self {
            name: name.to_string(),
            msg_type: msg_type.to_string(),
            namespace,
            direction,
            is_global: false,
            remap_target,
            topic: Vec::new(),
            users: Vec::new(),
            servers: Vec::new(),
            reference: Vec::new(),
        };
        if direction == Direction::Out {
            state.topic = state.default_topic();
        }
        state
    }

    fn default_topic(&self) -> Vec<String> {
        let mut topic = self.namespace.clone();
        topic.push(self.name.clone());
        topic
    }

    pub fn port_path(&self) -> String {
        let suffix = match self.direction {
            Direction::In => format!("input/{}", self.name),
            Direction::Out => format!("output/{}", self.name),
        };
        port_path(&self.namespace, &suffix)
    }

    pub fn topic_str(&self) -> String {
        if self.topic.is_empty() {
            String::new()
        } else {
            format!("/{}", self.topic.join("/"))
        }
    }
}

/// Sets `port`'s topic, propagating to users (if it is an OutPort) or down
/// through `reference` (if it is an InPort). Idempotent: re-setting the same
/// topic is a no-op and does not re-propagate (spec.md §4.G).
pub fn set_topic(port: &PortRef, topic_namespace: &[String], topic_name: &str) {
    let mut new_topic = topic_namespace.to_vec();
    new_topic.push(topic_name.to_string());

    let (direction, changed, propagate_targets) = {
        let mut state = port.borrow_mut();
        if state.topic == new_topic {
            (state.direction, false, Vec::new())
        } else {
            state.topic = new_topic.clone();
            let targets = match state.direction {
                Direction::Out => state.users.clone(),
                Direction::In => state.reference.clone(),
            };
            (state.direction, true, targets)
        }
    };
    let _ = direction;
    if !changed {
        return;
    }
    for target in propagate_targets {
        set_topic(&target, topic_namespace, topic_name);
    }
}

pub fn set_users(port: &PortRef, additions: &[PortRef]) {
    let mut state = port.borrow_mut();
    let existing: Vec<String> = state.users.iter().map(|p| p.borrow().port_path()).collect();
    for candidate in additions {
        let path = candidate.borrow().port_path();
        if !existing.contains(&path) {
            state.users.push(candidate.clone());
        }
    }
}

pub fn set_servers(port: &PortRef, additions: &[PortRef]) {
    let mut state = port.borrow_mut();
    let existing: Vec<String> = state.servers.iter().map(|p| p.borrow().port_path()).collect();
    for candidate in additions {
        let path = candidate.borrow().port_path();
        if !existing.contains(&path) {
            state.servers.push(candidate.clone());
        }
    }
}

/// Extends `port`'s reference list, enforcing the OutPort `reference.len() <= 1`
/// pub/sub invariant (spec.md §3, §8 property 5).
pub fn set_references(port: &PortRef, additions: &[PortRef]) -> Result<()> {
    let direction = port.borrow().direction;
    {
        let mut state = port.borrow_mut();
        let existing: Vec<String> = state.reference.iter().map(|p| p.borrow().port_path()).collect();
        for candidate in additions {
            let path = candidate.borrow().port_path();
            if !existing.contains(&path) {
                state.reference.push(candidate.clone());
            }
        }
    }
    if direction == Direction::Out {
        let state = port.borrow();
        if state.reference.len() > 1 {
            let refs: Vec<String> = state.reference.iter().map(|p| p.borrow().port_path()).collect();
            return Err(DesignerError::validation(format!(
                "OutPort '{}' cannot have more than one reference; this violates the pub/sub rule \
                 (one topic must be published by one node). References: {:?}",
                state.port_path(),
                refs
            )));
        }
    }
    Ok(())
}

pub fn new_port(direction: Direction, name: &str, msg_type: &str, namespace: Vec<String>) -> PortRef {
    Rc::new(RefCell::new(PortState::new(direction, name, msg_type, namespace)))
}
