//! `Instance` (spec.md §3) — a runtime tree node realizing one use of an
//! entity at a specific namespace.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::config::Config;
use super::link::Link;
use super::parameter::{Parameter, ParameterFile};
use super::port::PortRef;
use super::resolver::SharedResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    System,
    Module,
    Node,
}

pub type InstanceRef = Rc<RefCell<Instance>>;

/// An ordered, name-indexed pair list. `children` preserves declaration
/// order (spec.md §5 "Ordering guarantees"); a `HashMap` would not.
#[derive(Debug, Default)]
pub struct OrderedChildren {
    entries: Vec<(String, InstanceRef)>,
}

impl OrderedChildren {
    pub fn push(&mut self, name: String, instance: InstanceRef) {
        self.entries.push((name, instance));
    }

    pub fn get(&self, name: &str) -> Option<&InstanceRef> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, i)| i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, InstanceRef)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An ordered, name-indexed list of ports, mirroring the reference
/// implementation's insertion-ordered `in_ports`/`out_ports` dicts.
#[derive(Debug, Default, Clone)]
pub struct PortTable {
    entries: Vec<(String, PortRef)>,
}

impl PortTable {
    pub fn get(&self, name: &str) -> Option<&PortRef> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn insert(&mut self, name: String, port: PortRef) {
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = port;
        } else {
            self.entries.push((name, port));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, PortRef)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &PortRef> {
        self.entries.iter().map(|(_, p)| p)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }
}

pub struct Instance {
    pub name: String,
    pub namespace: Vec<String>,
    pub compute_unit: Option<String>,
    pub layer: u32,
    pub entity_type: InstanceKind,
    pub configuration: Config,
    pub parent: Option<Weak<RefCell<Instance>>>,
    pub children: OrderedChildren,
    /// Cycle guard: entity ids currently on the module-include stack
    /// (spec.md §3, §9 "keep an explicit stack... release on backtrack").
    pub parent_module_list: Vec<String>,
    pub parameter_resolver: Option<SharedResolver>,

    pub in_ports: PortTable,
    pub out_ports: PortTable,
    pub links: Vec<Link>,

    pub parameters: Vec<Parameter>,
    pub parameter_files: Vec<ParameterFile>,
}

impl Instance {
    pub fn new(
        name: String,
        namespace: Vec<String>,
        layer: u32,
        entity_type: InstanceKind,
        configuration: Config,
    ) -> InstanceRef {
        Rc::new(RefCell::new(Instance {
            name,
            namespace,
            compute_unit: None,
            layer,
            entity_type,
            configuration,
            parent: None,
            children: OrderedChildren::default(),
            parent_module_list: Vec::new(),
            parameter_resolver: None,
            in_ports: PortTable::default(),
            out_ports: PortTable::default(),
            links: Vec::new(),
            parameters: Vec::new(),
            parameter_files: Vec::new(),
        }))
    }

    /// `"/" + "/".join(namespace)`, or `""` at the deployment root
    /// (spec.md §3).
    pub fn namespace_str(&self) -> String {
        if self.namespace.is_empty() {
            String::new()
        } else {
            format!("/{}", self.namespace.join("/"))
        }
    }
}
