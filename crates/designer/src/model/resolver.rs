//! `ParameterResolver` (spec.md §3) — the shared substitution-variable store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::cell::RefCell;

/// Owns the `$(var ...)` variable map and the `find-pkg-share` package-path
/// table for one deployment instance. Shared by reference across the whole
/// instance tree (spec.md §3, §5 "Shared resources"); parameter-set
/// `local_variables` create an ephemeral scoped clone via [`ParameterResolver::scoped`]
/// that never mutates the parent.
#[derive(Debug, Clone, Default)]
pub struct ParameterResolver {
    pub variable_map: HashMap<String, String>,
    pub package_paths: HashMap<String, PathBuf>,
}

pub type SharedResolver = Rc<RefCell<ParameterResolver>>;

impl ParameterResolver {
    pub fn new(package_paths: HashMap<String, PathBuf>) -> Self {
        Self {
            variable_map: HashMap::new(),
            package_paths,
        }
    }

    pub fn shared(self) -> SharedResolver {
        Rc::new(RefCell::new(self))
    }

    /// Produces a scoped clone with `extra` variables layered on top; the
    /// receiver is left untouched (spec.md §4.H "the base resolver is
    /// unchanged").
    pub fn scoped(&self, extra: &HashMap<String, String>) -> Self {
        let mut clone = self.clone();
        for (k, v) in extra {
            clone.variable_map.insert(k.clone(), v.clone());
        }
        clone
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variable_map.insert(name.into(), value.into());
    }
}
