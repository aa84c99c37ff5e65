//! Component A (spec.md §4.A): YAML loader with a JSON-pointer source map.
//!
//! Grounded in `original_source/.../models/parsing/yaml_parser.py`'s
//! `_build_source_map_from_yaml`, which walks PyYAML's composed node tree
//! recording each node's `start_mark`. Here we walk `yaml-rust2`'s event
//! stream (which carries the same `Marker` line/column information) to
//! build the same JSON-pointer-keyed map, and separately parse the file
//! with `serde_yaml` into a typed `Value` tree for everything downstream.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use serde_yaml::Value;
use yaml_rust2::parser::{Event, MarkedEventReceiver};
use yaml_rust2::scanner::Marker;
use yaml_rust2::Parser;

use crate::model::{SourceMap, SourcePosition};

/// A parsed design file: its typed value tree plus its source map.
#[derive(Debug, Clone)]
pub struct LoadedYaml {
    pub value: Value,
    pub source_map: SourceMap,
}

/// Escapes a JSON-pointer token: `~` -> `~0`, `/` -> `~1`.
pub fn json_pointer_escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

#[derive(Default)]
struct SourceMapBuilder {
    map: SourceMap,
    // Stack of (path, pending child index for sequences).
    path_stack: Vec<String>,
    seq_index_stack: Vec<usize>,
    // Whether the node at the top of the container stack is a mapping
    // waiting for a key, or has just seen a key and wants the value next.
    pending_key: Vec<Option<String>>,
    container_kind: Vec<ContainerKind>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Mapping,
    Sequence,
}

impl SourceMapBuilder {
    fn record(&mut self, path: &str, marker: Marker) {
        self.map.insert(
            path.to_string(),
            SourcePosition {
                line: marker.line(),
                column: marker.col() + 1,
            },
        );
    }

    fn child_path(&self) -> String {
        match self.container_kind.last() {
            Some(ContainerKind::Sequence) => {
                let idx = *self.seq_index_stack.last().unwrap();
                let parent = self.path_stack.last().map(String::as_str).unwrap_or("");
                format!("{parent}/{idx}")
            }
            Some(ContainerKind::Mapping) => {
                let key = self
                    .pending_key
                    .last()
                    .and_then(|k| k.as_deref())
                    .unwrap_or("");
                let parent = self.path_stack.last().map(String::as_str).unwrap_or("");
                format!("{parent}/{}", json_pointer_escape(key))
            }
            None => String::new(),
        }
    }

    fn enter_value(&mut self, marker: Marker) -> String {
        let path = if self.path_stack.is_empty() {
            String::new()
        } else {
            self.child_path()
        };
        self.record(&path, marker);
        path
    }

    fn after_value(&mut self) {
        match self.container_kind.last() {
            Some(ContainerKind::Sequence) => {
                *self.seq_index_stack.last_mut().unwrap() += 1;
            }
            Some(ContainerKind::Mapping) => {
                *self.pending_key.last_mut().unwrap() = None;
            }
            None => {}
        }
    }
}

impl MarkedEventReceiver for SourceMapBuilder {
    fn on_event(&mut self, event: Event, marker: Marker) {
        match event {
            Event::StreamStart | Event::StreamEnd | Event::DocumentStart | Event::DocumentEnd => {}
            Event::MappingStart(..) => {
                let path = self.enter_value(marker);
                self.path_stack.push(path);
                self.container_kind.push(ContainerKind::Mapping);
                self.pending_key.push(None);
            }
            Event::MappingEnd => {
                self.path_stack.pop();
                self.container_kind.pop();
                self.pending_key.pop();
                self.after_value();
            }
            Event::SequenceStart(..) => {
                let path = self.enter_value(marker);
                self.path_stack.push(path);
                self.container_kind.push(ContainerKind::Sequence);
                self.seq_index_stack.push(0);
            }
            Event::SequenceEnd => {
                self.path_stack.pop();
                self.container_kind.pop();
                self.seq_index_stack.pop();
                self.after_value();
            }
            Event::Scalar(ref value, _, _, _) => {
                if self.container_kind.last() == Some(&ContainerKind::Mapping)
                    && self.pending_key.last().map(Option::is_none).unwrap_or(false)
                {
                    // This scalar is a mapping key; record it, don't emit a value path.
                    *self.pending_key.last_mut().unwrap() = Some(value.clone());
                    return;
                }
                self.enter_value(marker);
                self.after_value();
            }
            _ => {}
        }
    }
}

fn build_source_map(content: &str) -> SourceMap {
    let receiver = Rc::new(RefCell::new(SourceMapBuilder::default()));
    let mut parser = Parser::new(content.chars());
    let mut recv = SourceMapBuilderHandle(receiver.clone());
    if parser.load(&mut recv, false).is_err() {
        // Parse errors are surfaced by serde_yaml separately; an empty
        // source map just means diagnostics fall back to file-only.
    }
    Rc::try_unwrap(receiver).unwrap().into_inner().map
}

struct SourceMapBuilderHandle(Rc<RefCell<SourceMapBuilder>>);

impl MarkedEventReceiver for SourceMapBuilderHandle {
    fn on_event(&mut self, event: Event, marker: Marker) {
        self.0.borrow_mut().on_event(event, marker);
    }
}

/// Parses YAML `content`, returning both the typed value tree and its
/// JSON-pointer source map.
pub fn parse_with_source(content: &str) -> Result<LoadedYaml> {
    let value: Value = serde_yaml::from_str(content).context("failed to parse YAML content")?;
    let source_map = build_source_map(content);
    Ok(LoadedYaml { value, source_map })
}

/// Caches loaded files by absolute path (spec.md §4.A "Caching is keyed by
/// absolute path; cache hits return both the tree and the map").
#[derive(Default)]
pub struct YamlLoader {
    cache: RefCell<HashMap<PathBuf, LoadedYaml>>,
    cache_enabled: bool,
}

impl YamlLoader {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            cache: RefCell::new(HashMap::new()),
            cache_enabled,
        }
    }

    pub fn load(&self, path: &Path) -> Result<LoadedYaml> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("configuration file not found: {}", path.display()))?;

        if self.cache_enabled {
            if let Some(hit) = self.cache.borrow().get(&absolute) {
                return Ok(hit.clone());
            }
        }

        let content = std::fs::read_to_string(&absolute)
            .with_context(|| format!("failed to read configuration file {}", absolute.display()))?;
        let loaded = parse_with_source(&content)
            .with_context(|| format!("failed to parse YAML file {}", absolute.display()))?;

        if self.cache_enabled {
            self.cache
                .borrow_mut()
                .insert(absolute, loaded.clone());
        }
        Ok(loaded)
    }
}
