//! Component G (spec.md §4.G): connections -> ports/links.
//!
//! Grounded in `original_source/.../builder/link_manager.py`'s `LinkManager`:
//! `match_and_pair_wildcard_ports`/`_apply_wildcard_substitution` for the
//! wildcard pairing state machine, `set_links`/`_resolve_ports_for_connection`
//! /`_create_external_ports` for the per-instance resolution pipeline, and
//! the `_err_*` helpers for the `[E_...]` message shapes.

use std::collections::HashMap;

use regex::Regex;
use serde_yaml::Mapping;

use crate::error::{DesignerError, Result};
use crate::model::{
    mapping_get_str, new_port, set_references, Config, ConnectionType, Direction, ExternalInterfaces,
    Instance, InstanceKind, InstanceRef, Link, PortRef,
};

const WILDCARD_CHARS: [char; 3] = ['*', '^', '+'];

fn has_wildcard(s: &str) -> bool {
    s.chars().any(|c| WILDCARD_CHARS.contains(&c))
}

/// One endpoint of a parsed connection: `None` instance means the endpoint
/// is the instance's own external interface (`input.X` / `output.X`).
#[derive(Debug, Clone)]
struct Endpoint {
    instance: Option<String>,
    port: String,
}

#[derive(Debug, Clone)]
pub struct ParsedConnection {
    from: Endpoint,
    to: Endpoint,
    pub connection_type: ConnectionType,
}

/// Splits `"input.X"` / `"instance.output.X"` into an [`Endpoint`].
fn parse_source_endpoint(raw: &str) -> Result<Endpoint> {
    let parts: Vec<&str> = raw.splitn(3, '.').collect();
    match parts.as_slice() {
        ["input", port] => Ok(Endpoint { instance: None, port: port.to_string() }),
        [instance, "output", port] => {
            Ok(Endpoint { instance: Some(instance.to_string()), port: port.to_string() })
        }
        _ => Err(DesignerError::validation(format!(
            "malformed connection source endpoint '{raw}'; expected 'input.<port>' or '<instance>.output.<port>'"
        ))),
    }
}

fn parse_sink_endpoint(raw: &str) -> Result<Endpoint> {
    let parts: Vec<&str> = raw.splitn(3, '.').collect();
    match parts.as_slice() {
        ["output", port] => Ok(Endpoint { instance: None, port: port.to_string() }),
        [instance, "input", port] => {
            Ok(Endpoint { instance: Some(instance.to_string()), port: port.to_string() })
        }
        _ => Err(DesignerError::validation(format!(
            "malformed connection sink endpoint '{raw}'; expected 'output.<port>' or '<instance>.input.<port>'"
        ))),
    }
}

/// Classifies a connection by spec.md §4.G step 3: `ExternalToInternal` when
/// `from` is `input.X`, `InternalToExternal` when `to` is `output.X`, both at
/// once is a direct external passthrough, else `Internal`.
fn classify(from: &Endpoint, to: &Endpoint) -> ConnectionType {
    match (from.instance.is_none(), to.instance.is_none()) {
        (true, true) => ConnectionType::External,
        (true, false) => ConnectionType::ExternalToInternal,
        (false, true) => ConnectionType::InternalToExternal,
        (false, false) => ConnectionType::Internal,
    }
}

pub fn parse_connection(raw: &Mapping) -> Result<ParsedConnection> {
    let from_raw = mapping_get_str(raw, "from")
        .ok_or_else(|| DesignerError::validation("connection is missing required field 'from'"))?;
    let to_raw = mapping_get_str(raw, "to")
        .ok_or_else(|| DesignerError::validation("connection is missing required field 'to'"))?;
    let from = parse_source_endpoint(from_raw)?;
    let to = parse_sink_endpoint(to_raw)?;
    let connection_type = classify(&from, &to);
    Ok(ParsedConnection { from, to, connection_type })
}

fn endpoint_key(endpoint: &Endpoint) -> String {
    format!("{}.{}", endpoint.instance.as_deref().unwrap_or(""), endpoint.port)
}

/// Drops connections whose exact `(from, to)` string pair already appeared
/// earlier in the list (spec.md §4.G step 1, first occurrence wins;
/// SPEC_FULL.md decision: no error on duplicates, silent dedup only).
fn dedupe_connections(connections: &[Mapping]) -> Vec<Mapping> {
    let mut seen = std::collections::HashSet::new();
    connections
        .iter()
        .filter(|conn| {
            let signature = format!(
                "{}->{}",
                mapping_get_str(conn, "from").unwrap_or(""),
                mapping_get_str(conn, "to").unwrap_or("")
            );
            seen.insert(signature)
        })
        .cloned()
        .collect()
}

fn wildcard_regex(pattern: &str) -> Regex {
    let mut regex_pattern = String::from("^");
    for c in pattern.chars() {
        if WILDCARD_CHARS.contains(&c) {
            regex_pattern.push_str("(.*?)");
        } else {
            regex_pattern.push_str(&regex::escape(&c.to_string()));
        }
    }
    regex_pattern.push('$');
    Regex::new(&regex_pattern).expect("wildcard pattern always compiles to a valid regex")
}

fn match_keys(pattern: &str, keys: &[String]) -> Vec<String> {
    let regex = wildcard_regex(pattern);
    keys.iter().filter(|k| regex.is_match(k)).cloned().collect()
}

/// Substitutes captures of each wildcard character from `matched_name`
/// (matched against `source_pattern`) into the corresponding wildcard slots
/// of `target_pattern`, positionally, per same-symbol class (spec.md §4.G
/// step 3, `_apply_wildcard_substitution`).
fn apply_wildcard_substitution(source_pattern: &str, target_pattern: &str, matched_name: &str) -> String {
    let mut wildcard_order = Vec::new();
    let mut source_regex = String::from("^");
    let mut last = 0usize;
    let chars: Vec<char> = source_pattern.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if WILDCARD_CHARS.contains(&c) {
            if i > last {
                source_regex.push_str(&regex::escape(&chars[last..i].iter().collect::<String>()));
            }
            source_regex.push_str("(.*?)");
            wildcard_order.push(c);
            last = i + 1;
        }
    }
    if last < chars.len() {
        source_regex.push_str(&regex::escape(&chars[last..].iter().collect::<String>()));
    }
    source_regex.push('$');

    let Ok(regex) = Regex::new(&source_regex) else {
        return matched_name.to_string();
    };
    let Some(caps) = regex.captures(matched_name) else {
        return matched_name.to_string();
    };

    let mut captures_by_type: HashMap<char, Vec<String>> = HashMap::new();
    for (idx, wc) in wildcard_order.iter().enumerate() {
        let value = caps.get(idx + 1).map(|m| m.as_str().to_string()).unwrap_or_default();
        captures_by_type.entry(*wc).or_default().push(value);
    }

    let mut consumed: HashMap<char, usize> = HashMap::new();
    let mut result = String::new();
    for c in target_pattern.chars() {
        if WILDCARD_CHARS.contains(&c) {
            let idx = consumed.entry(c).or_insert(0);
            if let Some(values) = captures_by_type.get(&c) {
                if let Some(value) = values.get(*idx) {
                    result.push_str(value);
                    *idx += 1;
                    continue;
                }
            }
            // Target has more wildcards of this type than source provided;
            // leave the wildcard character in place (literal fallback).
            result.push(c);
        } else {
            result.push(c);
        }
    }
    result
}

/// Port-key pairing for one connection's wildcard expansion (spec.md §4.G
/// step 3, `match_and_pair_wildcard_ports`).
fn match_and_pair_wildcard_ports(
    source_pattern: &str,
    target_pattern: &str,
    source_keys: &[String],
    target_keys: &[String],
) -> Vec<(String, String)> {
    let mut src_matches = match_keys(source_pattern, source_keys);
    let mut tgt_matches = match_keys(target_pattern, target_keys);
    if src_matches.is_empty() || tgt_matches.is_empty() {
        return Vec::new();
    }

    let src_wc = has_wildcard(source_pattern);
    let tgt_wc = has_wildcard(target_pattern);

    if WILDCARD_CHARS.iter().any(|c| source_pattern == c.to_string())
        && WILDCARD_CHARS.iter().any(|c| target_pattern == c.to_string())
    {
        src_matches.sort();
        tgt_matches.sort();
        let tgt_set: std::collections::HashSet<&String> = tgt_matches.iter().collect();
        return src_matches
            .into_iter()
            .filter(|k| tgt_set.contains(k))
            .map(|k| (k.clone(), k))
            .collect();
    }

    let mut pairs = Vec::new();
    if src_wc && !tgt_wc {
        src_matches.sort();
        for s in &src_matches {
            for t in &tgt_matches {
                if s != t {
                    pairs.push((s.clone(), t.clone()));
                }
            }
        }
        return pairs;
    }
    if tgt_wc && !src_wc {
        tgt_matches.sort();
        for s in &src_matches {
            for t in &tgt_matches {
                if s != t {
                    pairs.push((s.clone(), t.clone()));
                }
            }
        }
        return pairs;
    }

    for s in &src_matches {
        let t = apply_wildcard_substitution(source_pattern, target_pattern, s);
        if tgt_matches.contains(&t) {
            pairs.push((s.clone(), t));
        }
    }
    pairs
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = temp;
        }
    }
    row[b.len()]
}

/// Close-match suggestions, mirroring `difflib.get_close_matches(cutoff=0.6)`
/// via a normalized Levenshtein ratio.
fn suggest(target: &str, pool: &[String]) -> Vec<String> {
    let mut scored: Vec<(f64, &String)> = pool
        .iter()
        .map(|candidate| {
            let dist = levenshtein(target, candidate) as f64;
            let max_len = target.chars().count().max(candidate.chars().count()).max(1) as f64;
            (1.0 - dist / max_len, candidate)
        })
        .filter(|(ratio, _)| *ratio >= 0.6)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    scored.into_iter().take(5).map(|(_, c)| c.clone()).collect()
}

fn format_pool(pool: &[String]) -> String {
    if pool.is_empty() {
        "(none)".to_string()
    } else {
        format!("{pool:?}")
    }
}

fn format_suggestions(target: &str, pool: &[String]) -> String {
    let matches = suggest(target, pool);
    if matches.is_empty() {
        "-".to_string()
    } else {
        matches.join(", ")
    }
}

#[derive(Clone)]
struct PortCandidate {
    instance: Option<InstanceRef>,
    port_name: String,
    port: Option<PortRef>,
}

fn external_interfaces(config: &Config) -> ExternalInterfaces {
    match config {
        Config::Module(m) => m.external_interfaces.clone(),
        _ => ExternalInterfaces::default(),
    }
}

fn build_port_lists(instance: &InstanceRef) -> (HashMap<String, PortCandidate>, HashMap<String, PortCandidate>) {
    let mut port_list_from = HashMap::new();
    let mut port_list_to = HashMap::new();

    let inst = instance.borrow();
    for (child_name, child) in inst.children.iter() {
        let child_ref = child.borrow();
        for (port_name, port) in child_ref.in_ports.iter() {
            port_list_to.insert(
                format!("{child_name}.{port_name}"),
                PortCandidate { instance: Some(child.clone()), port_name: port_name.clone(), port: Some(port.clone()) },
            );
        }
        for (port_name, port) in child_ref.out_ports.iter() {
            port_list_from.insert(
                format!("{child_name}.{port_name}"),
                PortCandidate { instance: Some(child.clone()), port_name: port_name.clone(), port: Some(port.clone()) },
            );
        }
    }

    let ext = external_interfaces(&inst.configuration);
    for input in &ext.input {
        if let Some(name) = mapping_get_str(input, "name") {
            port_list_from.insert(
                format!(".{name}"),
                PortCandidate { instance: None, port_name: name.to_string(), port: None },
            );
        }
    }
    for output in &ext.output {
        if let Some(name) = mapping_get_str(output, "name") {
            port_list_to.insert(
                format!(".{name}"),
                PortCandidate { instance: None, port_name: name.to_string(), port: None },
            );
        }
    }

    (port_list_from, port_list_to)
}

/// Resolves concrete `(from_port, to_port)` objects for one connection,
/// materializing a fresh port when an externally-initiated endpoint has no
/// concrete port yet (spec.md §4.G step 3 "Materialize ports").
fn resolve_ports_for_connection(
    namespace: &[String],
    connection_type: ConnectionType,
    from: &PortCandidate,
    to: &PortCandidate,
) -> Result<(PortRef, PortRef)> {
    let mut from_port = from.port.clone();
    let mut to_port = to.port.clone();

    if connection_type == ConnectionType::ExternalToInternal {
        let Some(existing_to) = &to_port else {
            return Err(DesignerError::ConnectionTargetMissing {
                message: format!("EXTERNAL_TO_INTERNAL input.{} -> input.{}", from.port_name, to.port_name),
            });
        };
        let msg_type = existing_to.borrow().msg_type.clone();
        from_port = Some(new_port(Direction::In, &from.port_name, &msg_type, namespace.to_vec()));
    } else if connection_type == ConnectionType::InternalToExternal {
        let Some(existing_from) = &from_port else {
            return Err(DesignerError::ConnectionTargetMissing {
                message: format!("INTERNAL_TO_EXTERNAL output.{} -> output.{}", from.port_name, to.port_name),
            });
        };
        let msg_type = existing_from.borrow().msg_type.clone();
        to_port = Some(new_port(Direction::Out, &to.port_name, &msg_type, namespace.to_vec()));
    }

    match (from_port, to_port) {
        (Some(f), Some(t)) => Ok((f, t)),
        _ => Err(DesignerError::ConnectionTargetMissing {
            message: format!("could not resolve ports for connection {} -> {}", from.port_name, to.port_name),
        }),
    }
}

fn create_link(instance: &InstanceRef, from_port: PortRef, to_port: PortRef, connection_type: ConnectionType) {
    let msg_type = from_port.borrow().msg_type.clone();
    let namespace = instance.borrow().namespace.clone();
    let link = Link { msg_type, from_port, to_port, namespace, connection_type };
    instance.borrow_mut().links.push(link);
}

/// Registers externally-terminating link endpoints as this instance's own
/// `in_ports`/`out_ports` (spec.md §4.G step 4).
fn create_external_ports(instance: &InstanceRef) -> Result<()> {
    let (namespace, links, declared) = {
        let inst = instance.borrow();
        (inst.namespace.clone(), inst.links.clone(), external_interfaces(&inst.configuration))
    };

    for link in &links {
        if link.from_port.borrow().namespace == namespace {
            register_external_port(instance, link.from_port.clone(), &declared.input, "input")?;
        }
        if link.to_port.borrow().namespace == namespace {
            register_external_port(instance, link.to_port.clone(), &declared.output, "output")?;
        }
    }
    Ok(())
}

fn register_external_port(instance: &InstanceRef, port: PortRef, declared: &[Mapping], kind: &str) -> Result<()> {
    let declared_names: Vec<String> = declared.iter().filter_map(|m| mapping_get_str(m, "name").map(str::to_string)).collect();
    let (name, msg_type) = {
        let p = port.borrow();
        (p.name.clone(), p.msg_type.clone())
    };
    if !declared_names.contains(&name) {
        let mut sorted = declared_names.clone();
        sorted.sort();
        return Err(DesignerError::ExternalNotDeclared {
            message: format!(
                "external {kind} '{name}' not declared. Declared: {}; Suggest: {}",
                format_pool(&sorted),
                format_suggestions(&name, &sorted)
            ),
        });
    }

    let table_has_existing = {
        let inst = instance.borrow();
        let table = if kind == "input" { &inst.in_ports } else { &inst.out_ports };
        table.get(&name).cloned()
    };

    if let Some(existing) = table_has_existing {
        let existing_type = existing.borrow().msg_type.clone();
        if existing_type != msg_type {
            let existing_path = existing.borrow().port_path();
            return Err(DesignerError::TypeMismatch {
                message: format!("external port '{existing_path}' type clash: existing={existing_type}, new={msg_type}"),
            });
        }
        set_references(&existing, &[port])?;
    } else {
        let mut inst = instance.borrow_mut();
        if kind == "input" {
            inst.in_ports.insert(name, port);
        } else {
            inst.out_ports.insert(name, port);
        }
    }
    Ok(())
}

/// Initializes a node instance's declared `InPort`/`OutPort` objects
/// (spec.md §4.F step 1 "node", grounded in `initialize_node_ports`).
pub fn initialize_node_ports(instance: &InstanceRef) {
    let (namespace, inputs, outputs) = {
        let inst = instance.borrow();
        let Some(node) = inst.configuration.as_node() else { return };
        (inst.namespace.clone(), node.inputs.clone(), node.outputs.clone())
    };

    let make_port = |direction: Direction, cfg: &Mapping| -> (String, PortRef) {
        let name = mapping_get_str(cfg, "name").unwrap_or_default().to_string();
        let msg_type = mapping_get_str(cfg, "message_type").unwrap_or_default();
        let port = new_port(direction, &name, msg_type, namespace.clone());
        if let Some(global) = mapping_get_str(cfg, "global") {
            let mut p = port.borrow_mut();
            p.is_global = true;
            let trimmed = global.strip_prefix('/').unwrap_or(global);
            p.topic = trimmed.split('/').map(str::to_string).collect();
        }
        if let Some(remap) = mapping_get_str(cfg, "remap_target") {
            port.borrow_mut().remap_target = remap.to_string();
        }
        (name, port)
    };

    let mut in_ports = crate::model::PortTable::default();
    for cfg in &inputs {
        let (name, port) = make_port(Direction::In, cfg);
        in_ports.insert(name, port);
    }
    let mut out_ports = crate::model::PortTable::default();
    for cfg in &outputs {
        let (name, port) = make_port(Direction::Out, cfg);
        out_ports.insert(name, port);
    }

    let mut inst = instance.borrow_mut();
    inst.in_ports = in_ports;
    inst.out_ports = out_ports;
}

/// Resolves every connection of a composite (module/system) instance into
/// links, then registers the instance's own external ports (spec.md §4.G).
pub fn set_links(instance: &InstanceRef) -> Result<()> {
    let (connections, entity_kind, file_path) = {
        let inst = instance.borrow();
        let connections = match &inst.configuration {
            Config::Module(m) => m.connections.clone(),
            Config::System(s) => s.connections.clone(),
            _ => Vec::new(),
        };
        (connections, inst.entity_type, inst.configuration.common().file_path.clone())
    };

    if connections.is_empty() {
        tracing::warn!(instance = %instance.borrow().name, file = %file_path.display(), "instance has no connections configured");
        return Ok(());
    }

    let connections = dedupe_connections(&connections);
    let (port_list_from, port_list_to) = build_port_lists(instance);
    let from_keys: Vec<String> = port_list_from.keys().cloned().collect();
    let to_keys: Vec<String> = port_list_to.keys().cloned().collect();
    let namespace = instance.borrow().namespace.clone();

    for raw in &connections {
        let parsed = parse_connection(raw)?;
        let from_idx = endpoint_key(&parsed.from);
        let to_idx = endpoint_key(&parsed.to);

        let wildcarded = has_wildcard(&from_idx) || has_wildcard(&to_idx);

        if wildcarded {
            let pairs = match_and_pair_wildcard_ports(&from_idx, &to_idx, &from_keys, &to_keys);
            if pairs.is_empty() {
                tracing::warn!(
                    from = %from_idx, to = %to_idx,
                    "[E_WILDCARD_EMPTY] no ports matched wildcard patterns"
                );
                continue;
            }
            for (from_key, to_key) in pairs {
                let Some(from_cand) = port_list_from.get(&from_key) else { continue };
                let Some(to_cand) = port_list_to.get(&to_key) else { continue };
                let (from_port, to_port) =
                    resolve_ports_for_connection(&namespace, parsed.connection_type, from_cand, to_cand)?;
                create_link(instance, from_port, to_port, parsed.connection_type);
            }
            continue;
        }

        let from_cand = port_list_from.get(&from_idx);
        let to_cand = port_list_to.get(&to_idx);

        let from_cand = match from_cand {
            Some(c) => c,
            None => {
                let available: Vec<String> = if parsed.from.instance.is_none() {
                    from_keys.iter().filter(|k| k.starts_with('.')).map(|k| k[1..].to_string()).collect()
                } else {
                    let prefix = format!("{}.", parsed.from.instance.as_deref().unwrap_or(""));
                    from_keys.iter().filter(|k| k.starts_with(&prefix)).map(|k| k[prefix.len()..].to_string()).collect()
                };
                let mut sorted = available;
                sorted.sort();
                let message = format!(
                    "output '{}' not in '{}'. Available: {}; Suggest: {}",
                    parsed.from.port, parsed.from.instance.as_deref().unwrap_or("<root>"),
                    format_pool(&sorted), format_suggestions(&parsed.from.port, &sorted)
                );
                if entity_kind == InstanceKind::Module {
                    return Err(DesignerError::PortNotFound { message });
                }
                tracing::warn!("{message}");
                continue;
            }
        };

        let to_cand = match to_cand {
            Some(c) => c,
            None => {
                let available: Vec<String> = if parsed.to.instance.is_none() {
                    to_keys.iter().filter(|k| k.starts_with('.')).map(|k| k[1..].to_string()).collect()
                } else {
                    let prefix = format!("{}.", parsed.to.instance.as_deref().unwrap_or(""));
                    to_keys.iter().filter(|k| k.starts_with(&prefix)).map(|k| k[prefix.len()..].to_string()).collect()
                };
                let mut sorted = available;
                sorted.sort();
                let message = format!(
                    "input '{}' not in '{}'. Available: {}; Suggest: {}",
                    parsed.to.port, parsed.to.instance.as_deref().unwrap_or("<root>"),
                    format_pool(&sorted), format_suggestions(&parsed.to.port, &sorted)
                );
                if entity_kind == InstanceKind::Module {
                    return Err(DesignerError::PortNotFound { message });
                }
                tracing::warn!("{message}");
                continue;
            }
        };

        let (from_port, to_port) = resolve_ports_for_connection(&namespace, parsed.connection_type, from_cand, to_cand)?;
        create_link(instance, from_port, to_port, parsed.connection_type);
    }

    create_external_ports(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Config, ConfigCommon, ExternalInterfaces, Instance, InstanceKind, ModuleConfig, SourceMap, SubType};
    use serde_yaml::Value;
    use std::path::PathBuf;

    fn common(name: &str) -> ConfigCommon {
        ConfigCommon {
            name: name.to_string(),
            full_name: format!("{name}.module"),
            file_path: PathBuf::from(format!("{name}.module.yaml")),
            package: None,
            source_map: SourceMap::default(),
            raw: Value::Null,
            sub_type: SubType::Base,
        }
    }

    fn mapping_of(pairs: &[(&str, &str)]) -> Mapping {
        let mut m = Mapping::new();
        for (k, v) in pairs {
            m.insert(Value::from(*k), Value::from(*v));
        }
        m
    }

    fn node_instance(name: &str, namespace: Vec<String>, inputs: Vec<Mapping>, outputs: Vec<Mapping>) -> InstanceRef {
        let cfg = crate::model::NodeConfig {
            common: common(name),
            launch: Mapping::new(),
            inputs,
            outputs,
            parameter_files: vec![],
            parameters: vec![],
            processes: vec![],
            package_name: None,
            package_provider: None,
            package_resolution: None,
        };
        let instance = Instance::new(name.to_string(), namespace, 1, InstanceKind::Node, Config::Node(cfg));
        initialize_node_ports(&instance);
        instance
    }

    fn module_instance(name: &str, connections: Vec<Mapping>, ext: ExternalInterfaces) -> InstanceRef {
        let cfg = ModuleConfig { common: common(name), instances: vec![], external_interfaces: ext, connections };
        Instance::new(name.to_string(), vec![], 0, InstanceKind::Module, Config::Module(cfg))
    }

    #[test]
    fn internal_connection_creates_a_link() {
        let module = module_instance(
            "M",
            vec![mapping_of(&[("from", "a.output.out"), ("to", "b.input.in")])],
            ExternalInterfaces::default(),
        );
        let a = node_instance("a", vec!["a".to_string()], vec![], vec![mapping_of(&[("name", "out"), ("message_type", "std_msgs/Int32")])]);
        let b = node_instance("b", vec!["b".to_string()], vec![mapping_of(&[("name", "in"), ("message_type", "std_msgs/Int32")])], vec![]);
        module.borrow_mut().children.push("a".to_string(), a);
        module.borrow_mut().children.push("b".to_string(), b);

        set_links(&module).unwrap();
        assert_eq!(module.borrow().links.len(), 1);
        assert_eq!(module.borrow().links[0].connection_type, ConnectionType::Internal);
    }

    #[test]
    fn wildcard_connection_expands_to_one_link_per_child() {
        let ext = ExternalInterfaces {
            input: vec![mapping_of(&[("name", "left")]), mapping_of(&[("name", "right")])],
            output: vec![],
        };
        let module = module_instance(
            "M",
            vec![mapping_of(&[("from", "input.*"), ("to", "*.input.pointcloud")])],
            ext,
        );
        let left = node_instance("left", vec!["left".to_string()], vec![mapping_of(&[("name", "pointcloud"), ("message_type", "sensor_msgs/PointCloud2")])], vec![]);
        let right = node_instance("right", vec!["right".to_string()], vec![mapping_of(&[("name", "pointcloud"), ("message_type", "sensor_msgs/PointCloud2")])], vec![]);
        module.borrow_mut().children.push("left".to_string(), left);
        module.borrow_mut().children.push("right".to_string(), right);

        set_links(&module).unwrap();
        assert_eq!(module.borrow().links.len(), 2);
        assert_eq!(module.borrow().in_ports.names().len(), 2);
    }

    #[test]
    fn duplicate_connections_are_silently_deduped() {
        let conn = mapping_of(&[("from", "a.output.out"), ("to", "b.input.in")]);
        let module = module_instance("M", vec![conn.clone(), conn], ExternalInterfaces::default());
        let a = node_instance("a", vec!["a".to_string()], vec![], vec![mapping_of(&[("name", "out"), ("message_type", "std_msgs/Int32")])]);
        let b = node_instance("b", vec!["b".to_string()], vec![mapping_of(&[("name", "in"), ("message_type", "std_msgs/Int32")])], vec![]);
        module.borrow_mut().children.push("a".to_string(), a);
        module.borrow_mut().children.push("b".to_string(), b);

        set_links(&module).unwrap();
        assert_eq!(module.borrow().links.len(), 1);
    }

    #[test]
    fn missing_port_inside_module_is_a_fatal_error() {
        let module = module_instance(
            "M",
            vec![mapping_of(&[("from", "a.output.out"), ("to", "b.input.inn")])],
            ExternalInterfaces::default(),
        );
        let a = node_instance("a", vec!["a".to_string()], vec![], vec![mapping_of(&[("name", "out"), ("message_type", "std_msgs/Int32")])]);
        let b = node_instance("b", vec!["b".to_string()], vec![mapping_of(&[("name", "in"), ("message_type", "std_msgs/Int32")])], vec![]);
        module.borrow_mut().children.push("a".to_string(), a);
        module.borrow_mut().children.push("b".to_string(), b);

        let err = set_links(&module).unwrap_err();
        assert!(matches!(err, DesignerError::PortNotFound { .. }));
    }
}
