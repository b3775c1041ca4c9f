//! Variable tree normalization and DAP handle model (spec.md §4.6, §4.7).
//!
//! hgdb reports locals/generator variables as a flat map with keys like
//! `a`, `a.b`, `a[0]`, `a[0][1]`, `self.x[2].y`. This module turns that flat
//! map into a tree of objects/arrays (the "dot tree"), and mints the string
//! handles DAP's `variablesReference` ultimately points at.

use indexmap::IndexMap;
use std::collections::HashMap;

/// A normalized flat variable map, keyed by dot-only paths (no `[k]` left).
pub type FlatVars = IndexMap<String, String>;

/// Replace every `[k]` with `.k`. Idempotent: running it twice is a no-op
/// because the output contains no more `[`/`]` to rewrite.
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '[' => out.push('.'),
            ']' => {}
            other => out.push(other),
        }
    }
    out
}

/// One node of the dot tree.
#[derive(Debug, Clone, PartialEq)]
pub enum VarNode {
    Leaf(LeafValue),
    /// Unordered map, children in insertion order for display stability.
    Object(IndexMap<String, VarNode>),
    /// Dense `0..n` integer-keyed children, collapsed into a sequence.
    Array(Vec<VarNode>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    Int(i64),
    Str(String),
}

impl LeafValue {
    fn from_raw(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<i64>() {
                return LeafValue::Int(n);
            }
        }
        LeafValue::Str(raw.to_string())
    }

    pub fn display(&self) -> String {
        match self {
            LeafValue::Int(n) => n.to_string(),
            LeafValue::Str(s) => s.clone(),
        }
    }
}

/// Build the dot tree from a flat map of possibly-bracketed keys.
///
/// Two passes, per spec.md §4.6: first build a nested `Object` map by
/// walking each dot-split key, then convert every node whose children are
/// exactly `"0", "1", ..., "n-1"` into an `Array`. Single-pass is tempting
/// but breaks on sparse indices (`a[0]`, `a[5]` must stay an object).
pub fn build_tree(flat: &HashMap<String, String>) -> VarNode {
    let mut root: IndexMap<String, VarNode> = IndexMap::new();

    for (raw_key, raw_value) in flat {
        let key = normalize_key(raw_key);
        let segments: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        insert_path(&mut root, &segments, raw_value);
    }

    densify(VarNode::Object(root))
}

fn insert_path(map: &mut IndexMap<String, VarNode>, segments: &[&str], raw_value: &str) {
    let (head, rest) = segments.split_first().expect("non-empty segments");
    if rest.is_empty() {
        map.insert(head.to_string(), VarNode::Leaf(LeafValue::from_raw(raw_value)));
        return;
    }

    let entry = map
        .entry(head.to_string())
        .or_insert_with(|| VarNode::Object(IndexMap::new()));
    match entry {
        VarNode::Object(child_map) => insert_path(child_map, rest, raw_value),
        // A leaf was already inserted at this path by some other key; an
        // intermediate path segment always wins since it carries children.
        VarNode::Leaf(_) => {
            let mut child_map = IndexMap::new();
            insert_path(&mut child_map, rest, raw_value);
            *entry = VarNode::Object(child_map);
        }
        VarNode::Array(_) => unreachable!("densify runs after all inserts"),
    }
}

/// Second pass: recursively collapse any `Object` whose key set is exactly
/// `{"0", ..., "n-1"}` into an `Array`.
fn densify(node: VarNode) -> VarNode {
    match node {
        VarNode::Leaf(v) => VarNode::Leaf(v),
        VarNode::Array(items) => VarNode::Array(items.into_iter().map(densify).collect()),
        VarNode::Object(map) => {
            let densified: IndexMap<String, VarNode> = map
                .into_iter()
                .map(|(k, v)| (k, densify(v)))
                .collect();

            if is_dense_sequence(&densified) {
                let mut items: Vec<(usize, VarNode)> = densified
                    .into_iter()
                    .map(|(k, v)| (k.parse::<usize>().expect("checked by is_dense_sequence"), v))
                    .collect();
                items.sort_by_key(|(i, _)| *i);
                VarNode::Array(items.into_iter().map(|(_, v)| v).collect())
            } else {
                VarNode::Object(densified)
            }
        }
    }
}

fn is_dense_sequence(map: &IndexMap<String, VarNode>) -> bool {
    if map.is_empty() {
        return false;
    }
    let n = map.len();
    (0..n).all(|i| map.contains_key(&i.to_string()))
}

/// Navigate the tree by a dot-only logical path (`""` means the root).
pub fn navigate<'a>(root: &'a VarNode, logical_path: &str) -> Option<&'a VarNode> {
    if logical_path.is_empty() {
        return Some(root);
    }
    let mut node = root;
    for segment in logical_path.split('.') {
        node = match node {
            VarNode::Object(map) => map.get(segment)?,
            VarNode::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            VarNode::Leaf(_) => return None,
        };
    }
    Some(node)
}

/// One entry produced for a DAP `variables` response: either a scalar
/// value or a compound that needs its own handle.
pub struct VariableEntry {
    /// Display name: `"[n]"` for a numeric child, the raw key otherwise.
    pub display_name: String,
    /// The path segment as it appears in the logical path (used to extend
    /// the parent handle), e.g. `"0"` not `"[0]"`.
    pub path_segment: String,
    pub kind: ChildKind,
}

pub enum ChildKind {
    Leaf(LeafValue),
    /// `true` when the child is an `Array` (labeled "Array" to the user),
    /// `false` for an `Object`.
    Compound { is_array: bool },
}

/// List the immediate children of `node`, in the format the `variables`
/// DAP request and the console's `p`/`var` commands both want.
pub fn list_children(node: &VarNode) -> Vec<VariableEntry> {
    match node {
        VarNode::Leaf(_) => Vec::new(),
        VarNode::Object(map) => map
            .iter()
            .map(|(name, child)| VariableEntry {
                display_name: name.clone(),
                path_segment: name.clone(),
                kind: child_kind(child),
            })
            .collect(),
        VarNode::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, child)| VariableEntry {
                display_name: format!("[{i}]"),
                path_segment: i.to_string(),
                kind: child_kind(child),
            })
            .collect(),
    }
}

fn child_kind(node: &VarNode) -> ChildKind {
    match node {
        VarNode::Leaf(v) => ChildKind::Leaf(v.clone()),
        VarNode::Object(_) => ChildKind::Compound { is_array: false },
        VarNode::Array(_) => ChildKind::Compound { is_array: true },
    }
}

// --------------------------------------------------------------------------------------------
// DAP variable handles
// --------------------------------------------------------------------------------------------

/// The three (or more, for nested sub-objects) logical namespaces a
/// variable handle can live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleKind {
    Local,
    Generator,
    Global,
    /// A nested sub-object reached by further path segments; carries its
    /// own logical path plus which top-level kind it descends from.
    Nested { path: String, subkind: Subkind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subkind {
    Local,
    Generator,
}

/// Build the handle string for a top-level scope, per spec.md §4.6.
pub fn scope_handle(subkind: Subkind, instance_id: u64, stack_index: u64) -> String {
    match subkind {
        Subkind::Local => format!("local-{instance_id}-{stack_index}"),
        Subkind::Generator => format!("generator-{instance_id}-{stack_index}"),
    }
}

pub fn global_handle(instance_id: u64, stack_index: u64) -> String {
    format!("global--{instance_id}-{stack_index}")
}

/// Build the handle string for a nested sub-object at logical path `path`.
pub fn nested_handle(
    path: &str,
    instance_id: u64,
    stack_index: u64,
    subkind: Subkind,
) -> String {
    let subkind_str = match subkind {
        Subkind::Local => "local",
        Subkind::Generator => "generator",
    };
    format!("{path}-{instance_id}-{stack_index}-{subkind_str}")
}

pub struct ParsedHandle {
    pub kind: HandleKind,
    pub instance_id: u64,
    pub stack_index: u64,
}

/// Parse a handle string of the shape documented in spec.md §3.
pub fn parse_handle(handle: &str) -> Option<ParsedHandle> {
    let parts: Vec<&str> = handle.split('-').collect();
    match parts.as_slice() {
        ["local", iid, sid] => Some(ParsedHandle {
            kind: HandleKind::Local,
            instance_id: iid.parse().ok()?,
            stack_index: sid.parse().ok()?,
        }),
        ["generator", iid, sid] => Some(ParsedHandle {
            kind: HandleKind::Generator,
            instance_id: iid.parse().ok()?,
            stack_index: sid.parse().ok()?,
        }),
        ["global", "", iid, sid] => Some(ParsedHandle {
            kind: HandleKind::Global,
            instance_id: iid.parse().ok()?,
            stack_index: sid.parse().ok()?,
        }),
        [path, iid, sid, subkind] => {
            let subkind = match *subkind {
                "local" => Subkind::Local,
                "generator" => Subkind::Generator,
                _ => return None,
            };
            Some(ParsedHandle {
                kind: HandleKind::Nested {
                    path: path.to_string(),
                    subkind,
                },
                instance_id: iid.parse().ok()?,
                stack_index: sid.parse().ok()?,
            })
        }
        _ => None,
    }
}

/// Logical path into the scope's tree that a handle addresses (empty for
/// top-level scopes).
impl HandleKind {
    pub fn logical_path(&self) -> &str {
        match self {
            HandleKind::Nested { path, .. } => path,
            _ => "",
        }
    }

    pub fn subkind(&self) -> Option<Subkind> {
        match self {
            HandleKind::Local => Some(Subkind::Local),
            HandleKind::Generator => Some(Subkind::Generator),
            HandleKind::Nested { subkind, .. } => Some(*subkind),
            HandleKind::Global => None,
        }
    }
}

/// Allocates small DAP `variablesReference` integers for handle strings,
/// and remembers `{parent_ref, name}` so `setVariable` can walk back up to
/// reconstruct the full dotted name (spec.md §4.6, §4.8).
#[derive(Default)]
pub struct HandleTable {
    next_ref: i64,
    by_ref: HashMap<i64, HandleEntry>,
    by_handle: HashMap<String, i64>,
}

pub struct HandleEntry {
    pub handle: String,
    pub parent_ref: Option<i64>,
    /// The path segment this entry added relative to its parent (used to
    /// rebuild the full dotted name).
    pub name: String,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_ref: 1,
            ..Self::default()
        }
    }

    /// Reset between break events: every previous reference becomes
    /// invalid once the session state it described is gone.
    pub fn clear(&mut self) {
        self.next_ref = 1;
        self.by_ref.clear();
        self.by_handle.clear();
    }

    /// Allocate (or reuse, within the same break) a reference for `handle`.
    pub fn alloc(&mut self, handle: String, parent_ref: Option<i64>, name: String) -> i64 {
        if let Some(existing) = self.by_handle.get(&handle) {
            return *existing;
        }
        let r = self.next_ref;
        self.next_ref += 1;
        self.by_handle.insert(handle.clone(), r);
        self.by_ref.insert(
            r,
            HandleEntry {
                handle,
                parent_ref,
                name,
            },
        );
        r
    }

    pub fn get(&self, r: i64) -> Option<&HandleEntry> {
        self.by_ref.get(&r)
    }

    /// Walk the parent chain from `r` back to a top-level scope, returning
    /// the reconstructed dotted name of the leaf named `leaf_name` inside
    /// it (spec.md §4.8, `setVariable`).
    pub fn reconstruct_dotted_name(&self, r: i64, leaf_name: &str) -> Option<String> {
        let mut segments = vec![leaf_name.to_string()];
        let mut cursor = Some(r);
        while let Some(cur) = cursor {
            let entry = self.by_ref.get(&cur)?;
            segments.push(entry.name.clone());
            cursor = entry.parent_ref;
        }
        // The top-level scope root is allocated with an empty `name`
        // (it has no parent segment of its own); drop it rather than
        // join it in as a leading empty path element.
        segments.retain(|s| !s.is_empty());
        segments.reverse();
        Some(segments.join("."))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn flat(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn normalize_is_idempotent() {
        let k = "a[0][1].b";
        let once = normalize_key(k);
        let twice = normalize_key(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "a.0.1.b");
    }

    #[test]
    fn array_of_arrays_is_detected_and_coerced_to_ints() {
        let tree = build_tree(&flat(&[("a[0][0]", "1"), ("a[0][1]", "2")]));
        let VarNode::Object(root) = &tree else {
            panic!("expected object root")
        };
        let VarNode::Array(outer) = &root["a"] else {
            panic!("expected array for a")
        };
        let VarNode::Array(inner) = &outer[0] else {
            panic!("expected array for a[0]")
        };
        assert_eq!(inner[0], VarNode::Leaf(LeafValue::Int(1)));
        assert_eq!(inner[1], VarNode::Leaf(LeafValue::Int(2)));
    }

    #[test]
    fn sparse_indices_stay_an_object() {
        let tree = build_tree(&flat(&[("a[0]", "1"), ("a[5]", "2")]));
        let VarNode::Object(root) = &tree else {
            panic!()
        };
        assert!(matches!(root["a"], VarNode::Object(_)));
    }

    #[test]
    fn nested_struct_and_self_prefix() {
        let tree = build_tree(&flat(&[("self.x", "3"), ("self.y[0]", "4")]));
        let VarNode::Object(root) = &tree else {
            panic!()
        };
        let VarNode::Object(self_obj) = &root["self"] else {
            panic!()
        };
        assert_eq!(self_obj["x"], VarNode::Leaf(LeafValue::Int(3)));
        assert!(matches!(self_obj["y"], VarNode::Array(_)));
    }

    #[test]
    fn handle_round_trip_top_level() {
        let h = scope_handle(Subkind::Local, 7, 2);
        assert_eq!(h, "local-7-2");
        let parsed = parse_handle(&h).unwrap();
        assert_eq!(parsed.instance_id, 7);
        assert_eq!(parsed.stack_index, 2);
        assert_eq!(parsed.kind.logical_path(), "");
    }

    #[test]
    fn handle_round_trip_nested() {
        let h = nested_handle("a.b", 7, 2, Subkind::Generator);
        assert_eq!(h, "a.b-7-2-generator");
        let parsed = parse_handle(&h).unwrap();
        assert_eq!(parsed.kind.logical_path(), "a.b");
        assert_eq!(parsed.kind.subkind(), Some(Subkind::Generator));
    }

    #[test]
    fn global_handle_has_double_dash() {
        let h = global_handle(3, 0);
        assert_eq!(h, "global--3-0");
        let parsed = parse_handle(&h).unwrap();
        assert!(matches!(parsed.kind, HandleKind::Global));
    }

    #[test]
    fn reconstructs_dotted_name_through_parent_chain() {
        let mut table = HandleTable::new();
        let top = table.alloc("local-1-0".into(), None, String::new());
        let mid = table.alloc("a-1-0-local".into(), Some(top), "a".into());
        let name = table.reconstruct_dotted_name(mid, "b").unwrap();
        assert_eq!(name, "a.b");
    }

    #[test]
    fn reconstructs_top_level_name_without_a_leading_dot() {
        let mut table = HandleTable::new();
        let top = table.alloc("local-1-0".into(), None, String::new());
        let name = table.reconstruct_dotted_name(top, "x").unwrap();
        assert_eq!(name, "x");
    }
}
