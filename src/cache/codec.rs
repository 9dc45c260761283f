//! Value Codec Module
//!
//! Encodes values into a flat, self-describing `key=value&key=value` form and
//! decodes them back.
//!
//! Every node carries a type tag under `t` and its value under `v`; typed
//! objects add their class name under `c`. Nested nodes are addressed with
//! bracketed paths, e.g. `{"b": [2]}` becomes
//! `t=map&v[b][t]=list&v[b][v][0][t]=integer&v[b][v][0][v]=2`.
//! Path segments and leaves are percent-encoded, so the output is plain ASCII
//! and never contains a newline.

use std::collections::BTreeMap;

use tracing::debug;

use crate::cache::key;
use crate::cache::value::{Fields, TypeRegistry, Value};
use crate::error::{CacheError, Result};

const TAG: &str = "t";
const VALUE: &str = "v";
const CLASS: &str = "c";

// Longest prefix tried by the lenient float parser
const MAX_FLOAT_PREFIX: usize = 64;

// == Parsed Tree ==
/// Intermediate nested structure rebuilt from the flat pairs.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(String),
    Branch(BTreeMap<String, Node>),
}

// == Value Codec ==
/// Encoder/decoder for cache payloads.
///
/// Construct once and hand it to the store; the registry it owns decides
/// which typed objects can be rebuilt on decode.
#[derive(Debug, Default)]
pub struct ValueCodec {
    registry: TypeRegistry,
}

impl ValueCodec {
    pub fn new(registry: TypeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    // == Encode ==
    /// Encodes a value into its flat text form.
    ///
    /// Fails with `UnsupportedValueKind` for non-finite floats and typed
    /// objects without a class name.
    pub fn encode(&self, value: &Value) -> Result<String> {
        let mut pairs = Vec::new();
        encode_node("", value, &mut pairs)?;
        Ok(pairs
            .into_iter()
            .map(|(path, leaf)| format!("{}={}", path, key::encode(leaf)))
            .collect::<Vec<_>>()
            .join("&"))
    }

    // == Decode ==
    /// Decodes a flat payload. Returns `None` for an empty payload.
    ///
    /// Never fails: payloads that do not follow the tagged layout decode to
    /// the best-effort raw structure.
    pub fn decode(&self, payload: &str) -> Option<Value> {
        let payload = payload.trim();
        if payload.is_empty() {
            return None;
        }
        let root = parse_tree(payload);
        Some(self.interpret(&root))
    }

    fn interpret(&self, node: &Node) -> Value {
        let children = match node {
            Node::Leaf(s) => return Value::Str(s.clone()),
            Node::Branch(children) => children,
        };
        let inner = children.get(VALUE);
        let tag = match children.get(TAG) {
            Some(Node::Leaf(tag)) => tag.as_str(),
            _ => {
                debug!("Payload node has no type tag, returning raw structure");
                return raw(inner.unwrap_or(node));
            }
        };

        match tag {
            "boolean" => Value::Bool(parse_bool(leaf_str(inner))),
            "integer" => Value::Int(parse_int(leaf_str(inner))),
            "double" | "float" => Value::Float(parse_float(leaf_str(inner))),
            "string" => match inner {
                None => Value::Str(String::new()),
                Some(node) => raw(node),
            },
            "list" => match inner {
                None => Value::List(Vec::new()),
                Some(Node::Branch(items)) => self.interpret_list(items),
                Some(leaf) => raw(leaf),
            },
            "map" => match inner {
                None => Value::Map(Fields::new()),
                Some(Node::Branch(entries)) => Value::Map(self.interpret_fields(entries)),
                Some(leaf) => raw(leaf),
            },
            "object" => {
                let fields = match inner {
                    Some(Node::Branch(entries)) => self.interpret_fields(entries),
                    _ => Fields::new(),
                };
                let class = leaf_str(children.get(CLASS));
                match self.registry.populate(class, &fields) {
                    Some(fields) => Value::Object {
                        class: class.to_string(),
                        fields,
                    },
                    None => {
                        debug!(class, "Falling back to untyped map for object");
                        Value::Map(fields)
                    }
                }
            }
            other => {
                debug!(tag = other, "Unknown type tag, returning raw structure");
                raw(inner.unwrap_or(node))
            }
        }
    }

    fn interpret_fields(&self, entries: &BTreeMap<String, Node>) -> Fields {
        entries
            .iter()
            .map(|(k, v)| (k.clone(), self.interpret(v)))
            .collect()
    }

    fn interpret_list(&self, items: &BTreeMap<String, Node>) -> Value {
        let indexed: Option<Vec<(usize, &Node)>> = items
            .iter()
            .map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
            .collect();
        match indexed {
            Some(mut indexed) => {
                indexed.sort_by_key(|(i, _)| *i);
                Value::List(indexed.into_iter().map(|(_, v)| self.interpret(v)).collect())
            }
            None => Value::Map(self.interpret_fields(items)),
        }
    }
}

// == Encoding Helpers ==
fn child(prefix: &str, segment: &str) -> String {
    let segment = key::encode(segment);
    if prefix.is_empty() {
        segment
    } else {
        format!("{}[{}]", prefix, segment)
    }
}

fn encode_node(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) -> Result<()> {
    out.push((child(prefix, TAG), value.kind().to_string()));
    let inner = child(prefix, VALUE);

    match value {
        Value::Bool(b) => out.push((inner, String::from(if *b { "1" } else { "0" }))),
        Value::Int(i) => out.push((inner, i.to_string())),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(CacheError::UnsupportedValueKind(format!("float {}", f)));
            }
            out.push((inner, f.to_string()));
        }
        Value::Str(s) => out.push((inner, s.clone())),
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                encode_node(&child(&inner, &i.to_string()), item, out)?;
            }
        }
        Value::Map(fields) => encode_fields(&inner, fields, out)?,
        Value::Object { class, fields } => {
            if class.is_empty() {
                return Err(CacheError::UnsupportedValueKind(
                    "object without class name".to_string(),
                ));
            }
            out.push((child(prefix, CLASS), class.clone()));
            encode_fields(&inner, fields, out)?;
        }
    }
    Ok(())
}

fn encode_fields(prefix: &str, fields: &Fields, out: &mut Vec<(String, String)>) -> Result<()> {
    for (name, value) in fields {
        encode_node(&child(prefix, name), value, out)?;
    }
    Ok(())
}

// == Decoding Helpers ==
fn parse_tree(payload: &str) -> Node {
    let mut root = BTreeMap::new();
    for pair in payload.split('&').filter(|p| !p.is_empty()) {
        let (path, leaf) = pair.split_once('=').unwrap_or((pair, ""));
        let segments = parse_path(path);
        insert(&mut root, &segments, key::decode_lossy(leaf));
    }
    Node::Branch(root)
}

/// Splits `a[b][c]` into decoded segments. An unterminated bracket is kept
/// as literal text of the last segment.
fn parse_path(raw: &str) -> Vec<String> {
    let (head, mut rest) = match raw.find('[') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    let mut segments = vec![key::decode_lossy(head)];

    while let Some(stripped) = rest.strip_prefix('[') {
        match stripped.find(']') {
            Some(end) => {
                segments.push(key::decode_lossy(&stripped[..end]));
                rest = &stripped[end + 1..];
            }
            None => {
                if let Some(last) = segments.last_mut() {
                    last.push_str(&key::decode_lossy(rest));
                }
                break;
            }
        }
    }
    segments
}

fn insert(node: &mut BTreeMap<String, Node>, segments: &[String], leaf: String) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        node.insert(first.clone(), Node::Leaf(leaf));
        return;
    }
    let entry = node
        .entry(first.clone())
        .or_insert_with(|| Node::Branch(BTreeMap::new()));
    if matches!(entry, Node::Leaf(_)) {
        *entry = Node::Branch(BTreeMap::new());
    }
    if let Node::Branch(children) = entry {
        insert(children, rest, leaf);
    }
}

fn raw(node: &Node) -> Value {
    match node {
        Node::Leaf(s) => Value::Str(s.clone()),
        Node::Branch(children) => Value::Map(
            children
                .iter()
                .map(|(k, v)| (k.clone(), raw(v)))
                .collect(),
        ),
    }
}

fn leaf_str(node: Option<&Node>) -> &str {
    match node {
        Some(Node::Leaf(s)) => s,
        _ => "",
    }
}

// == Lenient Scalar Parsing ==
/// `true`/`1`/`yes`/`on` are true; everything else is false.
pub(crate) fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Parses an optional sign and the leading decimal digits, ignoring trailing
/// garbage. Saturates on overflow; `0` when there are no digits.
pub(crate) fn parse_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut acc: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        let d = i64::from(b - b'0');
        let next = acc.checked_mul(10).and_then(|a| {
            if negative {
                a.checked_sub(d)
            } else {
                a.checked_add(d)
            }
        });
        acc = match next {
            Some(n) => n,
            None => return if negative { i64::MIN } else { i64::MAX },
        };
    }
    acc
}

/// Parses a float, falling back to the longest parsable prefix, else `0.0`.
pub(crate) fn parse_float(s: &str) -> f64 {
    let s = s.trim();
    if let Ok(f) = s.parse::<f64>() {
        return f;
    }
    let limit = s.len().min(MAX_FLOAT_PREFIX);
    (1..=limit)
        .rev()
        .filter(|&end| s.is_char_boundary(end))
        .find_map(|end| s[..end].parse::<f64>().ok())
        .unwrap_or(0.0)
}
