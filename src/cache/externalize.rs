//! Compact binary form of nodes and triples for the second cache tier.
//!
//! Payloads start with a format version byte followed by a bincode-encoded
//! representation. Triples whose subject and object are both URIs are
//! written in prefix mode: the longest common prefix of the two URIs is
//! stored once and each node only keeps its id, suffix and creation time.
//! Decoding restores the exact strings, ids and timestamps.

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::model::{Node, NodeRef, Term, Triple, TripleState, from_millis, to_millis};

use super::tier::CacheResult;

/// Current payload format.
pub const FORMAT_VERSION: u8 = 1;

/// A datatype node, always a URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DatatypeRepr {
    id: i64,
    uri: String,
    created: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum NodeRepr {
    Uri {
        id: i64,
        created: i64,
        uri: String,
    },
    BNode {
        id: i64,
        created: i64,
        label: String,
    },
    Literal {
        id: i64,
        created: i64,
        content: String,
        language: Option<String>,
        datatype: Option<DatatypeRepr>,
    },
}

/// A URI node written relative to a shared prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SuffixRepr {
    id: i64,
    suffix: String,
    created: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TripleMeta {
    id: i64,
    created: i64,
    deleted_at: Option<i64>,
    inferred: bool,
    predicate: NodeRepr,
    context: Option<NodeRepr>,
    creator: Option<NodeRepr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TripleRepr {
    Prefixed {
        meta: TripleMeta,
        prefix: String,
        subject: SuffixRepr,
        object: SuffixRepr,
    },
    Plain {
        meta: TripleMeta,
        subject: NodeRepr,
        object: NodeRepr,
    },
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn node_repr(node: &Node) -> NodeRepr {
    let id = node.id();
    let created = to_millis(&node.created());
    if node.is_uri() {
        NodeRepr::Uri {
            id,
            created,
            uri: node.string_value().to_string(),
        }
    } else if node.is_anon() {
        NodeRepr::BNode {
            id,
            created,
            label: node.string_value().to_string(),
        }
    } else {
        NodeRepr::Literal {
            id,
            created,
            content: node.string_value().to_string(),
            language: node.language().map(str::to_string),
            datatype: node.datatype().map(|dt| DatatypeRepr {
                id: dt.id(),
                uri: dt.string_value().to_string(),
                created: to_millis(&dt.created()),
            }),
        }
    }
}

/// Longest common prefix of `a` and `b`, cut at a char boundary.
fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let len = a
        .char_indices()
        .zip(b.chars())
        .take_while(|((_, ca), cb)| ca == cb)
        .last()
        .map_or(0, |((i, c), _)| i + c.len_utf8());
    &a[..len]
}

fn frame<T: Serialize>(value: &T) -> CacheResult<Vec<u8>> {
    let body = bincode::serialize(value).map_err(|e| CacheError::Encode {
        message: e.to_string(),
    })?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

fn unframe<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> CacheResult<T> {
    match bytes.split_first() {
        Some((&FORMAT_VERSION, body)) => bincode::deserialize(body).map_err(|e| CacheError::Decode {
            message: e.to_string(),
        }),
        Some((version, _)) => Err(CacheError::Decode {
            message: format!("unknown format version {version}"),
        }),
        None => Err(CacheError::Decode {
            message: "empty payload".into(),
        }),
    }
}

pub fn encode_node(node: &Node) -> CacheResult<Vec<u8>> {
    frame(&node_repr(node))
}

pub fn encode_triple(triple: &Triple) -> CacheResult<Vec<u8>> {
    let meta = TripleMeta {
        id: triple.id,
        created: to_millis(&triple.created),
        deleted_at: triple.deleted_at().map(|d| to_millis(&d)),
        inferred: triple.inferred,
        predicate: node_repr(&triple.predicate),
        context: triple.context.as_deref().map(node_repr),
        creator: triple.creator.as_deref().map(node_repr),
    };
    let repr = if triple.subject.is_uri() && triple.object.is_uri() {
        let s = triple.subject.string_value();
        let o = triple.object.string_value();
        let prefix = common_prefix(s, o);
        TripleRepr::Prefixed {
            meta,
            prefix: prefix.to_string(),
            subject: SuffixRepr {
                id: triple.subject.id(),
                suffix: s[prefix.len()..].to_string(),
                created: to_millis(&triple.subject.created()),
            },
            object: SuffixRepr {
                id: triple.object.id(),
                suffix: o[prefix.len()..].to_string(),
                created: to_millis(&triple.object.created()),
            },
        }
    } else {
        TripleRepr::Plain {
            meta,
            subject: node_repr(&triple.subject),
            object: node_repr(&triple.object),
        }
    };
    frame(&repr)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn build(id: i64, created: i64, term: &Term, datatype: Option<NodeRef>) -> CacheResult<Node> {
    Node::from_term(id, from_millis(created), term, datatype).map_err(|e| CacheError::Decode {
        message: e.to_string(),
    })
}

fn restore(repr: NodeRepr, intern: &mut dyn FnMut(Node) -> NodeRef) -> CacheResult<NodeRef> {
    let node = match repr {
        NodeRepr::Uri { id, created, uri } => build(id, created, &Term::Uri(uri), None)?,
        NodeRepr::BNode { id, created, label } => build(id, created, &Term::BNode(label), None)?,
        NodeRepr::Literal {
            id,
            created,
            content,
            language,
            datatype,
        } => {
            let dt_uri = datatype.as_ref().map(|d| d.uri.clone());
            let dt_node = datatype
                .map(|d| build(d.id, d.created, &Term::Uri(d.uri), None).map(&mut *intern))
                .transpose()?;
            let term = Term::Literal {
                content,
                language,
                datatype: dt_uri,
            };
            build(id, created, &term, dt_node)?
        }
    };
    Ok(intern(node))
}

fn restore_suffix(
    prefix: &str,
    repr: SuffixRepr,
    intern: &mut dyn FnMut(Node) -> NodeRef,
) -> CacheResult<NodeRef> {
    let uri = format!("{prefix}{}", repr.suffix);
    Ok(intern(build(repr.id, repr.created, &Term::Uri(uri), None)?))
}

/// Decode a node. `intern` turns decoded nodes into shared handles, which
/// lets the caller substitute instances it already holds.
pub fn decode_node(bytes: &[u8], intern: &mut dyn FnMut(Node) -> NodeRef) -> CacheResult<NodeRef> {
    restore(unframe(bytes)?, intern)
}

/// Decode a triple; every node passes through `intern`.
pub fn decode_triple(bytes: &[u8], intern: &mut dyn FnMut(Node) -> NodeRef) -> CacheResult<Triple> {
    let (meta, subject, object) = match unframe::<TripleRepr>(bytes)? {
        TripleRepr::Prefixed {
            meta,
            prefix,
            subject,
            object,
        } => {
            let s = restore_suffix(&prefix, subject, intern)?;
            let o = restore_suffix(&prefix, object, intern)?;
            (meta, s, o)
        }
        TripleRepr::Plain {
            meta,
            subject,
            object,
        } => {
            let s = restore(subject, intern)?;
            let o = restore(object, intern)?;
            (meta, s, o)
        }
    };
    let predicate = restore(meta.predicate, intern)?;
    let context = meta.context.map(|c| restore(c, intern)).transpose()?;
    let creator = meta.creator.map(|c| restore(c, intern)).transpose()?;
    Ok(Triple {
        id: meta.id,
        subject,
        predicate,
        object,
        context,
        creator,
        created: from_millis(meta.created),
        state: match meta.deleted_at {
            Some(at) => TripleState::Deleted { at: from_millis(at) },
            None => TripleState::Active,
        },
        inferred: meta.inferred,
        new_triple: false,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{now, vocab};

    fn fresh(node: Node) -> NodeRef {
        Arc::new(node)
    }

    fn node(id: i64, term: Term) -> NodeRef {
        let dt = term
            .datatype()
            .map(|d| Arc::new(Node::from_term(id + 1000, now(), &Term::uri(d), None).unwrap()));
        Arc::new(Node::from_term(id, now(), &term, dt).unwrap())
    }

    fn assert_same_node(a: &NodeRef, b: &NodeRef) {
        assert_eq!(a.id(), b.id());
        assert_eq!(a.created(), b.created());
        assert_eq!(a.term(), b.term());
        assert_eq!(a.node_type(), b.node_type());
        assert_eq!(a.datatype().map(|d| d.id()), b.datatype().map(|d| d.id()));
    }

    #[test]
    fn prefix_mode_round_trip() {
        let s = node(1, Term::uri("http://localhost/resource/alice"));
        let p = node(2, Term::uri("http://xmlns.com/foaf/0.1/depiction"));
        let o = node(3, Term::uri("http://localhost/resource/alice-photo"));
        let mut t = Triple::new(42, s.clone(), p.clone(), o.clone(), Some(node(4, Term::uri("http://localhost/g"))))
            .with_inferred(true);
        t.mark_deleted(now());

        let bytes = encode_triple(&t).unwrap();
        match unframe::<TripleRepr>(&bytes).unwrap() {
            TripleRepr::Prefixed { prefix, subject, object, .. } => {
                assert_eq!(prefix, "http://localhost/resource/alice");
                assert_eq!(subject.suffix, "");
                assert_eq!(object.suffix, "-photo");
            }
            other => panic!("expected prefix mode, got {other:?}"),
        }

        let back = decode_triple(&bytes, &mut fresh).unwrap();
        assert_eq!(back.id, 42);
        assert_eq!(back, t);
        assert_same_node(&back.subject, &s);
        assert_same_node(&back.object, &o);
        assert_same_node(&back.predicate, &p);
        assert_eq!(back.state, t.state);
        assert!(back.inferred);
        assert_eq!(back.created, t.created);
    }

    #[test]
    fn prefix_mode_without_shared_prefix() {
        let s = node(1, Term::uri("urn:a"));
        let o = node(3, Term::uri("http://b"));
        let t = Triple::new(1, s, node(2, Term::uri("http://p")), o.clone(), None);
        let back = decode_triple(&encode_triple(&t).unwrap(), &mut fresh).unwrap();
        assert_eq!(back.object.string_value(), "http://b");
        assert_eq!(back, t);
    }

    #[test]
    fn plain_mode_keeps_literal_types() {
        let s = node(1, Term::bnode("b0"));
        let o = node(3, Term::typed_literal("7", vocab::XSD_INTEGER));
        let creator = node(5, Term::uri("http://agent"));
        let t = Triple::new(9, s.clone(), node(2, Term::uri("http://p")), o.clone(), None).with_creator(creator);
        let bytes = encode_triple(&t).unwrap();
        assert!(matches!(unframe::<TripleRepr>(&bytes).unwrap(), TripleRepr::Plain { .. }));

        let back = decode_triple(&bytes, &mut fresh).unwrap();
        assert_same_node(&back.subject, &s);
        assert_same_node(&back.object, &o);
        assert_eq!(back.object.int_value(), Some(7));
        assert_eq!(back.creator.unwrap().string_value(), "http://agent");
        assert_eq!(back.context, None);
    }

    #[test]
    fn node_round_trip_with_language() {
        let n = node(8, Term::lang_literal("chat", "fr"));
        let back = decode_node(&encode_node(&n).unwrap(), &mut fresh).unwrap();
        assert_same_node(&back, &n);
        assert_eq!(back.language(), Some("fr"));
    }

    #[test]
    fn intern_hook_sees_every_node() {
        let t = Triple::new(
            1,
            node(1, Term::uri("http://x/s")),
            node(2, Term::uri("http://x/p")),
            node(3, Term::typed_literal("1.5", vocab::XSD_DOUBLE)),
            None,
        );
        let mut seen = Vec::new();
        let mut intern = |n: Node| {
            seen.push(n.id());
            Arc::new(n)
        };
        decode_triple(&encode_triple(&t).unwrap(), &mut intern).unwrap();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 1003]);
    }

    #[test]
    fn corrupt_payloads_are_decode_errors() {
        let t = Triple::new(1, node(1, Term::uri("http://s")), node(2, Term::uri("http://p")), node(3, Term::uri("http://o")), None);
        let bytes = encode_triple(&t).unwrap();
        for bad in [&[][..], &[9, 1, 2][..], &bytes[..bytes.len() / 2]] {
            assert!(matches!(
                decode_triple(bad, &mut fresh),
                Err(CacheError::Decode { .. })
            ));
        }
    }

    #[test]
    fn common_prefix_respects_char_boundaries() {
        assert_eq!(common_prefix("http://ex/é1", "http://ex/é2"), "http://ex/é");
        assert_eq!(common_prefix("abc", "xyz"), "");
        assert_eq!(common_prefix("abc", "abc"), "abc");
    }
}
