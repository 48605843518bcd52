//! Stored RDF nodes.
//!
//! A [`Node`] is a [`Term`] plus its storage identity: a numeric id handed out
//! by the [`IdService`](crate::ids::IdService) and a creation timestamp. Nodes
//! are shared as [`NodeRef`] (`Arc<Node>`); within one connection two requests
//! for the same term return the same allocation, so identity checks can use
//! [`Arc::ptr_eq`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

use crate::error::ModelError;

use super::term::Term;
use super::vocab::{self, LiteralClass};

/// Shared handle to a stored node.
pub type NodeRef = Arc<Node>;

/// Storage type tag of a node, persisted in the `ntype` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Uri,
    BNode,
    String,
    Int,
    Double,
    Boolean,
    Date,
    Geometry,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Uri => "uri",
            NodeType::BNode => "bnode",
            NodeType::String => "string",
            NodeType::Int => "int",
            NodeType::Double => "double",
            NodeType::Boolean => "boolean",
            NodeType::Date => "date",
            NodeType::Geometry => "geom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "uri" => NodeType::Uri,
            "bnode" => NodeType::BNode,
            "string" => NodeType::String,
            "int" => NodeType::Int,
            "double" => NodeType::Double,
            "boolean" => NodeType::Boolean,
            "date" => NodeType::Date,
            "geom" => NodeType::Geometry,
            _ => return None,
        })
    }
}

/// Variant payload of a node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Uri {
        uri: String,
    },
    Anon {
        id: String,
    },
    StringLiteral {
        content: String,
        language: Option<String>,
        datatype: Option<NodeRef>,
    },
    IntLiteral {
        content: String,
        value: i64,
        datatype: NodeRef,
    },
    DoubleLiteral {
        content: String,
        value: f64,
        datatype: NodeRef,
    },
    BooleanLiteral {
        content: String,
        value: bool,
        datatype: NodeRef,
    },
    DateLiteral {
        content: String,
        value: DateTime<FixedOffset>,
        datatype: NodeRef,
    },
    GeometryLiteral {
        wkt: String,
        datatype: NodeRef,
    },
}

/// An RDF term with storage identity.
#[derive(Debug, Clone)]
pub struct Node {
    id: i64,
    created: DateTime<Utc>,
    kind: NodeKind,
}

impl Node {
    /// Id of a node that is not backed by storage.
    pub const NO_ID: i64 = -1;

    pub fn new(id: i64, created: DateTime<Utc>, kind: NodeKind) -> Self {
        Self { id, created, kind }
    }

    /// Build a node from a term, choosing the literal variant by datatype.
    ///
    /// `datatype` must be the resolved URI node of the term's datatype when the
    /// term is a typed literal. Content that does not parse as its datatype is
    /// kept as a string literal carrying that datatype.
    pub fn from_term(
        id: i64,
        created: DateTime<Utc>,
        term: &Term,
        datatype: Option<NodeRef>,
    ) -> Result<Self, ModelError> {
        let kind = match term {
            Term::Uri(uri) => NodeKind::Uri { uri: uri.clone() },
            Term::BNode(b) => NodeKind::Anon { id: b.clone() },
            Term::Literal {
                content,
                language: Some(lang),
                ..
            } => NodeKind::StringLiteral {
                content: content.clone(),
                language: Some(lang.clone()),
                datatype: None,
            },
            Term::Literal {
                content,
                language: None,
                datatype: None,
            } => NodeKind::StringLiteral {
                content: content.clone(),
                language: None,
                datatype: None,
            },
            Term::Literal {
                content,
                language: None,
                datatype: Some(dt),
            } => {
                let dt_node = datatype
                    .filter(|n| n.is_uri() && n.string_value() == dt)
                    .ok_or_else(|| ModelError::InvalidTerm {
                        input: term.to_string(),
                        message: format!("datatype node <{dt}> was not resolved"),
                    })?;
                classify_literal(content, dt_node)
            }
        };
        Ok(Self { id, created, kind })
    }

    /// A node without storage identity. Used for terms that only exist in memory.
    pub fn transient(term: &Term, datatype: Option<NodeRef>) -> Result<Self, ModelError> {
        Self::from_term(Self::NO_ID, super::now(), term, datatype)
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Whether the node carries an id from the ID service.
    pub fn has_id(&self) -> bool {
        self.id > 0
    }

    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            NodeKind::Uri { .. } => NodeType::Uri,
            NodeKind::Anon { .. } => NodeType::BNode,
            NodeKind::StringLiteral { .. } => NodeType::String,
            NodeKind::IntLiteral { .. } => NodeType::Int,
            NodeKind::DoubleLiteral { .. } => NodeType::Double,
            NodeKind::BooleanLiteral { .. } => NodeType::Boolean,
            NodeKind::DateLiteral { .. } => NodeType::Date,
            NodeKind::GeometryLiteral { .. } => NodeType::Geometry,
        }
    }

    pub fn is_uri(&self) -> bool {
        matches!(self.kind, NodeKind::Uri { .. })
    }

    pub fn is_anon(&self) -> bool {
        matches!(self.kind, NodeKind::Anon { .. })
    }

    pub fn is_literal(&self) -> bool {
        !self.is_resource()
    }

    pub fn is_resource(&self) -> bool {
        self.is_uri() || self.is_anon()
    }

    /// The URI, blank node label, literal content or WKT text.
    pub fn string_value(&self) -> &str {
        match &self.kind {
            NodeKind::Uri { uri } => uri,
            NodeKind::Anon { id } => id,
            NodeKind::StringLiteral { content, .. }
            | NodeKind::IntLiteral { content, .. }
            | NodeKind::DoubleLiteral { content, .. }
            | NodeKind::BooleanLiteral { content, .. }
            | NodeKind::DateLiteral { content, .. } => content,
            NodeKind::GeometryLiteral { wkt, .. } => wkt,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::StringLiteral { language, .. } => language.as_deref(),
            _ => None,
        }
    }

    pub fn datatype(&self) -> Option<&NodeRef> {
        match &self.kind {
            NodeKind::StringLiteral { datatype, .. } => datatype.as_ref(),
            NodeKind::IntLiteral { datatype, .. }
            | NodeKind::DoubleLiteral { datatype, .. }
            | NodeKind::BooleanLiteral { datatype, .. }
            | NodeKind::DateLiteral { datatype, .. }
            | NodeKind::GeometryLiteral { datatype, .. } => Some(datatype),
            _ => None,
        }
    }

    pub fn datatype_uri(&self) -> Option<&str> {
        self.datatype().map(|d| d.string_value())
    }

    pub fn int_value(&self) -> Option<i64> {
        match &self.kind {
            NodeKind::IntLiteral { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn double_value(&self) -> Option<f64> {
        match &self.kind {
            NodeKind::IntLiteral { value, .. } => Some(*value as f64),
            NodeKind::DoubleLiteral { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn bool_value(&self) -> Option<bool> {
        match &self.kind {
            NodeKind::BooleanLiteral { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn date_value(&self) -> Option<DateTime<FixedOffset>> {
        match &self.kind {
            NodeKind::DateLiteral { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The transient term this node stores.
    pub fn term(&self) -> Term {
        match &self.kind {
            NodeKind::Uri { uri } => Term::Uri(uri.clone()),
            NodeKind::Anon { id } => Term::BNode(id.clone()),
            _ => Term::Literal {
                content: self.string_value().to_string(),
                language: self.language().map(str::to_string),
                datatype: self.datatype_uri().map(str::to_string),
            },
        }
    }

    /// Whether this node stores `term`, compared without allocating.
    pub fn matches_term(&self, term: &Term) -> bool {
        match (&self.kind, term) {
            (NodeKind::Uri { uri }, Term::Uri(u)) => uri == u,
            (NodeKind::Anon { id }, Term::BNode(b)) => id == b,
            (
                _,
                Term::Literal {
                    content,
                    language,
                    datatype,
                },
            ) if self.is_literal() => {
                self.string_value() == content
                    && self.language() == language.as_deref()
                    && self.datatype_uri() == datatype.as_deref()
            }
            _ => false,
        }
    }

    /// Content digest of the stored term.
    pub fn digest(&self) -> String {
        self.term().digest()
    }

    fn class_tag(&self) -> u8 {
        match self.kind {
            NodeKind::Uri { .. } => 0,
            NodeKind::Anon { .. } => 1,
            _ => 2,
        }
    }
}

fn classify_literal(content: &str, dt_node: NodeRef) -> NodeKind {
    let content_owned = content.to_string();
    match vocab::literal_class(dt_node.string_value()) {
        LiteralClass::Int => match content.trim().parse::<i64>() {
            Ok(value) => NodeKind::IntLiteral {
                content: content_owned,
                value,
                datatype: dt_node,
            },
            Err(_) => string_with_type(content_owned, dt_node),
        },
        LiteralClass::Double => match content.trim().parse::<f64>() {
            Ok(value) => NodeKind::DoubleLiteral {
                content: content_owned,
                value,
                datatype: dt_node,
            },
            Err(_) => string_with_type(content_owned, dt_node),
        },
        LiteralClass::Boolean => match content.trim() {
            "true" | "1" => NodeKind::BooleanLiteral {
                content: content_owned,
                value: true,
                datatype: dt_node,
            },
            "false" | "0" => NodeKind::BooleanLiteral {
                content: content_owned,
                value: false,
                datatype: dt_node,
            },
            _ => string_with_type(content_owned, dt_node),
        },
        LiteralClass::Date => match parse_date(content.trim()) {
            Some(value) => NodeKind::DateLiteral {
                content: content_owned,
                value,
                datatype: dt_node,
            },
            None => string_with_type(content_owned, dt_node),
        },
        LiteralClass::Geometry => NodeKind::GeometryLiteral {
            wkt: content_owned,
            datatype: dt_node,
        },
        LiteralClass::String => string_with_type(content_owned, dt_node),
    }
}

fn string_with_type(content: String, dt_node: NodeRef) -> NodeKind {
    NodeKind::StringLiteral {
        content,
        language: None,
        datatype: Some(dt_node),
    }
}

/// xsd:dateTime with or without offset, or xsd:date. Missing offsets are UTC.
fn parse_date(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    let utc = FixedOffset::east_opt(0)?;
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().with_timezone(&utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().with_timezone(&utc))
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.class_tag() == other.class_tag()
            && self.string_value() == other.string_value()
            && self.language() == other.language()
            && self.datatype_uri() == other.datatype_uri()
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class_tag().hash(state);
        self.string_value().hash(state);
        self.language().hash(state);
        self.datatype_uri().hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.term().fmt(f)
    }
}
