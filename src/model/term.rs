//! Transient RDF term values.
//!
//! A [`Term`] is what callers hand to a connection before the term is
//! resolved to a stored [`Node`](super::Node). Terms print and parse in
//! N-Triples term syntax.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ModelError;

use super::vocab;

/// An RDF term without storage identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// A URI resource.
    Uri(String),
    /// A blank node with its internal label.
    BNode(String),
    /// A literal. `language` and `datatype` are mutually exclusive.
    Literal {
        content: String,
        language: Option<String>,
        datatype: Option<String>,
    },
}

impl Term {
    /// A URI resource without validation.
    pub fn uri(uri: impl Into<String>) -> Self {
        Term::Uri(uri.into())
    }

    /// A URI resource, validated as an absolute IRI.
    pub fn checked_uri(uri: impl Into<String>) -> Result<Self, ModelError> {
        let uri = uri.into();
        validate_iri(&uri)?;
        Ok(Term::Uri(uri))
    }

    pub fn bnode(id: impl Into<String>) -> Self {
        Term::BNode(id.into())
    }

    /// A plain literal.
    pub fn literal(content: impl Into<String>) -> Self {
        Term::Literal {
            content: content.into(),
            language: None,
            datatype: None,
        }
    }

    /// A language-tagged literal. The tag is normalised to lower case.
    pub fn lang_literal(content: impl Into<String>, language: impl AsRef<str>) -> Self {
        Term::Literal {
            content: content.into(),
            language: Some(language.as_ref().to_ascii_lowercase()),
            datatype: None,
        }
    }

    pub fn typed_literal(content: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            content: content.into(),
            language: None,
            datatype: Some(datatype.into()),
        }
    }

    pub fn integer(value: i64) -> Self {
        Self::typed_literal(value.to_string(), vocab::XSD_INTEGER)
    }

    pub fn double(value: f64) -> Self {
        Self::typed_literal(value.to_string(), vocab::XSD_DOUBLE)
    }

    pub fn boolean(value: bool) -> Self {
        Self::typed_literal(value.to_string(), vocab::XSD_BOOLEAN)
    }

    pub fn date_time(value: DateTime<Utc>) -> Self {
        Self::typed_literal(
            value.to_rfc3339_opts(SecondsFormat::Millis, true),
            vocab::XSD_DATE_TIME,
        )
    }

    pub fn is_uri(&self) -> bool {
        matches!(self, Term::Uri(_))
    }

    pub fn is_bnode(&self) -> bool {
        matches!(self, Term::BNode(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// URIs and blank nodes.
    pub fn is_resource(&self) -> bool {
        !self.is_literal()
    }

    /// The URI, blank node label, or literal content.
    pub fn string_value(&self) -> &str {
        match self {
            Term::Uri(u) => u,
            Term::BNode(b) => b,
            Term::Literal { content, .. } => content,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            Term::Literal { language, .. } => language.as_deref(),
            _ => None,
        }
    }

    pub fn datatype(&self) -> Option<&str> {
        match self {
            Term::Literal { datatype, .. } => datatype.as_deref(),
            _ => None,
        }
    }

    /// SHA-256 of the canonical N-Triples form, hex encoded.
    ///
    /// Used as the unique content key of a stored node.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }
}

fn validate_iri(iri: &str) -> Result<(), ModelError> {
    oxiri::Iri::parse(iri).map(|_| ()).map_err(|e| ModelError::InvalidIri {
        iri: iri.to_string(),
        message: e.to_string(),
    })
}

fn escape(content: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in content.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{c}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Uri(u) => write!(f, "<{u}>"),
            Term::BNode(b) => write!(f, "_:{b}"),
            Term::Literal {
                content,
                language,
                datatype,
            } => {
                f.write_str("\"")?;
                escape(content, f)?;
                f.write_str("\"")?;
                if let Some(lang) = language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl FromStr for Term {
    type Err = ModelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        let invalid = |message: &str| ModelError::InvalidTerm {
            input: input.to_string(),
            message: message.to_string(),
        };

        if let Some(rest) = s.strip_prefix('<') {
            let uri = rest
                .strip_suffix('>')
                .ok_or_else(|| invalid("missing closing '>'"))?;
            return Term::checked_uri(uri);
        }
        if let Some(label) = s.strip_prefix("_:") {
            if label.is_empty() || label.chars().any(char::is_whitespace) {
                return Err(invalid("blank node label must be non-empty without whitespace"));
            }
            return Ok(Term::bnode(label));
        }
        let Some(body) = s.strip_prefix('"') else {
            return Err(invalid("expected <uri>, _:label or a quoted literal"));
        };

        let (content, suffix) = unescape_until_quote(body).ok_or_else(|| invalid("unterminated literal"))?;
        if suffix.is_empty() {
            Ok(Term::literal(content))
        } else if let Some(lang) = suffix.strip_prefix('@') {
            if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(invalid("malformed language tag"));
            }
            Ok(Term::lang_literal(content, lang))
        } else if let Some(dt) = suffix.strip_prefix("^^") {
            let dt = dt
                .strip_prefix('<')
                .and_then(|d| d.strip_suffix('>'))
                .ok_or_else(|| invalid("datatype must be written as ^^<iri>"))?;
            validate_iri(dt)?;
            Ok(Term::typed_literal(content, dt))
        } else {
            Err(invalid("unexpected characters after literal"))
        }
    }
}

/// Read an escaped literal body up to the closing quote.
///
/// Returns the unescaped content and the remainder after the quote.
fn unescape_until_quote(body: &str) -> Option<(String, &str)> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &body[i + 1..])),
            '\\' => {
                let (_, esc) = chars.next()?;
                match esc {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    'u' | 'U' => {
                        let len = if esc == 'u' { 4 } else { 8 };
                        let hex: String = (0..len).filter_map(|_| chars.next().map(|(_, h)| h)).collect();
                        if hex.len() != len {
                            return None;
                        }
                        let code = u32::from_str_radix(&hex, 16).ok()?;
                        out.push(char::from_u32(code)?);
                    }
                    _ => return None,
                }
            }
            c => out.push(c),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_ntriples_syntax() {
        assert_eq!(Term::uri("http://ex.org/a").to_string(), "<http://ex.org/a>");
        assert_eq!(Term::bnode("b1").to_string(), "_:b1");
        assert_eq!(Term::literal("a \"q\"\n").to_string(), "\"a \\\"q\\\"\\n\"");
        assert_eq!(Term::lang_literal("chat", "FR").to_string(), "\"chat\"@fr");
        assert_eq!(
            Term::integer(5).to_string(),
            "\"5\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }

    #[test]
    fn parse_round_trips_display() {
        for term in [
            Term::uri("http://example.org/resource/alice"),
            Term::bnode("node17"),
            Term::literal("tab\there \\ \"quoted\""),
            Term::lang_literal("Hallo", "de-at"),
            Term::boolean(true),
        ] {
            let parsed: Term = term.to_string().parse().unwrap();
            assert_eq!(parsed, term);
        }
    }

    #[test]
    fn parse_unicode_escape() {
        let t: Term = "\"caf\\u00E9\"".parse().unwrap();
        assert_eq!(t.string_value(), "café");
    }

    #[test]
    fn parse_rejects_relative_iri_and_garbage() {
        assert!("<not absolute>".parse::<Term>().is_err());
        assert!("plain".parse::<Term>().is_err());
        assert!("\"open".parse::<Term>().is_err());
        assert!("\"x\"^^xsd:int".parse::<Term>().is_err());
        assert!("_:".parse::<Term>().is_err());
    }

    #[test]
    fn digest_distinguishes_kinds_with_same_text() {
        let uri = Term::uri("http://ex.org/a");
        let lit = Term::literal("http://ex.org/a");
        assert_ne!(uri.digest(), lit.digest());
        assert_eq!(uri.digest(), Term::uri("http://ex.org/a").digest());
        assert_eq!(uri.digest().len(), 64);
    }

    #[test]
    fn language_tags_are_case_normalised() {
        assert_eq!(Term::lang_literal("x", "EN-gb"), Term::lang_literal("x", "en-GB"));
    }
}
