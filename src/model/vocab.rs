//! Datatype IRIs the node model classifies literals by.

pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_INT: &str = "http://www.w3.org/2001/XMLSchema#int";
pub const XSD_LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
pub const XSD_FLOAT: &str = "http://www.w3.org/2001/XMLSchema#float";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
pub const XSD_DATE: &str = "http://www.w3.org/2001/XMLSchema#date";

pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

pub const GEO_WKT_LITERAL: &str = "http://www.opengis.net/ont/geosparql#wktLiteral";

/// Integer-valued XSD types, all stored as 64-bit integers.
const INTEGER_TYPES: &[&str] = &[
    "integer",
    "int",
    "long",
    "short",
    "byte",
    "nonNegativeInteger",
    "nonPositiveInteger",
    "negativeInteger",
    "positiveInteger",
    "unsignedLong",
    "unsignedInt",
    "unsignedShort",
    "unsignedByte",
];

/// Storage class of a typed literal, chosen by its datatype IRI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralClass {
    Int,
    Double,
    Boolean,
    Date,
    Geometry,
    String,
}

/// Classify a datatype IRI.
pub fn literal_class(datatype: &str) -> LiteralClass {
    if datatype == GEO_WKT_LITERAL {
        return LiteralClass::Geometry;
    }
    let Some(local) = datatype.strip_prefix(XSD) else {
        return LiteralClass::String;
    };
    match local {
        "double" | "float" | "decimal" => LiteralClass::Double,
        "boolean" => LiteralClass::Boolean,
        "dateTime" | "date" => LiteralClass::Date,
        l if INTEGER_TYPES.contains(&l) => LiteralClass::Int,
        _ => LiteralClass::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_xsd_types() {
        assert_eq!(literal_class(XSD_INTEGER), LiteralClass::Int);
        assert_eq!(literal_class(XSD_LONG), LiteralClass::Int);
        assert_eq!(literal_class(XSD_FLOAT), LiteralClass::Double);
        assert_eq!(literal_class(XSD_BOOLEAN), LiteralClass::Boolean);
        assert_eq!(literal_class(XSD_DATE), LiteralClass::Date);
        assert_eq!(literal_class(GEO_WKT_LITERAL), LiteralClass::Geometry);
        assert_eq!(literal_class(XSD_STRING), LiteralClass::String);
        assert_eq!(
            literal_class("http://example.org/custom"),
            LiteralClass::String
        );
    }
}
