// Read-only views over the global declarations of a schema document
use super::names::{QualifiedName, XBRLI, XSD};
use super::XmlNode;
use compact_str::CompactString;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeUse {
    #[default]
    Optional,
    Required,
    Prohibited,
}

impl AttributeUse {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("required") => AttributeUse::Required,
            Some("prohibited") => AttributeUse::Prohibited,
            _ => AttributeUse::Optional,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaElement {
    pub id: Option<CompactString>,
    pub name: CompactString,
    pub namespace: CompactString,
    pub type_name: Option<QualifiedName>,
    pub substitution_group: Option<QualifiedName>,
    pub is_abstract: bool,
    pub nillable: bool,
    pub default_value: Option<String>,
    // XBRL item attributes
    pub period_type: Option<CompactString>,
    pub balance: Option<CompactString>,
}

impl SchemaElement {
    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(self.namespace.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaType {
    pub id: Option<CompactString>,
    pub name: CompactString,
    pub namespace: CompactString,
    pub base_type: Option<QualifiedName>,
    pub is_complex: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaAttribute {
    pub id: Option<CompactString>,
    pub name: CompactString,
    pub namespace: CompactString,
    pub type_name: Option<QualifiedName>,
    pub default_value: Option<String>,
    pub use_: AttributeUse,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaDeclarations {
    pub elements: Vec<SchemaElement>,
    pub types: Vec<SchemaType>,
    pub attributes: Vec<SchemaAttribute>,
}

impl SchemaDeclarations {
    pub fn extend(&mut self, other: SchemaDeclarations) {
        self.elements.extend(other.elements);
        self.types.extend(other.types);
        self.attributes.extend(other.attributes);
    }
}

/// Extracts global declarations from a parsed `xs:schema` root.
pub trait SchemaReader: Send + Sync {
    fn read(&self, root: &dyn XmlNode) -> SchemaDeclarations;
}

/// Reads top-level `xs:element`, `xs:complexType`, `xs:simpleType` and
/// `xs:attribute` children. Anonymous or nameless declarations are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct XsdDeclarationReader;

impl SchemaReader for XsdDeclarationReader {
    fn read(&self, root: &dyn XmlNode) -> SchemaDeclarations {
        let target_namespace = root.attribute("", "targetNamespace").unwrap_or("");
        let mut decls = SchemaDeclarations::default();

        for child in root.children() {
            if child.namespace_uri() != XSD {
                continue;
            }
            let Some(name) = child.attribute("", "name").filter(|n| !n.is_empty()) else {
                continue;
            };
            let id = child.attribute("", "id").map(CompactString::from);
            let ns = child.namespaces();

            match child.local_name() {
                "element" => decls.elements.push(SchemaElement {
                    id,
                    name: name.into(),
                    namespace: target_namespace.into(),
                    type_name: child.attribute("", "type").and_then(|t| ns.resolve(t)),
                    substitution_group: child
                        .attribute("", "substitutionGroup")
                        .and_then(|t| ns.resolve(t)),
                    is_abstract: is_true(child.attribute("", "abstract")),
                    nillable: is_true(child.attribute("", "nillable")),
                    default_value: child.attribute("", "default").map(str::to_string),
                    period_type: child.attribute(XBRLI, "periodType").map(CompactString::from),
                    balance: child.attribute(XBRLI, "balance").map(CompactString::from),
                }),
                kind @ ("complexType" | "simpleType") => decls.types.push(SchemaType {
                    id,
                    name: name.into(),
                    namespace: target_namespace.into(),
                    base_type: derivation_base(child.as_ref()),
                    is_complex: kind == "complexType",
                }),
                "attribute" => decls.attributes.push(SchemaAttribute {
                    id,
                    name: name.into(),
                    namespace: target_namespace.into(),
                    type_name: child.attribute("", "type").and_then(|t| ns.resolve(t)),
                    default_value: child.attribute("", "default").map(str::to_string),
                    use_: AttributeUse::parse(child.attribute("", "use")),
                }),
                _ => {}
            }
        }

        decls
    }
}

fn is_true(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("true") | Some("1"))
}

// simpleType/restriction, or (simple|complex)Content/(restriction|extension)
fn derivation_base(type_node: &dyn XmlNode) -> Option<QualifiedName> {
    for child in type_node.children() {
        if child.namespace_uri() != XSD {
            continue;
        }
        match child.local_name() {
            "restriction" | "extension" => {
                return child
                    .attribute("", "base")
                    .and_then(|b| child.namespaces().resolve(b));
            }
            "simpleContent" | "complexContent" => {
                if let Some(base) = derivation_base(child.as_ref()) {
                    return Some(base);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{QuickXmlEngine, XmlEngine};
    use pretty_assertions::assert_eq;
    use url::Url;

    const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
        xmlns:xbrli="http://www.xbrl.org/2003/instance"
        xmlns:ex="http://example.com/ex"
        targetNamespace="http://example.com/ex">
      <xs:element id="ex_Assets" name="Assets" type="xbrli:monetaryItemType"
          substitutionGroup="xbrli:item" xbrli:periodType="instant"
          xbrli:balance="debit" nillable="true"/>
      <xs:element name="Heading" abstract="true" substitutionGroup="xbrli:item"
          type="xbrli:stringItemType" xbrli:periodType="duration"/>
      <xs:complexType name="PercentType">
        <xs:simpleContent>
          <xs:restriction base="xbrli:decimalItemType"/>
        </xs:simpleContent>
      </xs:complexType>
      <xs:simpleType name="CodeType">
        <xs:restriction base="xs:token"/>
      </xs:simpleType>
      <xs:attribute name="scale" type="xs:int" default="0" use="required"/>
      <xs:element type="xs:string"/>
    </xs:schema>"#;

    fn declarations() -> SchemaDeclarations {
        let uri = Url::parse("http://example.com/ex.xsd").unwrap();
        let doc = QuickXmlEngine.parse(SCHEMA.as_bytes(), &uri).unwrap();
        XsdDeclarationReader.read(doc.root().unwrap().as_ref())
    }

    #[test]
    fn test_reads_global_elements() {
        let decls = declarations();
        assert_eq!(decls.elements.len(), 2);

        let assets = &decls.elements[0];
        assert_eq!(assets.id.as_deref(), Some("ex_Assets"));
        assert_eq!(
            assets.qualified_name(),
            QualifiedName::new("http://example.com/ex", "Assets")
        );
        assert_eq!(
            assets.substitution_group,
            Some(QualifiedName::new(XBRLI, "item"))
        );
        assert_eq!(assets.period_type.as_deref(), Some("instant"));
        assert_eq!(assets.balance.as_deref(), Some("debit"));
        assert!(assets.nillable);
        assert!(!assets.is_abstract);
        assert!(decls.elements[1].is_abstract);
    }

    #[test]
    fn test_reads_type_derivation_bases() {
        let decls = declarations();
        let bases: Vec<_> = decls
            .types
            .iter()
            .map(|t| (t.name.as_str(), t.is_complex, t.base_type.clone()))
            .collect();
        assert_eq!(
            bases,
            vec![
                ("PercentType", true, Some(QualifiedName::new(XBRLI, "decimalItemType"))),
                ("CodeType", false, Some(QualifiedName::new(XSD, "token"))),
            ]
        );
    }

    #[test]
    fn test_reads_attribute_use_and_default() {
        let decls = declarations();
        let scale = &decls.attributes[0];
        assert_eq!(scale.use_, AttributeUse::Required);
        assert_eq!(scale.default_value.as_deref(), Some("0"));
        assert_eq!(scale.type_name, Some(QualifiedName::new(XSD, "int")));
    }
}
