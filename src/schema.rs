// Schema documents discovered while resolving a taxonomy
use crate::resolver::resolve_reference;
use crate::xml::names::{LINK, XLINK, XSD};
use crate::xml::{
    DocumentRef, NodeRef, QualifiedName, SchemaAttribute, SchemaDeclarations, SchemaElement,
    SchemaReader, SchemaType, XmlNode,
};
use crate::{Error, Result};
use compact_str::CompactString;
use serde::Serialize;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaImport {
    pub namespace: Option<CompactString>,
    pub schema_location: Url,
    /// `xs:include` rather than `xs:import`
    pub include: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkbaseRef {
    pub href: Url,
    pub role: Option<CompactString>,
    pub arcrole: Option<CompactString>,
}

/// An import, include or linkbase reference whose location could not be
/// resolved against the schema's base URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedReference {
    pub location: String,
    pub reason: String,
    /// `link:linkbaseRef` rather than `xs:import`/`xs:include`
    pub linkbase: bool,
}

/// A `link:roleType` or `link:arcroleType` declared in appinfo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleType {
    pub uri: CompactString,
    pub id: Option<CompactString>,
    pub definition: Option<String>,
    pub used_on: Vec<QualifiedName>,
    /// Only set on arcrole types
    pub cycles_allowed: Option<CompactString>,
}

/// One schema document. Identity within a fragment is its target namespace
/// or its alias.
#[derive(Debug, Clone)]
pub struct Schema {
    target_namespace: CompactString,
    alias: Option<CompactString>,
    source_uri: Url,
    namespaces: Vec<QualifiedName>,
    app_info: Vec<NodeRef>,
    declarations: SchemaDeclarations,
    imports: Vec<SchemaImport>,
    linkbase_refs: Vec<LinkbaseRef>,
    role_types: Vec<RoleType>,
    arcrole_types: Vec<RoleType>,
    included: Vec<Url>,
    skipped: Vec<SkippedReference>,
    root: NodeRef,
}

impl Schema {
    /// Builds a schema from a parsed document whose root is `xs:schema`.
    pub fn from_document(doc: &DocumentRef, reader: &dyn SchemaReader) -> Result<Self> {
        let source_uri = doc.uri().clone();
        let root = doc.root().ok_or_else(|| Error::Xml {
            uri: source_uri.to_string(),
            message: "document has no root element".to_string(),
        })?;
        if !root.is(XSD, "schema") {
            return Err(Error::Xml {
                uri: source_uri.to_string(),
                message: format!("root element {} is not xs:schema", root.name()),
            });
        }

        let target_namespace = CompactString::from(root.attribute("", "targetNamespace").unwrap_or(""));
        let alias = root
            .namespaces()
            .lookup_prefix(&target_namespace)
            .filter(|p| !p.is_empty())
            .map(CompactString::from);

        let app_info: Vec<NodeRef> = root
            .children()
            .named(XSD, "annotation")
            .flat_map(|a| a.children().named(XSD, "appinfo").cloned().collect::<Vec<_>>())
            .collect();

        let mut skipped = Vec::new();
        let mut linkbase_refs = Vec::new();
        let mut role_types = Vec::new();
        let mut arcrole_types = Vec::new();
        for info in &app_info {
            for child in info.children() {
                if child.namespace_uri() != LINK {
                    continue;
                }
                match child.local_name() {
                    "linkbaseRef" => {
                        let Some(href) = child.attribute(XLINK, "href") else {
                            continue;
                        };
                        match resolve_reference(child.base_uri(), href) {
                            Ok(href) => linkbase_refs.push(LinkbaseRef {
                                href,
                                role: child.attribute(XLINK, "role").map(CompactString::from),
                                arcrole: child.attribute(XLINK, "arcrole").map(CompactString::from),
                            }),
                            Err(e) => {
                                tracing::debug!("skipping linkbaseRef in {}: {}", source_uri, e);
                                skipped.push(SkippedReference {
                                    location: href.to_string(),
                                    reason: e.to_string(),
                                    linkbase: true,
                                });
                            }
                        }
                    }
                    "roleType" => role_types.extend(read_role_type(child, "roleURI")),
                    "arcroleType" => arcrole_types.extend(read_role_type(child, "arcroleURI")),
                    _ => {}
                }
            }
        }

        let mut imports = Vec::new();
        for child in root.children() {
            let include = match (child.namespace_uri(), child.local_name()) {
                (XSD, "import") => false,
                (XSD, "include") => true,
                _ => continue,
            };
            let Some(location) = child.attribute("", "schemaLocation") else {
                continue;
            };
            match resolve_reference(child.base_uri(), location) {
                Ok(schema_location) => imports.push(SchemaImport {
                    namespace: if include {
                        Some(target_namespace.clone())
                    } else {
                        child.attribute("", "namespace").map(CompactString::from)
                    },
                    schema_location,
                    include,
                }),
                Err(e) => {
                    tracing::debug!("skipping import in {}: {}", source_uri, e);
                    skipped.push(SkippedReference {
                        location: location.to_string(),
                        reason: e.to_string(),
                        linkbase: false,
                    });
                }
            }
        }

        Ok(Self {
            alias,
            source_uri,
            namespaces: root.namespaces().declared(),
            app_info,
            declarations: reader.read(root.as_ref()),
            imports,
            linkbase_refs,
            role_types,
            arcrole_types,
            included: Vec::new(),
            skipped,
            root,
            target_namespace,
        })
    }

    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn source_uri(&self) -> &Url {
        &self.source_uri
    }

    pub fn namespaces(&self) -> &[QualifiedName] {
        &self.namespaces
    }

    pub fn app_info(&self) -> &[NodeRef] {
        &self.app_info
    }

    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    pub fn imports(&self) -> &[SchemaImport] {
        &self.imports
    }

    pub fn linkbase_refs(&self) -> &[LinkbaseRef] {
        &self.linkbase_refs
    }

    pub fn role_types(&self) -> &[RoleType] {
        &self.role_types
    }

    pub fn arcrole_types(&self) -> &[RoleType] {
        &self.arcrole_types
    }

    /// Documents merged into this schema through `xs:include`.
    pub fn included(&self) -> &[Url] {
        &self.included
    }

    /// References dropped because their location did not resolve.
    pub fn skipped_references(&self) -> &[SkippedReference] {
        &self.skipped
    }

    pub fn elements(&self) -> &[SchemaElement] {
        &self.declarations.elements
    }

    pub fn types(&self) -> &[SchemaType] {
        &self.declarations.types
    }

    pub fn attributes(&self) -> &[SchemaAttribute] {
        &self.declarations.attributes
    }

    pub fn matches_namespace(&self, namespace: &str) -> bool {
        self.target_namespace == namespace || self.alias.as_deref() == Some(namespace)
    }

    /// True if `uri` is this schema's document or one it included.
    pub fn is_source(&self, uri: &Url) -> bool {
        &self.source_uri == uri || self.included.contains(uri)
    }

    pub fn element(&self, name: &str) -> Option<&SchemaElement> {
        self.declarations.elements.iter().find(|e| e.name == name)
    }

    /// Locator fragments address concepts by their `id`.
    pub fn element_by_id(&self, id: &str) -> Option<&SchemaElement> {
        self.declarations
            .elements
            .iter()
            .find(|e| e.id.as_deref() == Some(id))
    }

    pub fn schema_type(&self, name: &str) -> Option<&SchemaType> {
        self.declarations.types.iter().find(|t| t.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&SchemaAttribute> {
        self.declarations.attributes.iter().find(|a| a.name == name)
    }

    /// Folds an `xs:include`d document (same target namespace) into this one.
    pub(crate) fn merge_included(&mut self, other: Schema) {
        self.included.push(other.source_uri);
        self.included.extend(other.included);
        self.declarations.extend(other.declarations);
        self.app_info.extend(other.app_info);
        self.linkbase_refs.extend(other.linkbase_refs);
        self.role_types.extend(other.role_types);
        self.arcrole_types.extend(other.arcrole_types);
        self.skipped.extend(other.skipped);
        for import in other.imports {
            if !self.imports.contains(&import) {
                self.imports.push(import);
            }
        }
    }
}

fn read_role_type(node: &NodeRef, uri_attribute: &str) -> Option<RoleType> {
    let uri = node.attribute("", uri_attribute)?;
    let definition = node
        .children()
        .named(LINK, "definition")
        .next()
        .map(|d| d.text().to_string());
    let used_on = node
        .children()
        .named(LINK, "usedOn")
        .filter_map(|u| u.namespaces().resolve(u.text()))
        .collect();
    Some(RoleType {
        uri: uri.into(),
        id: node.attribute("", "id").map(CompactString::from),
        definition,
        used_on,
        cycles_allowed: node.attribute("", "cyclesAllowed").map(CompactString::from),
    })
}
