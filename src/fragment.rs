// Document fragments: the unit of schema ownership and network resolution
use crate::linkbase::{LinkKind, Linkbase, Network};
use crate::schema::Schema;
use crate::xlink::Href;
use crate::xml::{NodeRef, SchemaElement};
use serde::Serialize;
use std::fmt;
use url::Url;

/// A recoverable problem met during a load. The load carries on without the
/// offending reference, pair or arc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LoadWarning {
    /// `xsi:schemaLocation` with an odd token count; the last token was ignored.
    OddSchemaLocation { document: String, dropped: String },
    SchemaUnavailable { location: String, reason: String },
    /// A referenced document parsed, but its root is not `xs:schema`.
    NotASchema { location: String, reason: String },
    LinkbaseUnavailable { location: String, reason: String },
    MalformedHref {
        linkbase: String,
        href: String,
        reason: String,
    },
    /// An arc naming a label no locator or resource in its link carries.
    DanglingArc {
        linkbase: String,
        role: String,
        label: String,
    },
    MalformedArc {
        linkbase: String,
        from: String,
        to: String,
        reason: String,
    },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::OddSchemaLocation { document, dropped } => write!(
                f,
                "odd schemaLocation token count in {}, ignored trailing '{}'",
                document, dropped
            ),
            LoadWarning::SchemaUnavailable { location, reason } => {
                write!(f, "schema {} unavailable: {}", location, reason)
            }
            LoadWarning::NotASchema { location, reason } => {
                write!(f, "{} is not a schema: {}", location, reason)
            }
            LoadWarning::LinkbaseUnavailable { location, reason } => {
                write!(f, "linkbase {} unavailable: {}", location, reason)
            }
            LoadWarning::MalformedHref {
                linkbase,
                href,
                reason,
            } => write!(f, "malformed href '{}' in {}: {}", href, linkbase, reason),
            LoadWarning::DanglingArc {
                linkbase,
                role,
                label,
            } => write!(
                f,
                "arc references unknown label '{}' in {} ({})",
                label, linkbase, role
            ),
            LoadWarning::MalformedArc {
                linkbase,
                from,
                to,
                reason,
            } => write!(f, "arc {} -> {} in {}: {}", from, to, linkbase, reason),
        }
    }
}

/// One root-level instance (or taxonomy entry point) together with every
/// schema and linkbase discovered from it.
#[derive(Debug, Clone)]
pub struct DocumentFragment {
    root: NodeRef,
    uri: Url,
    schemas: Vec<Schema>,
    linkbases: Vec<Linkbase>,
    warnings: Vec<LoadWarning>,
}

impl DocumentFragment {
    pub fn new(root: NodeRef, uri: Url) -> Self {
        Self {
            root,
            uri,
            schemas: Vec::new(),
            linkbases: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    pub fn linkbases(&self) -> &[Linkbase] {
        &self.linkbases
    }

    /// Warnings from discovery and from every attached linkbase.
    pub fn warnings(&self) -> impl Iterator<Item = &LoadWarning> {
        self.warnings
            .iter()
            .chain(self.linkbases.iter().flat_map(|lb| lb.warnings()))
    }

    /// True if a schema with this target namespace or alias is attached.
    pub fn has_schema(&self, namespace: &str) -> bool {
        self.schema(namespace).is_some()
    }

    pub fn schema(&self, namespace: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.matches_namespace(namespace))
    }

    /// The schema loaded from (or including) `uri`.
    pub fn schema_at(&self, uri: &Url) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.is_source(uri))
    }

    pub fn has_linkbase(&self, uri: &Url) -> bool {
        self.linkbases.iter().any(|lb| lb.source_uri() == uri)
    }

    /// Attaches `schema` unless its namespace or alias is already owned.
    /// Returns whether it was attached.
    pub(crate) fn add_schema(&mut self, schema: Schema) -> bool {
        let taken = self.has_schema(schema.target_namespace())
            || schema.alias().is_some_and(|alias| self.has_schema(alias));
        if taken {
            tracing::debug!(
                "namespace {} already owned, dropping {}",
                schema.target_namespace(),
                schema.source_uri()
            );
            return false;
        }
        tracing::debug!("attached schema {} ({})", schema.target_namespace(), schema.source_uri());
        self.schemas.push(schema);
        true
    }

    /// Folds an included document into the schema owning `namespace`.
    /// Returns the included schema back when there is no such owner.
    pub(crate) fn include_schema(&mut self, namespace: &str, included: Schema) -> Option<Schema> {
        match self.schemas.iter_mut().find(|s| s.matches_namespace(namespace)) {
            Some(owner) => {
                owner.merge_included(included);
                None
            }
            None => Some(included),
        }
    }

    pub(crate) fn add_linkbase(&mut self, linkbase: Linkbase) {
        for warning in linkbase.warnings() {
            tracing::warn!("{}", warning);
        }
        self.linkbases.push(linkbase);
    }

    pub(crate) fn warn(&mut self, warning: LoadWarning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Role URIs with at least one network of `kind`, in first-seen order.
    pub fn roles(&self, kind: LinkKind) -> Vec<&str> {
        let mut roles: Vec<&str> = Vec::new();
        for network in self.all_networks().filter(|n| n.kind == kind) {
            if !roles.contains(&network.role.as_str()) {
                roles.push(&network.role);
            }
        }
        roles
    }

    /// The network of `kind` and `role` merged across every linkbase, so that
    /// prohibitions in one document override arcs in another.
    pub fn network(&self, kind: LinkKind, role: &str) -> Option<Network> {
        let mut parts = self
            .all_networks()
            .filter(|n| n.kind == kind && n.role == role)
            .cloned();
        let mut merged = parts.next()?;
        for part in parts {
            merged.merge(part);
        }
        Some(merged)
    }

    /// One merged network per role.
    pub fn networks(&self, kind: LinkKind) -> Vec<Network> {
        self.roles(kind)
            .into_iter()
            .filter_map(|role| self.network(kind, role))
            .collect()
    }

    fn all_networks(&self) -> impl Iterator<Item = &Network> {
        self.linkbases.iter().flat_map(|lb| lb.networks())
    }

    /// Label text for a concept: exact role and language first, then any
    /// role in that language, then whatever label exists.
    pub fn label(&self, concept: &Href, role: &str, lang: &str) -> Option<&str> {
        let labels: Vec<_> = self
            .all_networks()
            .filter(|n| n.kind == LinkKind::Label)
            .flat_map(|n| n.resources_of(concept))
            .collect();
        labels
            .iter()
            .find(|l| l.role == role && l.lang.as_deref() == Some(lang))
            .or_else(|| labels.iter().find(|l| l.lang.as_deref() == Some(lang)))
            .or_else(|| labels.first())
            .copied()
            .map(|l| l.text.as_str())
    }

    /// The element declaration a locator points at.
    pub fn resolve_concept(&self, href: &Href) -> Option<(&Schema, &SchemaElement)> {
        let schema = self.schema_at(&href.document)?;
        schema
            .element_by_id(&href.fragment)
            .map(|element| (schema, element))
    }

    pub fn relationship_count(&self) -> usize {
        self.linkbases.iter().map(|lb| lb.relationship_count()).sum()
    }
}

/// Everything loaded from one entry point.
#[derive(Debug, Clone)]
pub struct FragmentSet {
    uri: Url,
    fragments: Vec<DocumentFragment>,
}

impl FragmentSet {
    pub fn new(uri: Url, fragments: Vec<DocumentFragment>) -> Self {
        Self { uri, fragments }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn fragments(&self) -> &[DocumentFragment] {
        &self.fragments
    }

    pub fn first(&self) -> Option<&DocumentFragment> {
        self.fragments.first()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DocumentFragment> {
        self.fragments.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LoadWarning> {
        self.fragments.iter().flat_map(|f| f.warnings())
    }
}

impl<'a> IntoIterator for &'a FragmentSet {
    type Item = &'a DocumentFragment;
    type IntoIter = std::slice::Iter<'a, DocumentFragment>;

    fn into_iter(self) -> Self::IntoIter {
        self.fragments.iter()
    }
}

impl IntoIterator for FragmentSet {
    type Item = DocumentFragment;
    type IntoIter = std::vec::IntoIter<DocumentFragment>;

    fn into_iter(self) -> Self::IntoIter {
        self.fragments.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{DocumentRef, QuickXmlEngine, XmlEngine, XsdDeclarationReader};
    use pretty_assertions::assert_eq;

    fn parse(xml: &str, uri: &str) -> DocumentRef {
        QuickXmlEngine
            .parse(xml.as_bytes(), &Url::parse(uri).unwrap())
            .unwrap()
    }

    fn schema(target: &str, prefix: &str, uri: &str) -> Schema {
        let xml = format!(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:{prefix}="{target}"
                 targetNamespace="{target}">
                 <xs:element id="{prefix}_Cash" name="Cash" type="xs:decimal"/>
               </xs:schema>"#
        );
        Schema::from_document(&parse(&xml, uri), &XsdDeclarationReader).unwrap()
    }

    fn fragment() -> DocumentFragment {
        let doc = parse("<xbrl/>", "http://example.com/instance.xml");
        DocumentFragment::new(doc.root().unwrap(), doc.uri().clone())
    }

    #[test]
    fn test_schema_uniqueness_by_namespace_and_alias() {
        let mut fragment = fragment();
        assert!(fragment.add_schema(schema("http://example.com/ex", "ex", "http://example.com/a.xsd")));
        // Same namespace from another location
        assert!(!fragment.add_schema(schema("http://example.com/ex", "ex", "http://example.com/b.xsd")));
        // Different namespace, alias already taken
        assert!(!fragment.add_schema(schema("http://example.com/other", "ex", "http://example.com/c.xsd")));
        assert!(fragment.add_schema(schema("http://example.com/dei", "dei", "http://example.com/d.xsd")));

        assert_eq!(fragment.schemas().len(), 2);
        assert_eq!(
            fragment.schema("ex").unwrap().source_uri().as_str(),
            "http://example.com/a.xsd"
        );
    }

    #[test]
    fn test_resolve_concept_and_label_fallback() {
        let mut fragment = fragment();
        fragment.add_schema(schema("http://example.com/ex", "ex", "http://example.com/ex.xsd"));
        let doc = parse(
            r#"<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"
                 xmlns:xlink="http://www.w3.org/1999/xlink">
               <link:labelLink xlink:type="extended" xlink:role="http://www.xbrl.org/2003/role/link">
                 <link:loc xlink:type="locator" xlink:label="c" xlink:href="ex.xsd#ex_Cash"/>
                 <link:label xlink:type="resource" xlink:label="l" xml:lang="en"
                     xlink:role="http://www.xbrl.org/2003/role/terseLabel">Cash</link:label>
                 <link:label xlink:type="resource" xlink:label="l" xml:lang="de">Kasse</link:label>
                 <link:labelArc xlink:type="arc" xlink:from="c" xlink:to="l"/>
               </link:labelLink>
               </link:linkbase>"#,
            "http://example.com/ex-lab.xml",
        );
        fragment.add_linkbase(Linkbase::from_document(&doc).unwrap());

        let href = Href::parse("ex.xsd#ex_Cash", &Url::parse("http://example.com/").unwrap()).unwrap();
        let (owner, element) = fragment.resolve_concept(&href).unwrap();
        assert_eq!(owner.target_namespace(), "http://example.com/ex");
        assert_eq!(element.name, "Cash");

        let terse = "http://www.xbrl.org/2003/role/terseLabel";
        assert_eq!(fragment.label(&href, terse, "en"), Some("Cash"));
        assert_eq!(fragment.label(&href, terse, "de"), Some("Kasse"));
        assert_eq!(fragment.label(&href, terse, "fr"), Some("Cash"));
        assert_eq!(fragment.roles(LinkKind::Label), vec!["http://www.xbrl.org/2003/role/link"]);
    }

    #[test]
    fn test_warning_display() {
        let warning = LoadWarning::OddSchemaLocation {
            document: "http://example.com/instance.xml".into(),
            dropped: "orphan".into(),
        };
        assert_eq!(
            warning.to_string(),
            "odd schemaLocation token count in http://example.com/instance.xml, ignored trailing 'orphan'"
        );

        let mut fragment = fragment();
        fragment.warn(warning.clone());
        assert_eq!(fragment.warnings().collect::<Vec<_>>(), vec![&warning]);
    }
}
