// Linkbase processing: extended links into relationship networks
use crate::fragment::LoadWarning;
use crate::xlink::{classify, Href, XlinkNode, XlinkType};
use crate::xml::names::{LINK, XML};
use crate::xml::{DocumentRef, NodeRef, QualifiedName, XmlNode};
use crate::{Error, Result};
use ahash::AHashMap;
use compact_str::CompactString;
use serde::Serialize;
use std::fmt;
use url::Url;

pub const DEFAULT_LINK_ROLE: &str = "http://www.xbrl.org/2003/role/link";
pub const LABEL_ROLE: &str = "http://www.xbrl.org/2003/role/label";
pub const REFERENCE_ROLE: &str = "http://www.xbrl.org/2003/role/reference";
pub const PARENT_CHILD: &str = "http://www.xbrl.org/2003/arcrole/parent-child";
pub const SUMMATION_ITEM: &str = "http://www.xbrl.org/2003/arcrole/summation-item";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Presentation,
    Calculation,
    Definition,
    Label,
    Reference,
    Footnote,
    /// Any extended link outside the XBRL 2.1 standard set.
    Generic,
}

impl LinkKind {
    pub fn of(link: &dyn XmlNode) -> Self {
        if link.namespace_uri() != LINK {
            return LinkKind::Generic;
        }
        match link.local_name() {
            "presentationLink" => LinkKind::Presentation,
            "calculationLink" => LinkKind::Calculation,
            "definitionLink" => LinkKind::Definition,
            "labelLink" => LinkKind::Label,
            "referenceLink" => LinkKind::Reference,
            "footnoteLink" => LinkKind::Footnote,
            _ => LinkKind::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Presentation => "presentation",
            LinkKind::Calculation => "calculation",
            LinkKind::Definition => "definition",
            LinkKind::Label => "label",
            LinkKind::Reference => "reference",
            LinkKind::Footnote => "footnote",
            LinkKind::Generic => "generic",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end of a relationship: a concept addressed by a locator, or a
/// resource local to the network (index into [`Network::resources`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Concept(Href),
    Resource(usize),
}

impl Endpoint {
    pub fn concept(&self) -> Option<&Href> {
        match self {
            Endpoint::Concept(href) => Some(href),
            Endpoint::Resource(_) => None,
        }
    }
}

/// A `link:label`, `link:reference` or other XLink resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkResource {
    pub element: QualifiedName,
    pub label: CompactString,
    pub role: CompactString,
    pub lang: Option<CompactString>,
    pub id: Option<CompactString>,
    pub text: String,
    /// Child elements of reference resources, e.g. `("Section", "7")`.
    pub parts: Vec<(CompactString, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcUse {
    #[default]
    Optional,
    Prohibited,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub from: Endpoint,
    pub to: Endpoint,
    pub arcrole: CompactString,
    pub order: f64,
    /// Calculation arcs only
    pub weight: Option<f64>,
    pub priority: i32,
    pub use_: ArcUse,
    pub preferred_label: Option<CompactString>,
}

impl Relationship {
    fn equivalence_key(&self) -> (&Endpoint, &Endpoint, &str) {
        (&self.from, &self.to, self.arcrole.as_str())
    }
}

/// All relationships of one link kind and role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Network {
    pub kind: LinkKind,
    pub role: CompactString,
    pub relationships: Vec<Relationship>,
    pub resources: Vec<LinkResource>,
}

impl Network {
    pub fn new(kind: LinkKind, role: impl Into<CompactString>) -> Self {
        Self {
            kind,
            role: role.into(),
            relationships: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub fn resource(&self, index: usize) -> Option<&LinkResource> {
        self.resources.get(index)
    }

    /// Appends `other`'s content, re-indexing its resources.
    pub fn merge(&mut self, other: Network) {
        let offset = self.resources.len();
        let shift = |endpoint: Endpoint| match endpoint {
            Endpoint::Resource(i) => Endpoint::Resource(i + offset),
            concept => concept,
        };
        self.resources.extend(other.resources);
        self.relationships
            .extend(other.relationships.into_iter().map(|mut rel| {
                rel.from = shift(rel.from);
                rel.to = shift(rel.to);
                rel
            }));
    }

    /// Relationships left after prohibition and priority overriding: of
    /// equivalent relationships (same endpoints and arcrole) the highest
    /// priority wins, a prohibiting arc wins ties, and prohibited winners are
    /// dropped. Document order is preserved.
    pub fn effective_relationships(&self) -> Vec<&Relationship> {
        let mut winners: AHashMap<(&Endpoint, &Endpoint, &str), usize> = AHashMap::new();
        for (index, rel) in self.relationships.iter().enumerate() {
            winners
                .entry(rel.equivalence_key())
                .and_modify(|current| {
                    let held = &self.relationships[*current];
                    if rel.priority > held.priority
                        || (rel.priority == held.priority && rel.use_ == ArcUse::Prohibited)
                    {
                        *current = index;
                    }
                })
                .or_insert(index);
        }

        let mut kept: Vec<usize> = winners
            .into_values()
            .filter(|&i| self.relationships[i].use_ != ArcUse::Prohibited)
            .collect();
        kept.sort_unstable();
        kept.into_iter().map(|i| &self.relationships[i]).collect()
    }

    /// Effective outgoing relationships of `from`, sorted by `order`.
    pub fn children(&self, from: &Href) -> Vec<&Relationship> {
        let mut children: Vec<_> = self
            .effective_relationships()
            .into_iter()
            .filter(|rel| rel.from.concept() == Some(from))
            .collect();
        children.sort_by(|a, b| a.order.total_cmp(&b.order));
        children
    }

    /// Concepts with outgoing but no incoming relationships, in first-seen order.
    pub fn roots(&self) -> Vec<&Href> {
        let effective = self.effective_relationships();
        let targets: Vec<&Href> = effective.iter().filter_map(|r| r.to.concept()).collect();
        let mut roots: Vec<&Href> = Vec::new();
        for source in effective.iter().filter_map(|r| r.from.concept()) {
            if !targets.contains(&source) && !roots.contains(&source) {
                roots.push(source);
            }
        }
        roots
    }

    /// Resources attached to `concept` through effective (not prohibited) arcs.
    pub fn resources_of(&self, concept: &Href) -> Vec<&LinkResource> {
        self.effective_relationships()
            .into_iter()
            .filter(|rel| rel.from.concept() == Some(concept))
            .filter_map(|rel| match rel.to {
                Endpoint::Resource(i) => self.resources.get(i),
                Endpoint::Concept(_) => None,
            })
            .collect()
    }
}

/// Parses a decimal attribute value independently of any locale.
///
/// A single comma is read as the decimal separator when there is no period
/// and it is not followed by exactly three digits; `1,000` looks like digit
/// grouping and is rejected rather than guessed at.
pub fn parse_invariant_decimal(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let parsed = match value.split_once(',') {
        None => value.parse::<f64>().ok(),
        Some((whole, fraction)) => {
            let fraction_digits = !fraction.is_empty() && fraction.bytes().all(|b| b.is_ascii_digit());
            if value.contains('.') || !fraction_digits || fraction.len() == 3 {
                return None;
            }
            format!("{}.{}", whole, fraction).parse::<f64>().ok()
        }
    };
    parsed.filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Scanning,
    Resolving,
    Complete,
}

struct PendingArc {
    xlink: XlinkNode,
    order: Option<CompactString>,
    weight: Option<CompactString>,
    priority: Option<CompactString>,
    use_: Option<CompactString>,
    preferred_label: Option<CompactString>,
}

/// Builds the network of one extended link.
///
/// Children are fed through [`scan`](Self::scan): locators and resources go
/// into the label table immediately, arcs are deferred because they may
/// precede the labels they reference. [`resolve`](Self::resolve) then
/// connects every deferred arc.
pub struct NetworkBuilder {
    kind: LinkKind,
    role: CompactString,
    document: Url,
    state: BuildState,
    labels: AHashMap<CompactString, Vec<Endpoint>>,
    resources: Vec<LinkResource>,
    deferred: Vec<PendingArc>,
    relationships: Vec<Relationship>,
    locator_documents: Vec<Url>,
    warnings: Vec<LoadWarning>,
}

impl NetworkBuilder {
    pub fn new(kind: LinkKind, role: impl Into<CompactString>, document: Url) -> Self {
        Self {
            kind,
            role: role.into(),
            document,
            state: BuildState::Scanning,
            labels: AHashMap::new(),
            resources: Vec::new(),
            deferred: Vec::new(),
            relationships: Vec::new(),
            locator_documents: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Runs the whole build over an extended link element.
    pub fn build(link: &NodeRef, document: &Url) -> (Network, Vec<LoadWarning>) {
        Self::scanned(link, document).finish()
    }

    /// A builder that has scanned every child of `link`.
    pub fn scanned(link: &NodeRef, document: &Url) -> Self {
        let xlink = XlinkNode::from_node(link);
        let role = if xlink.role().is_empty() {
            DEFAULT_LINK_ROLE
        } else {
            xlink.role()
        };
        let mut builder = Self::new(LinkKind::of(link.as_ref()), role, document.clone());
        for child in link.children() {
            builder.scan(child);
        }
        builder
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Documents named by the locators scanned so far, whether or not an
    /// arc uses them.
    pub fn locator_documents(&self) -> &[Url] {
        &self.locator_documents
    }

    pub fn scan(&mut self, child: &NodeRef) {
        if self.state != BuildState::Scanning {
            tracing::debug!("ignoring {} scanned after resolution", child.name());
            return;
        }
        match classify(child.as_ref()) {
            Some(XlinkType::Locator) => self.record_locator(child),
            Some(XlinkType::Resource) => self.record_resource(child),
            Some(XlinkType::Arc) => self.deferred.push(PendingArc {
                xlink: XlinkNode::from_node(child),
                order: attribute(child, "order"),
                weight: attribute(child, "weight"),
                priority: attribute(child, "priority"),
                use_: attribute(child, "use"),
                preferred_label: attribute(child, "preferredLabel"),
            }),
            _ => {}
        }
    }

    fn record_locator(&mut self, node: &NodeRef) {
        let xlink = XlinkNode::from_node(node);
        if xlink.label().is_empty() {
            return;
        }
        match Href::parse(xlink.href(), node.base_uri()) {
            Ok(href) => {
                if !self.locator_documents.contains(&href.document) {
                    self.locator_documents.push(href.document.clone());
                }
                self.labels
                    .entry(xlink.label().into())
                    .or_default()
                    .push(Endpoint::Concept(href));
            }
            Err(e) => self.warnings.push(LoadWarning::MalformedHref {
                linkbase: self.document.to_string(),
                href: xlink.href().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn record_resource(&mut self, node: &NodeRef) {
        let xlink = XlinkNode::from_node(node);
        let index = self.resources.len();
        self.resources.push(LinkResource {
            element: node.name().clone(),
            label: xlink.label().into(),
            role: match (xlink.role(), node.local_name()) {
                ("", "label") => LABEL_ROLE.into(),
                ("", "reference") => REFERENCE_ROLE.into(),
                (role, _) => role.into(),
            },
            lang: node.attribute(XML, "lang").map(CompactString::from),
            id: attribute(node, "id"),
            text: node.text().to_string(),
            parts: node
                .children()
                .iter()
                .map(|part| (CompactString::from(part.local_name()), part.text().to_string()))
                .collect(),
        });
        if !xlink.label().is_empty() {
            self.labels
                .entry(xlink.label().into())
                .or_default()
                .push(Endpoint::Resource(index));
        }
    }

    /// Connects every deferred arc through the label table.
    pub fn resolve(&mut self) {
        if self.state != BuildState::Scanning {
            return;
        }
        self.state = BuildState::Resolving;
        for arc in std::mem::take(&mut self.deferred) {
            self.connect(arc);
        }
        self.state = BuildState::Complete;
    }

    fn connect(&mut self, arc: PendingArc) {
        let from = arc.xlink.from();
        let to = arc.xlink.to();
        let malformed = |reason: String| LoadWarning::MalformedArc {
            linkbase: self.document.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            reason,
        };

        let order = match arc.order.as_deref() {
            None => 1.0,
            Some(raw) => match parse_invariant_decimal(raw) {
                Some(order) => order,
                None => {
                    let warning = malformed(format!("unparseable order '{}'", raw));
                    self.warnings.push(warning);
                    return;
                }
            },
        };
        let weight = match arc.weight.as_deref().map(|raw| (raw, parse_invariant_decimal(raw))) {
            Some((_, Some(weight))) => Some(weight),
            Some((raw, None)) => {
                let warning = malformed(format!("unparseable weight '{}'", raw));
                self.warnings.push(warning);
                return;
            }
            None if self.kind == LinkKind::Calculation => {
                let warning = malformed("calculation arc without weight".to_string());
                self.warnings.push(warning);
                return;
            }
            None => None,
        };
        let priority = match arc.priority.as_deref().map(|p| p.trim().parse::<i32>()) {
            Some(Ok(priority)) => priority,
            Some(Err(_)) => {
                let warning = malformed("unparseable priority".to_string());
                self.warnings.push(warning);
                return;
            }
            None => 0,
        };
        let use_ = match arc.use_.as_deref() {
            Some("prohibited") => ArcUse::Prohibited,
            _ => ArcUse::Optional,
        };

        let (Some(sources), Some(targets)) = (self.labels.get(from), self.labels.get(to)) else {
            let label = if self.labels.contains_key(from) { to } else { from };
            tracing::debug!("dangling arc {} -> {} in {}", from, to, self.document);
            self.warnings.push(LoadWarning::DanglingArc {
                linkbase: self.document.to_string(),
                role: self.role.to_string(),
                label: label.to_string(),
            });
            return;
        };

        for source in sources {
            for target in targets {
                self.relationships.push(Relationship {
                    from: source.clone(),
                    to: target.clone(),
                    arcrole: arc.xlink.arcrole().into(),
                    order,
                    weight,
                    priority,
                    use_,
                    preferred_label: arc.preferred_label.clone(),
                });
            }
        }
    }

    pub fn finish(mut self) -> (Network, Vec<LoadWarning>) {
        self.resolve();
        let network = Network {
            kind: self.kind,
            role: self.role,
            relationships: self.relationships,
            resources: self.resources,
        };
        (network, self.warnings)
    }
}

fn attribute(node: &NodeRef, local_name: &str) -> Option<CompactString> {
    node.attribute("", local_name).map(CompactString::from)
}

/// A `link:roleRef` or `link:arcroleRef`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleRef {
    pub uri: CompactString,
    pub href: Option<Href>,
}

/// One linkbase document and the networks it declares, one per
/// (kind, role) pair.
#[derive(Debug, Clone)]
pub struct Linkbase {
    source_uri: Url,
    networks: Vec<Network>,
    role_refs: Vec<RoleRef>,
    arcrole_refs: Vec<RoleRef>,
    locator_documents: Vec<Url>,
    warnings: Vec<LoadWarning>,
}

impl Linkbase {
    pub fn from_document(doc: &DocumentRef) -> Result<Self> {
        let root = doc.root().ok_or_else(|| Error::Xml {
            uri: doc.uri().to_string(),
            message: "document has no root element".to_string(),
        })?;
        Self::from_node(&root, doc.uri())
    }

    /// Reads a `link:linkbase` element, standalone or embedded in a schema's
    /// appinfo.
    pub fn from_node(root: &NodeRef, source_uri: &Url) -> Result<Self> {
        if !root.is(LINK, "linkbase") {
            return Err(Error::Xml {
                uri: source_uri.to_string(),
                message: format!("root element {} is not link:linkbase", root.name()),
            });
        }

        let mut linkbase = Self {
            source_uri: source_uri.clone(),
            networks: Vec::new(),
            role_refs: Vec::new(),
            arcrole_refs: Vec::new(),
            locator_documents: Vec::new(),
            warnings: Vec::new(),
        };
        for child in root.children() {
            if child.is(LINK, "roleRef") || child.is(LINK, "arcroleRef") {
                linkbase.record_role_ref(child);
                continue;
            }
            if classify(child.as_ref()) != Some(XlinkType::Extended) {
                continue;
            }
            let builder = NetworkBuilder::scanned(child, source_uri);
            for document in builder.locator_documents() {
                if !linkbase.locator_documents.contains(document) {
                    linkbase.locator_documents.push(document.clone());
                }
            }
            let (network, warnings) = builder.finish();
            linkbase.warnings.extend(warnings);
            linkbase.add_network(network);
        }

        tracing::debug!(
            "linkbase {}: {} networks, {} warnings",
            source_uri,
            linkbase.networks.len(),
            linkbase.warnings.len()
        );
        Ok(linkbase)
    }

    fn record_role_ref(&mut self, node: &NodeRef) {
        let arcrole = node.local_name() == "arcroleRef";
        let uri_attribute = if arcrole { "arcroleURI" } else { "roleURI" };
        let Some(uri) = node.attribute("", uri_attribute) else {
            return;
        };
        let xlink = XlinkNode::from_node(node);
        let role_ref = RoleRef {
            uri: uri.into(),
            href: Href::parse(xlink.href(), node.base_uri()).ok(),
        };
        if arcrole {
            self.arcrole_refs.push(role_ref);
        } else {
            self.role_refs.push(role_ref);
        }
    }

    fn add_network(&mut self, network: Network) {
        match self
            .networks
            .iter_mut()
            .find(|n| n.kind == network.kind && n.role == network.role)
        {
            Some(existing) => existing.merge(network),
            None => self.networks.push(network),
        }
    }

    pub fn source_uri(&self) -> &Url {
        &self.source_uri
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn network(&self, kind: LinkKind, role: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.kind == kind && n.role == role)
    }

    pub fn role_refs(&self) -> &[RoleRef] {
        &self.role_refs
    }

    pub fn arcrole_refs(&self) -> &[RoleRef] {
        &self.arcrole_refs
    }

    /// Distinct documents addressed by any locator, in document order.
    pub fn locator_documents(&self) -> &[Url] {
        &self.locator_documents
    }

    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    pub fn relationship_count(&self) -> usize {
        self.networks.iter().map(|n| n.relationships.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{QuickXmlEngine, XmlEngine};
    use pretty_assertions::assert_eq;

    const BASE: &str = "http://example.com/taxonomy/ex-cal.xml";

    fn linkbase(body: &str) -> Linkbase {
        let xml = format!(
            r#"<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"
                xmlns:xlink="http://www.w3.org/1999/xlink"
                xmlns:xml="http://www.w3.org/XML/1998/namespace">{}</link:linkbase>"#,
            body
        );
        let uri = Url::parse(BASE).unwrap();
        let doc = QuickXmlEngine.parse(xml.as_bytes(), &uri).unwrap();
        Linkbase::from_document(&doc).unwrap()
    }

    fn href(fragment: &str) -> Href {
        Href::parse(&format!("ex.xsd#{}", fragment), &Url::parse(BASE).unwrap()).unwrap()
    }

    #[test]
    fn test_calculation_edge_and_dangling_arc() {
        let lb = linkbase(
            r#"<link:calculationLink xlink:type="extended" xlink:role="http://www.xbrl.org/2003/role/link">
                 <link:calculationArc xlink:type="arc" xlink:from="a" xlink:to="b"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/summation-item" weight="-1.0"/>
                 <link:calculationArc xlink:type="arc" xlink:from="a" xlink:to="c"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/summation-item" weight="1"/>
                 <link:loc xlink:type="locator" xlink:label="a" xlink:href="ex.xsd#x"/>
                 <link:loc xlink:type="locator" xlink:label="b" xlink:href="ex.xsd#y"/>
               </link:calculationLink>"#,
        );

        let network = lb.network(LinkKind::Calculation, DEFAULT_LINK_ROLE).unwrap();
        assert_eq!(network.relationships.len(), 1);
        let edge = &network.relationships[0];
        assert_eq!(edge.from, Endpoint::Concept(href("x")));
        assert_eq!(edge.to, Endpoint::Concept(href("y")));
        assert_eq!(edge.weight, Some(-1.0));
        assert_eq!(edge.arcrole, SUMMATION_ITEM);

        assert_eq!(
            lb.warnings(),
            &[LoadWarning::DanglingArc {
                linkbase: BASE.to_string(),
                role: DEFAULT_LINK_ROLE.to_string(),
                label: "c".to_string(),
            }]
        );
    }

    #[test]
    fn test_invariant_decimal_parsing() {
        assert_eq!(parse_invariant_decimal("1.5"), Some(1.5));
        assert_eq!(parse_invariant_decimal("1,5"), Some(1.5));
        assert_eq!(parse_invariant_decimal(" -1.0 "), Some(-1.0));
        assert_eq!(parse_invariant_decimal("1,000.5"), None);
        assert_eq!(parse_invariant_decimal("1,000"), None);
        assert_eq!(parse_invariant_decimal("1,2,3"), None);
        assert_eq!(parse_invariant_decimal("-0,25"), Some(-0.25));
        assert_eq!(parse_invariant_decimal("abc"), None);
        assert_eq!(parse_invariant_decimal("NaN"), None);
        assert_eq!(parse_invariant_decimal(""), None);
    }

    #[test]
    fn test_presentation_children_sorted_by_order() {
        let lb = linkbase(
            r#"<link:presentationLink xlink:type="extended" xlink:role="http://example.com/role/BS">
                 <link:loc xlink:type="locator" xlink:label="root" xlink:href="ex.xsd#Assets"/>
                 <link:loc xlink:type="locator" xlink:label="cash" xlink:href="ex.xsd#Cash"/>
                 <link:loc xlink:type="locator" xlink:label="debt" xlink:href="ex.xsd#Debt"/>
                 <link:loc xlink:type="locator" xlink:label="land" xlink:href="ex.xsd#Land"/>
                 <link:presentationArc xlink:type="arc" xlink:from="root" xlink:to="cash" order="2"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/parent-child"/>
                 <link:presentationArc xlink:type="arc" xlink:from="root" xlink:to="debt" order="1,5"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/parent-child"/>
                 <link:presentationArc xlink:type="arc" xlink:from="root" xlink:to="land" order="1.25"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/parent-child"
                     preferredLabel="http://www.xbrl.org/2003/role/terseLabel"/>
               </link:presentationLink>"#,
        );
        let network = lb
            .network(LinkKind::Presentation, "http://example.com/role/BS")
            .unwrap();

        let children: Vec<_> = network
            .children(&href("Assets"))
            .iter()
            .map(|r| (r.to.concept().unwrap().fragment.to_string(), r.order))
            .collect();
        assert_eq!(
            children,
            vec![
                ("Land".to_string(), 1.25),
                ("Debt".to_string(), 1.5),
                ("Cash".to_string(), 2.0)
            ]
        );
        assert_eq!(network.roots(), vec![&href("Assets")]);
        assert_eq!(
            network.children(&href("Assets"))[0].preferred_label.as_deref(),
            Some("http://www.xbrl.org/2003/role/terseLabel")
        );
    }

    #[test]
    fn test_links_grouped_by_role() {
        let lb = linkbase(
            r#"<link:presentationLink xlink:type="extended" xlink:role="http://example.com/role/A">
                 <link:loc xlink:type="locator" xlink:label="p" xlink:href="ex.xsd#P"/>
                 <link:loc xlink:type="locator" xlink:label="c" xlink:href="ex.xsd#C1"/>
                 <link:presentationArc xlink:type="arc" xlink:from="p" xlink:to="c"/>
               </link:presentationLink>
               <link:presentationLink xlink:type="extended" xlink:role="http://example.com/role/B">
                 <link:loc xlink:type="locator" xlink:label="p" xlink:href="ex.xsd#P"/>
                 <link:loc xlink:type="locator" xlink:label="c" xlink:href="ex.xsd#C2"/>
                 <link:presentationArc xlink:type="arc" xlink:from="p" xlink:to="c"/>
               </link:presentationLink>
               <link:presentationLink xlink:type="extended" xlink:role="http://example.com/role/A">
                 <link:loc xlink:type="locator" xlink:label="p" xlink:href="ex.xsd#P"/>
                 <link:loc xlink:type="locator" xlink:label="c" xlink:href="ex.xsd#C3"/>
                 <link:presentationArc xlink:type="arc" xlink:from="p" xlink:to="c" order="0"/>
               </link:presentationLink>"#,
        );
        assert_eq!(lb.networks().len(), 2);

        let targets = |role: &str| -> Vec<String> {
            lb.network(LinkKind::Presentation, role)
                .unwrap()
                .children(&href("P"))
                .iter()
                .map(|r| r.to.concept().unwrap().fragment.to_string())
                .collect()
        };
        assert_eq!(targets("http://example.com/role/A"), vec!["C3", "C1"]);
        assert_eq!(targets("http://example.com/role/B"), vec!["C2"]);
    }

    #[test]
    fn test_label_resources_and_fan_out() {
        let lb = linkbase(
            r#"<link:labelLink xlink:type="extended" xlink:role="http://www.xbrl.org/2003/role/link">
                 <link:loc xlink:type="locator" xlink:label="cash" xlink:href="ex.xsd#Cash"/>
                 <link:label xlink:type="resource" xlink:label="cash_lbl" xml:lang="en"
                     xlink:role="http://www.xbrl.org/2003/role/label">Cash</link:label>
                 <link:label xlink:type="resource" xlink:label="cash_lbl" xml:lang="nl"
                     xlink:role="http://www.xbrl.org/2003/role/label">Kas</link:label>
                 <link:labelArc xlink:type="arc" xlink:from="cash" xlink:to="cash_lbl"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/concept-label"/>
               </link:labelLink>"#,
        );
        let network = lb.network(LinkKind::Label, DEFAULT_LINK_ROLE).unwrap();
        assert_eq!(network.relationships.len(), 2);

        let cash = href("Cash");
        let labels: Vec<_> = network
            .resources_of(&cash)
            .iter()
            .map(|r| (r.lang.as_deref(), r.text.as_str()))
            .collect();
        assert_eq!(labels, vec![(Some("en"), "Cash"), (Some("nl"), "Kas")]);
        assert!(lb.warnings().is_empty());
    }

    #[test]
    fn test_prohibited_label_arc_hides_resource() {
        let lb = linkbase(
            r#"<link:labelLink xlink:type="extended" xlink:role="http://www.xbrl.org/2003/role/link">
                 <link:loc xlink:type="locator" xlink:label="cash" xlink:href="ex.xsd#Cash"/>
                 <link:label xlink:type="resource" xlink:label="cash_lbl" xml:lang="en">Cash</link:label>
                 <link:labelArc xlink:type="arc" xlink:from="cash" xlink:to="cash_lbl"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/concept-label"/>
                 <link:labelArc xlink:type="arc" xlink:from="cash" xlink:to="cash_lbl" use="prohibited"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/concept-label"/>
               </link:labelLink>"#,
        );
        let network = lb.network(LinkKind::Label, DEFAULT_LINK_ROLE).unwrap();
        assert_eq!(network.relationships.len(), 2);
        assert!(network.resources_of(&href("Cash")).is_empty());
    }

    #[test]
    fn test_locator_documents_include_unused_locators() {
        let lb = linkbase(
            r#"<link:presentationLink xlink:type="extended" xlink:role="http://www.xbrl.org/2003/role/link">
                 <link:loc xlink:type="locator" xlink:label="a" xlink:href="ex.xsd#A"/>
                 <link:loc xlink:type="locator" xlink:label="b" xlink:href="ex.xsd#B"/>
                 <link:loc xlink:type="locator" xlink:label="t" xlink:href="other/t.xsd#T"/>
                 <link:presentationArc xlink:type="arc" xlink:from="a" xlink:to="b"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/parent-child"/>
                 <link:presentationArc xlink:type="arc" xlink:from="a" xlink:to="missing"
                     xlink:arcrole="http://www.xbrl.org/2003/arcrole/parent-child"/>
               </link:presentationLink>"#,
        );
        let documents: Vec<_> = lb.locator_documents().iter().map(|u| u.as_str()).collect();
        assert_eq!(
            documents,
            vec![
                "http://example.com/taxonomy/ex.xsd",
                "http://example.com/taxonomy/other/t.xsd"
            ]
        );
        assert_eq!(lb.relationship_count(), 1);
    }

    #[test]
    fn test_prohibition_and_priority() {
        let lb = linkbase(
            r#"<link:definitionLink xlink:type="extended" xlink:role="http://www.xbrl.org/2003/role/link">
                 <link:loc xlink:type="locator" xlink:label="a" xlink:href="ex.xsd#A"/>
                 <link:loc xlink:type="locator" xlink:label="b" xlink:href="ex.xsd#B"/>
                 <link:loc xlink:type="locator" xlink:label="c" xlink:href="ex.xsd#C"/>
                 <link:definitionArc xlink:type="arc" xlink:from="a" xlink:to="b"
                     xlink:arcrole="http://xbrl.org/int/dim/arcrole/domain-member"/>
                 <link:definitionArc xlink:type="arc" xlink:from="a" xlink:to="b" use="prohibited"
                     xlink:arcrole="http://xbrl.org/int/dim/arcrole/domain-member"/>
                 <link:definitionArc xlink:type="arc" xlink:from="a" xlink:to="c" use="prohibited"
                     xlink:arcrole="http://xbrl.org/int/dim/arcrole/domain-member"/>
                 <link:definitionArc xlink:type="arc" xlink:from="a" xlink:to="c" priority="2"
                     xlink:arcrole="http://xbrl.org/int/dim/arcrole/domain-member"/>
               </link:definitionLink>"#,
        );
        let network = lb.network(LinkKind::Definition, DEFAULT_LINK_ROLE).unwrap();
        assert_eq!(network.relationships.len(), 4);

        let effective = network.effective_relationships();
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].to, Endpoint::Concept(href("C")));
        assert_eq!(effective[0].priority, 2);
    }

    #[test]
    fn test_malformed_arcs_are_skipped_individually() {
        let lb = linkbase(
            r#"<link:calculationLink xlink:type="extended" xlink:role="http://www.xbrl.org/2003/role/link">
                 <link:loc xlink:type="locator" xlink:label="a" xlink:href="ex.xsd#A"/>
                 <link:loc xlink:type="locator" xlink:label="b" xlink:href="ex.xsd#B"/>
                 <link:loc xlink:type="locator" xlink:label="bad" xlink:href="ex.xsd"/>
                 <link:calculationArc xlink:type="arc" xlink:from="a" xlink:to="b"/>
                 <link:calculationArc xlink:type="arc" xlink:from="a" xlink:to="b" weight="x"/>
                 <link:calculationArc xlink:type="arc" xlink:from="a" xlink:to="b" weight="1" order="?"/>
                 <link:calculationArc xlink:type="arc" xlink:from="a" xlink:to="b" weight="1"/>
               </link:calculationLink>"#,
        );
        let network = lb.network(LinkKind::Calculation, DEFAULT_LINK_ROLE).unwrap();
        assert_eq!(network.relationships.len(), 1);
        assert_eq!(network.relationships[0].weight, Some(1.0));

        let warnings = lb.warnings();
        assert_eq!(warnings.len(), 4);
        assert!(matches!(warnings[0], LoadWarning::MalformedHref { .. }));
        assert!(warnings[1..]
            .iter()
            .all(|w| matches!(w, LoadWarning::MalformedArc { .. })));
    }

    #[test]
    fn test_builder_state_machine() {
        let uri = Url::parse(BASE).unwrap();
        let doc = QuickXmlEngine
            .parse(
                br#"<l xmlns:xlink="http://www.w3.org/1999/xlink">
                      <arc xlink:type="arc" xlink:from="a" xlink:to="a"/>
                      <loc xlink:type="locator" xlink:label="a" xlink:href="ex.xsd#A"/>
                    </l>"#,
                &uri,
            )
            .unwrap();
        let root = doc.root().unwrap();

        let mut builder = NetworkBuilder::new(LinkKind::Generic, DEFAULT_LINK_ROLE, uri);
        assert_eq!(builder.state(), BuildState::Scanning);
        for child in root.children() {
            builder.scan(child);
        }
        builder.resolve();
        assert_eq!(builder.state(), BuildState::Complete);

        let (network, warnings) = builder.finish();
        assert!(warnings.is_empty());
        assert_eq!(network.relationships.len(), 1);
        assert_eq!(network.kind, LinkKind::Generic);
    }

    #[test]
    fn test_role_refs_and_wrong_root() {
        let lb = linkbase(
            r#"<link:roleRef roleURI="http://example.com/role/BS" xlink:type="simple"
                   xlink:href="ex.xsd#BalanceSheet"/>"#,
        );
        assert_eq!(lb.role_refs()[0].uri, "http://example.com/role/BS");
        assert_eq!(lb.role_refs()[0].href, Some(href("BalanceSheet")));
        assert!(lb.networks().is_empty());

        let uri = Url::parse(BASE).unwrap();
        let doc = QuickXmlEngine.parse(b"<schema/>", &uri).unwrap();
        assert!(matches!(Linkbase::from_document(&doc), Err(Error::Xml { .. })));
    }

    #[test]
    fn test_merge_reindexes_resources() {
        let mut a = Network::new(LinkKind::Label, DEFAULT_LINK_ROLE);
        let resource = |text: &str| LinkResource {
            element: QualifiedName::new(LINK, "label"),
            label: "l".into(),
            role: LABEL_ROLE.into(),
            lang: Some("en".into()),
            id: None,
            text: text.to_string(),
            parts: Vec::new(),
        };
        let edge = |to| Relationship {
            from: Endpoint::Concept(href("Cash")),
            to: Endpoint::Resource(to),
            arcrole: "concept-label".into(),
            order: 1.0,
            weight: None,
            priority: 0,
            use_: ArcUse::Optional,
            preferred_label: None,
        };
        a.resources.push(resource("first"));
        a.relationships.push(edge(0));
        let mut b = Network::new(LinkKind::Label, DEFAULT_LINK_ROLE);
        b.resources.push(resource("second"));
        b.relationships.push(edge(0));

        a.merge(b);
        let cash = href("Cash");
        let texts: Vec<_> = a.resources_of(&cash).iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
