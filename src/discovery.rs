// Schema and linkbase discovery over an explicit depth-first work stack
use crate::fragment::{DocumentFragment, LoadWarning};
use crate::resolver::resolve_reference;
use crate::schema::Schema;
use crate::xml::names::{LINK, XLINK, XSI};
use crate::xml::{descendants, NodeRef, XmlNode};
use crate::Error;
use compact_str::CompactString;
use std::collections::HashSet;
use url::Url;

/// How a schema reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// A pair from `xsi:schemaLocation`.
    SchemaLocation,
    /// `link:schemaRef` in an instance.
    SchemaRef,
    Import,
    /// `xs:include`; merged into the schema owning the namespace.
    Include,
    /// Document named by a linkbase locator but not referenced otherwise.
    Locator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReference {
    pub kind: ReferenceKind,
    /// Declared namespace, when the reference names one.
    pub namespace: Option<CompactString>,
    pub location: Url,
}

/// Splits an `xsi:schemaLocation` value into (namespace, location) pairs.
/// With an odd token count the trailing token is returned separately.
pub fn schema_location_pairs(value: &str) -> (Vec<(&str, &str)>, Option<&str>) {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let mut chunks = tokens.chunks_exact(2);
    let pairs = chunks.by_ref().map(|pair| (pair[0], pair[1])).collect();
    let dropped = chunks.remainder().first().copied();
    (pairs, dropped)
}

/// Discovery state for one fragment.
///
/// The loader pops references with [`next`](Self::next), fetches and parses
/// each one, and hands the outcome back through [`attach`](Self::attach) or
/// [`reject`](Self::reject). A schema only reaches the fragment once it is
/// fully parsed, so abandoning a load half-way leaves nothing half-attached.
#[derive(Debug, Default)]
pub struct Discovery {
    stack: Vec<SchemaReference>,
    visited_locations: HashSet<Url>,
    visited_namespaces: HashSet<CompactString>,
    linkbases: Vec<Url>,
    seen_linkbases: HashSet<Url>,
    embedded: Vec<(NodeRef, Url)>,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the references carried by an instance root: `xsi:schemaLocation`
    /// on it or any descendant, `link:schemaRef` and `link:linkbaseRef`.
    pub fn seed(&mut self, fragment: &mut DocumentFragment) {
        let root = fragment.root().clone();
        let mut found = Vec::new();
        let mut nodes = vec![root.clone()];
        nodes.extend(descendants(&root));

        for node in &nodes {
            if let Some(value) = node.attribute(XSI, "schemaLocation") {
                found.extend(self.schema_locations(fragment, node, value));
            }
        }
        for child in root.children() {
            let Some(href) = child.attribute(XLINK, "href") else {
                continue;
            };
            if child.is(LINK, "schemaRef") {
                match resolve_reference(child.base_uri(), href) {
                    Ok(location) => found.push(SchemaReference {
                        kind: ReferenceKind::SchemaRef,
                        namespace: None,
                        location,
                    }),
                    Err(e) => fragment.warn(LoadWarning::SchemaUnavailable {
                        location: href.to_string(),
                        reason: e.to_string(),
                    }),
                }
            } else if child.is(LINK, "linkbaseRef") {
                match resolve_reference(child.base_uri(), href) {
                    Ok(location) => self.queue_linkbase(location),
                    Err(e) => fragment.warn(LoadWarning::LinkbaseUnavailable {
                        location: href.to_string(),
                        reason: e.to_string(),
                    }),
                }
            }
        }
        self.push_all(found);
    }

    fn schema_locations(
        &mut self,
        fragment: &mut DocumentFragment,
        node: &NodeRef,
        value: &str,
    ) -> Vec<SchemaReference> {
        let (pairs, dropped) = schema_location_pairs(value);
        if let Some(dropped) = dropped {
            fragment.warn(LoadWarning::OddSchemaLocation {
                document: node.base_uri().to_string(),
                dropped: dropped.to_string(),
            });
        }
        let mut found = Vec::with_capacity(pairs.len());
        for (namespace, location) in pairs {
            match resolve_reference(node.base_uri(), location) {
                Ok(location) => found.push(SchemaReference {
                    kind: ReferenceKind::SchemaLocation,
                    namespace: Some(namespace.into()),
                    location,
                }),
                Err(e) => fragment.warn(LoadWarning::SchemaUnavailable {
                    location: location.to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        found
    }

    /// Pushes in reverse so the first reference is popped first.
    fn push_all(&mut self, references: Vec<SchemaReference>) {
        self.stack.extend(references.into_iter().rev());
    }

    /// Queues a document named by a locator when nothing else pulled it in.
    pub fn push_locator(&mut self, location: Url) {
        self.stack.push(SchemaReference {
            kind: ReferenceKind::Locator,
            namespace: None,
            location,
        });
    }

    pub fn is_visited(&self, location: &Url) -> bool {
        self.visited_locations.contains(location)
    }

    /// Marks a document fetched outside discovery, such as the entry point.
    pub fn mark_visited(&mut self, location: &Url) {
        self.visited_locations.insert(location.clone());
    }

    /// True while references remain on the stack, skippable or not.
    pub fn has_pending(&self) -> bool {
        !self.stack.is_empty()
    }

    /// The next reference worth fetching. Locations already visited and
    /// namespaces the fragment already owns are skipped.
    pub fn next(&mut self, fragment: &DocumentFragment) -> Option<SchemaReference> {
        while let Some(reference) = self.stack.pop() {
            if self.visited_locations.contains(&reference.location)
                || fragment.schema_at(&reference.location).is_some()
            {
                continue;
            }
            if reference.kind != ReferenceKind::Include {
                if let Some(ns) = reference.namespace.as_deref().filter(|ns| !ns.is_empty()) {
                    if self.visited_namespaces.contains(ns) || fragment.has_schema(ns) {
                        tracing::debug!(
                            "namespace {} already owned, skipping {}",
                            ns,
                            reference.location
                        );
                        continue;
                    }
                }
            }
            self.visited_locations.insert(reference.location.clone());
            return Some(reference);
        }
        None
    }

    /// Attaches a parsed schema and queues everything it references.
    pub fn attach(
        &mut self,
        fragment: &mut DocumentFragment,
        reference: &SchemaReference,
        schema: Schema,
    ) {
        let nested: Vec<SchemaReference> = schema
            .imports()
            .iter()
            .map(|import| SchemaReference {
                kind: if import.include {
                    ReferenceKind::Include
                } else {
                    ReferenceKind::Import
                },
                namespace: import.namespace.clone(),
                location: import.schema_location.clone(),
            })
            .collect();
        let linkbases: Vec<Url> = schema.linkbase_refs().iter().map(|lb| lb.href.clone()).collect();
        let embedded: Vec<NodeRef> = schema
            .app_info()
            .iter()
            .flat_map(|info| info.children().named(LINK, "linkbase").cloned().collect::<Vec<_>>())
            .collect();
        let skipped: Vec<LoadWarning> = schema
            .skipped_references()
            .iter()
            .map(|r| {
                let location = r.location.clone();
                let reason = r.reason.clone();
                if r.linkbase {
                    LoadWarning::LinkbaseUnavailable { location, reason }
                } else {
                    LoadWarning::SchemaUnavailable { location, reason }
                }
            })
            .collect();
        let source = schema.source_uri().clone();
        let namespace = CompactString::from(schema.target_namespace());

        let attached = match (reference.kind, reference.namespace.as_deref()) {
            (ReferenceKind::Include, Some(owner)) => match fragment.include_schema(owner, schema) {
                None => true,
                Some(orphan) => fragment.add_schema(orphan),
            },
            _ => fragment.add_schema(schema),
        };
        if !attached {
            return;
        }

        self.visited_namespaces.insert(namespace);
        for warning in skipped {
            fragment.warn(warning);
        }
        for location in linkbases {
            self.queue_linkbase(location);
        }
        self.embedded
            .extend(embedded.into_iter().map(|node| (node, source.clone())));
        self.push_all(nested);
    }

    /// Records why a reference produced no schema.
    pub fn reject(&mut self, fragment: &mut DocumentFragment, reference: &SchemaReference, error: Error) {
        let location = reference.location.to_string();
        match (reference.kind, error) {
            (ReferenceKind::Locator, e) => {
                tracing::debug!("locator target {} is not a schema: {}", location, e);
            }
            (_, Error::Xml { message, .. }) => fragment.warn(LoadWarning::NotASchema {
                location,
                reason: message,
            }),
            (_, e) => fragment.warn(LoadWarning::SchemaUnavailable {
                location,
                reason: e.to_string(),
            }),
        }
    }

    pub fn queue_linkbase(&mut self, location: Url) {
        if self.seen_linkbases.insert(location.clone()) {
            self.linkbases.push(location);
        }
    }

    /// Linkbase documents queued since the last call, in discovery order.
    pub fn take_linkbases(&mut self) -> Vec<Url> {
        std::mem::take(&mut self.linkbases)
    }

    /// `link:linkbase` elements embedded in attached schemas' appinfo.
    pub fn take_embedded(&mut self) -> Vec<(NodeRef, Url)> {
        std::mem::take(&mut self.embedded)
    }
}
