// Load entry points: fetch, discover and build networks for a document
use crate::discovery::{Discovery, ReferenceKind, SchemaReference};
use crate::fragment::{DocumentFragment, FragmentSet, LoadWarning};
use crate::linkbase::Linkbase;
use crate::registry::ServiceRegistry;
use crate::resolver::{path_to_url, ResourceResolver, ResourceShape};
use crate::schema::Schema;
use crate::xml::names::{LINK, XBRLI, XSD};
use crate::xml::{descendants, DocumentRef, NodeRef, SchemaReader, XmlEngine, XmlNode};
use crate::{Error, Result};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Loads instance documents and taxonomy entry points into [`FragmentSet`]s.
///
/// Services are resolved from the registry once, in [`Loader::new`]; a
/// binding registered afterwards only affects loaders created after it.
/// Blocking and async entry points run the same steps and produce the same
/// result for the same input.
pub struct Loader {
    engine: Arc<dyn XmlEngine>,
    schema_reader: Arc<dyn SchemaReader>,
    resolver: Arc<dyn ResourceResolver>,
    load_schemas: bool,
    load_linkbases: bool,
    timeout: Option<Duration>,
}

impl Loader {
    pub fn new(registry: &ServiceRegistry) -> Result<Self> {
        Ok(Self {
            engine: registry.resolve::<dyn XmlEngine>()?,
            schema_reader: registry.resolve::<dyn SchemaReader>()?,
            resolver: registry.resolve::<dyn ResourceResolver>()?,
            load_schemas: true,
            load_linkbases: true,
            timeout: None,
        })
    }

    pub fn with_schema_loading(mut self, enabled: bool) -> Self {
        self.load_schemas = enabled;
        self
    }

    pub fn with_linkbase_loading(mut self, enabled: bool) -> Self {
        self.load_linkbases = enabled;
        self
    }

    /// Deadline for a whole async load. Blocking loads rely on the
    /// transport's own request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn load_from_path<P: AsRef<Path>>(&self, path: P) -> Result<FragmentSet> {
        let uri = path_to_url(path.as_ref())?;
        self.load_url(&uri)
    }

    /// Accepts an absolute URL or a filesystem path.
    pub fn load_from_uri(&self, uri: &str) -> Result<FragmentSet> {
        let uri = parse_location(uri)?;
        self.load_url(&uri)
    }

    pub async fn load_from_path_async<P: AsRef<Path>>(&self, path: P) -> Result<FragmentSet> {
        let uri = path_to_url(path.as_ref())?;
        self.load_url_async(&uri).await
    }

    pub async fn load_from_uri_async(&self, uri: &str) -> Result<FragmentSet> {
        let uri = parse_location(uri)?;
        self.load_url_async(&uri).await
    }

    pub fn load_url(&self, uri: &Url) -> Result<FragmentSet> {
        let start = Instant::now();
        let doc = self.fetch(uri).map_err(|e| top_level(uri, e))?;

        let mut fragments = Vec::new();
        for root in fragment_roots(&doc) {
            let mut fragment = DocumentFragment::new(root, uri.clone());
            let mut discovery = Discovery::new();
            self.begin(&mut fragment, &doc, &mut discovery)
                .map_err(|e| top_level(uri, e))?;
            loop {
                while let Some(reference) = self.next_schema(&mut discovery, &fragment) {
                    let outcome = self.fetch(&reference.location);
                    self.accept_schema(&mut discovery, &mut fragment, &reference, outcome);
                }
                let Some(pending) = self.pending_linkbases(&mut discovery, &mut fragment) else {
                    break;
                };
                let fetched = pending
                    .into_iter()
                    .map(|location| {
                        let outcome = self.fetch(&location);
                        (location, outcome)
                    })
                    .collect();
                self.accept_linkbases(&mut discovery, &mut fragment, fetched);
            }
            fragments.push(fragment);
        }

        Ok(self.finish(uri, fragments, start))
    }

    pub async fn load_url_async(&self, uri: &Url) -> Result<FragmentSet> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.load_url_inner(uri))
                .await
                .map_err(|_| Error::Timeout {
                    uri: uri.to_string(),
                    seconds: limit.as_secs(),
                })?,
            None => self.load_url_inner(uri).await,
        }
    }

    async fn load_url_inner(&self, uri: &Url) -> Result<FragmentSet> {
        let start = Instant::now();
        let doc = self.fetch_async(uri).await.map_err(|e| top_level(uri, e))?;

        let mut fragments = Vec::new();
        for root in fragment_roots(&doc) {
            let mut fragment = DocumentFragment::new(root, uri.clone());
            let mut discovery = Discovery::new();
            self.begin(&mut fragment, &doc, &mut discovery)
                .map_err(|e| top_level(uri, e))?;
            loop {
                while let Some(reference) = self.next_schema(&mut discovery, &fragment) {
                    let outcome = self.fetch_async(&reference.location).await;
                    self.accept_schema(&mut discovery, &mut fragment, &reference, outcome);
                }
                let Some(pending) = self.pending_linkbases(&mut discovery, &mut fragment) else {
                    break;
                };
                let mut fetched = Vec::with_capacity(pending.len());
                for location in pending {
                    let outcome = self.fetch_async(&location).await;
                    fetched.push((location, outcome));
                }
                self.accept_linkbases(&mut discovery, &mut fragment, fetched);
            }
            fragments.push(fragment);
        }

        Ok(self.finish(uri, fragments, start))
    }

    fn fetch(&self, uri: &Url) -> Result<DocumentRef> {
        let bytes = self.resolver.fetch(uri, ResourceShape::Bytes)?.into_bytes()?;
        self.engine.parse(&bytes, uri)
    }

    async fn fetch_async(&self, uri: &Url) -> Result<DocumentRef> {
        let bytes = self
            .resolver
            .fetch_async(uri, ResourceShape::Bytes)
            .await?
            .into_bytes()?;
        self.engine.parse(&bytes, uri)
    }

    /// Seeds discovery from the fragment root. Schema and linkbase entry
    /// points are attached directly.
    fn begin(&self, fragment: &mut DocumentFragment, doc: &DocumentRef, discovery: &mut Discovery) -> Result<()> {
        let root = fragment.root().clone();
        if root.is(XSD, "schema") {
            let schema = Schema::from_document(doc, self.schema_reader.as_ref())?;
            let entry = SchemaReference {
                kind: ReferenceKind::SchemaRef,
                namespace: None,
                location: doc.uri().clone(),
            };
            discovery.mark_visited(doc.uri());
            discovery.attach(fragment, &entry, schema);
        } else if root.is(LINK, "linkbase") {
            let linkbase = Linkbase::from_node(&root, doc.uri())?;
            self.queue_locator_targets(discovery, fragment, &linkbase);
            fragment.add_linkbase(linkbase);
        } else {
            discovery.seed(fragment);
        }
        Ok(())
    }

    fn next_schema(&self, discovery: &mut Discovery, fragment: &DocumentFragment) -> Option<SchemaReference> {
        if !self.load_schemas {
            return None;
        }
        discovery.next(fragment)
    }

    fn accept_schema(
        &self,
        discovery: &mut Discovery,
        fragment: &mut DocumentFragment,
        reference: &SchemaReference,
        outcome: Result<DocumentRef>,
    ) {
        match outcome.and_then(|doc| Schema::from_document(&doc, self.schema_reader.as_ref())) {
            Ok(schema) => discovery.attach(fragment, reference, schema),
            Err(e) => discovery.reject(fragment, reference, e),
        }
    }

    /// Linkbases still to fetch, or `None` once discovery has settled.
    /// Embedded linkbases are built here since they need no fetch.
    fn pending_linkbases(&self, discovery: &mut Discovery, fragment: &mut DocumentFragment) -> Option<Vec<Url>> {
        if !self.load_linkbases {
            return None;
        }
        for (node, source) in discovery.take_embedded() {
            match Linkbase::from_node(&node, &source) {
                Ok(linkbase) => {
                    self.queue_locator_targets(discovery, fragment, &linkbase);
                    fragment.add_linkbase(linkbase);
                }
                Err(e) => fragment.warn(LoadWarning::LinkbaseUnavailable {
                    location: source.to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        let pending: Vec<Url> = discovery
            .take_linkbases()
            .into_iter()
            .filter(|location| !fragment.has_linkbase(location))
            .collect();
        if pending.is_empty() && !(self.load_schemas && discovery.has_pending()) {
            return None;
        }
        Some(pending)
    }

    fn accept_linkbases(
        &self,
        discovery: &mut Discovery,
        fragment: &mut DocumentFragment,
        fetched: Vec<(Url, Result<DocumentRef>)>,
    ) {
        let mut documents = Vec::with_capacity(fetched.len());
        for (location, outcome) in fetched {
            match outcome {
                Ok(doc) => documents.push((location, doc)),
                Err(e) => fragment.warn(LoadWarning::LinkbaseUnavailable {
                    location: location.to_string(),
                    reason: e.to_string(),
                }),
            }
        }

        for (location, built) in build_linkbases(documents) {
            match built {
                Ok(linkbase) => {
                    self.queue_locator_targets(discovery, fragment, &linkbase);
                    fragment.add_linkbase(linkbase);
                }
                Err(e) => fragment.warn(LoadWarning::LinkbaseUnavailable {
                    location: location.to_string(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    /// Locators may point into documents nothing else referenced. Every
    /// locator counts, including ones no surviving arc uses.
    fn queue_locator_targets(&self, discovery: &mut Discovery, fragment: &DocumentFragment, linkbase: &Linkbase) {
        if !self.load_schemas {
            return;
        }
        for document in linkbase.locator_documents() {
            if discovery.is_visited(document)
                || fragment.schema_at(document).is_some()
                || fragment.has_linkbase(document)
                || document == linkbase.source_uri()
            {
                continue;
            }
            discovery.push_locator(document.clone());
        }
    }

    fn finish(&self, uri: &Url, fragments: Vec<DocumentFragment>, start: Instant) -> FragmentSet {
        let set = FragmentSet::new(uri.clone(), fragments);
        tracing::info!(
            "loaded {} in {:?}: {} fragments, {} schemas, {} linkbases, {} relationships, {} warnings",
            uri,
            start.elapsed(),
            set.len(),
            set.iter().map(|f| f.schemas().len()).sum::<usize>(),
            set.iter().map(|f| f.linkbases().len()).sum::<usize>(),
            set.iter().map(|f| f.relationship_count()).sum::<usize>(),
            set.warnings().count()
        );
        set
    }
}

fn parse_location(location: &str) -> Result<Url> {
    match Url::parse(location) {
        Ok(url) if url.scheme().len() > 1 => Ok(url),
        _ => path_to_url(Path::new(location)),
    }
}

fn top_level(uri: &Url, error: Error) -> Error {
    Error::Load {
        uri: uri.to_string(),
        source: Box::new(error),
    }
}

/// One root per `xbrli:xbrl` element, outermost first, or the document root
/// when there is none.
fn fragment_roots(doc: &DocumentRef) -> Vec<NodeRef> {
    let Some(root) = doc.root() else {
        return Vec::new();
    };
    if root.is(XBRLI, "xbrl") {
        return vec![root];
    }
    let mut roots: Vec<NodeRef> = Vec::new();
    for node in descendants(&root) {
        if !node.is(XBRLI, "xbrl") {
            continue;
        }
        if roots.iter().any(|outer| contains(outer, &node)) {
            continue;
        }
        roots.push(node);
    }
    if roots.is_empty() {
        roots.push(root);
    }
    roots
}

fn contains(outer: &NodeRef, node: &NodeRef) -> bool {
    descendants(outer).iter().any(|n| Arc::ptr_eq(n, node))
}

fn build_linkbases(documents: Vec<(Url, DocumentRef)>) -> Vec<(Url, Result<Linkbase>)> {
    #[cfg(feature = "parallel")]
    let documents = documents.into_par_iter();
    #[cfg(not(feature = "parallel"))]
    let documents = documents.into_iter();

    documents
        .map(|(location, doc)| {
            let built = Linkbase::from_document(&doc);
            (location, built)
        })
        .collect()
}
