// Resource resolution: local files, an on-disk cache and the network behind one interface
use crate::http::{Credentials, HttpTransport, Transport};
use crate::{Error, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

/// What the caller wants back from a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceShape {
    /// Raw bytes, exactly as stored or served.
    Bytes,
    /// UTF-8 text with any byte order mark removed.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOrigin {
    Local,
    Cache,
    Network,
}

/// A readable stream positioned at the start of the resource.
pub struct Resource {
    uri: Url,
    origin: ResourceOrigin,
    reader: Box<dyn Read + Send>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("uri", &self.uri.as_str())
            .field("origin", &self.origin)
            .finish()
    }
}

impl Resource {
    pub fn new(uri: Url, origin: ResourceOrigin, reader: Box<dyn Read + Send>) -> Self {
        Self {
            uri,
            origin,
            reader,
        }
    }

    pub fn from_bytes(uri: Url, origin: ResourceOrigin, bytes: Vec<u8>) -> Self {
        Self::new(uri, origin, Box::new(Cursor::new(bytes)))
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn origin(&self) -> ResourceOrigin {
        self.origin
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Resolves a URI to a readable resource, blocking or not.
pub trait ResourceResolver: Send + Sync {
    fn fetch(&self, uri: &Url, shape: ResourceShape) -> Result<Resource>;

    fn fetch_async<'a>(
        &'a self,
        uri: &'a Url,
        shape: ResourceShape,
    ) -> BoxFuture<'a, Result<Resource>>;
}

pub fn is_network(uri: &Url) -> bool {
    matches!(uri.scheme(), "http" | "https")
}

/// Resolves `reference` against `base`. Absolute URLs are taken as-is.
pub fn resolve_reference(base: &Url, reference: &str) -> Result<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(Error::MalformedReference("empty location".to_string()));
    }
    match Url::parse(reference) {
        // Single-letter schemes are Windows drive letters, not URLs
        Ok(url) if url.scheme().len() > 1 => Ok(url),
        _ => Ok(base.join(reference)?),
    }
}

/// Converts a filesystem path into an absolute `file:` URL.
pub fn path_to_url(path: &Path) -> Result<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&absolute)
        .map_err(|_| Error::unavailable(path.display(), "not a valid file path"))
}

fn local_path(uri: &Url) -> Result<PathBuf> {
    match uri.scheme() {
        "file" => uri
            .to_file_path()
            .map_err(|_| Error::unavailable(uri, "not a local file URL")),
        scheme => Err(Error::unavailable(
            uri,
            format!("unsupported scheme '{}'", scheme),
        )),
    }
}

fn shape_bytes(bytes: Vec<u8>, shape: ResourceShape) -> Vec<u8> {
    match shape {
        ResourceShape::Bytes => bytes,
        ResourceShape::Text => {
            let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
            String::from_utf8_lossy(body).into_owned().into_bytes()
        }
    }
}

/// Pass-through strategy: local files from disk, network URLs straight from
/// the transport with nothing persisted.
#[derive(Clone)]
pub struct DefaultResolver {
    transport: Arc<dyn Transport>,
    credentials: Option<Credentials>,
}

impl Default for DefaultResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultResolver {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(HttpTransport::default()))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn unavailable(uri: &Url, error: Error) -> Error {
        match error {
            e @ Error::ResourceUnavailable { .. } => e,
            e => Error::unavailable(uri, e),
        }
    }
}

impl ResourceResolver for DefaultResolver {
    fn fetch(&self, uri: &Url, shape: ResourceShape) -> Result<Resource> {
        if is_network(uri) {
            let bytes = self
                .transport
                .get(uri, self.credentials.as_ref())
                .map_err(|e| Self::unavailable(uri, e))?;
            return Ok(Resource::from_bytes(
                uri.clone(),
                ResourceOrigin::Network,
                shape_bytes(bytes, shape),
            ));
        }

        let path = local_path(uri)?;
        match shape {
            ResourceShape::Bytes => {
                let file = std::fs::File::open(&path).map_err(|e| Error::unavailable(uri, e))?;
                Ok(Resource::new(uri.clone(), ResourceOrigin::Local, Box::new(file)))
            }
            ResourceShape::Text => {
                let bytes = std::fs::read(&path).map_err(|e| Error::unavailable(uri, e))?;
                Ok(Resource::from_bytes(
                    uri.clone(),
                    ResourceOrigin::Local,
                    shape_bytes(bytes, shape),
                ))
            }
        }
    }

    fn fetch_async<'a>(
        &'a self,
        uri: &'a Url,
        shape: ResourceShape,
    ) -> BoxFuture<'a, Result<Resource>> {
        Box::pin(async move {
            if is_network(uri) {
                let bytes = self
                    .transport
                    .get_async(uri, self.credentials.as_ref())
                    .await
                    .map_err(|e| Self::unavailable(uri, e))?;
                return Ok(Resource::from_bytes(
                    uri.clone(),
                    ResourceOrigin::Network,
                    shape_bytes(bytes, shape),
                ));
            }

            let path = local_path(uri)?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| Error::unavailable(uri, e))?;
            Ok(Resource::from_bytes(
                uri.clone(),
                ResourceOrigin::Local,
                shape_bytes(bytes, shape),
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Serve from cache; on a miss fetch and persist.
    #[default]
    Populate,
    /// Serve from cache; on a miss fetch without persisting.
    NoStore,
    /// Serve from cache only; a miss is an error.
    Offline,
}

/// Network resources cached at `<root>/<host>/<path>`, one file per URI,
/// raw bytes without metadata. Entries never expire; delete the directory to
/// invalidate.
///
/// Two loads missing the same entry at once both fetch and both write; the
/// last writer wins, which is harmless while content per URI is immutable.
#[derive(Clone)]
pub struct CachingResolver {
    root: PathBuf,
    mode: CacheMode,
    fallback: DefaultResolver,
}

impl CachingResolver {
    /// Fails with [`Error::Config`] when `root` is not an existing directory.
    pub fn new(root: impl Into<PathBuf>, populate: bool) -> Result<Self> {
        let mode = if populate {
            CacheMode::Populate
        } else {
            CacheMode::NoStore
        };
        Self::with_mode(root, mode)
    }

    pub fn offline(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_mode(root, CacheMode::Offline)
    }

    pub fn with_mode(root: impl Into<PathBuf>, mode: CacheMode) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "cache root {} does not exist or is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            mode,
            fallback: DefaultResolver::new(),
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.fallback.transport = transport;
        self
    }

    /// Credentials are forwarded on every network fetch this resolver makes.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.fallback.credentials = Some(credentials);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Cache location for a network URI.
    pub fn cache_path(&self, uri: &Url) -> Result<PathBuf> {
        let host = uri
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::unavailable(uri, "URL has no host"))?;
        let mut path = self.root.join(host);
        let mut segments = 0;
        for segment in uri.path_segments().into_iter().flatten() {
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            path.push(segment);
            segments += 1;
        }
        if segments == 0 {
            return Err(Error::unavailable(uri, "URL has no path to cache under"));
        }
        Ok(path)
    }

    fn miss(&self, uri: &Url) -> Error {
        Error::unavailable(uri, "not present in offline cache")
    }
}

/// Entries are written beside their final path and renamed into place, so
/// an interrupted write never leaves a truncated entry behind.
fn staging_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(
        ".{}-{}.part",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

impl ResourceResolver for CachingResolver {
    fn fetch(&self, uri: &Url, shape: ResourceShape) -> Result<Resource> {
        if shape != ResourceShape::Bytes || !is_network(uri) {
            return self.fallback.fetch(uri, shape);
        }

        let path = self.cache_path(uri)?;
        if path.is_file() {
            tracing::debug!("cache hit {}", uri);
            let file = std::fs::File::open(&path).map_err(|e| Error::unavailable(uri, e))?;
            return Ok(Resource::new(uri.clone(), ResourceOrigin::Cache, Box::new(file)));
        }

        match self.mode {
            CacheMode::Offline => Err(self.miss(uri)),
            CacheMode::NoStore => self.fallback.fetch(uri, shape),
            CacheMode::Populate => {
                let bytes = self.fallback.fetch(uri, shape)?.into_bytes()?;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let staging = staging_path(&path);
                std::fs::write(&staging, &bytes)?;
                std::fs::rename(&staging, &path)?;
                tracing::debug!("cached {} at {}", uri, path.display());
                Ok(Resource::from_bytes(uri.clone(), ResourceOrigin::Network, bytes))
            }
        }
    }

    fn fetch_async<'a>(
        &'a self,
        uri: &'a Url,
        shape: ResourceShape,
    ) -> BoxFuture<'a, Result<Resource>> {
        Box::pin(async move {
            if shape != ResourceShape::Bytes || !is_network(uri) {
                return self.fallback.fetch_async(uri, shape).await;
            }

            let path = self.cache_path(uri)?;
            if tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
                tracing::debug!("cache hit {}", uri);
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| Error::unavailable(uri, e))?;
                return Ok(Resource::from_bytes(uri.clone(), ResourceOrigin::Cache, bytes));
            }

            match self.mode {
                CacheMode::Offline => Err(self.miss(uri)),
                CacheMode::NoStore => self.fallback.fetch_async(uri, shape).await,
                CacheMode::Populate => {
                    let bytes = self.fallback.fetch_async(uri, shape).await?.into_bytes()?;
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    let staging = staging_path(&path);
                    tokio::fs::write(&staging, &bytes).await?;
                    tokio::fs::rename(&staging, &path).await?;
                    tracing::debug!("cached {} at {}", uri, path.display());
                    Ok(Resource::from_bytes(uri.clone(), ResourceOrigin::Network, bytes))
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory transport counting every request it serves.
    #[derive(Default)]
    pub(crate) struct CountingTransport {
        pub documents: Mutex<HashMap<String, Vec<u8>>>,
        pub requests: AtomicUsize,
        pub seen_credentials: Mutex<Vec<Option<Credentials>>>,
    }

    impl CountingTransport {
        pub fn with(documents: &[(&str, &str)]) -> Self {
            let transport = Self::default();
            for (url, body) in documents {
                transport
                    .documents
                    .lock()
                    .insert(url.to_string(), body.as_bytes().to_vec());
            }
            transport
        }

        pub fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        fn serve(&self, url: &Url, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.seen_credentials.lock().push(credentials.cloned());
            self.documents
                .lock()
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| Error::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    impl Transport for CountingTransport {
        fn get(&self, url: &Url, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
            self.serve(url, credentials)
        }

        fn get_async<'a>(
            &'a self,
            url: &'a Url,
            credentials: Option<&'a Credentials>,
        ) -> BoxFuture<'a, Result<Vec<u8>>> {
            Box::pin(async move { self.serve(url, credentials) })
        }
    }

    const URI: &str = "http://xbrl.example.com/taxonomy/2024/core.xsd";

    fn transport() -> Arc<CountingTransport> {
        Arc::new(CountingTransport::with(&[(URI, "<schema/>")]))
    }

    #[test]
    fn test_missing_cache_root_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CachingResolver::new(dir.path().join("absent"), true);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cache_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = CachingResolver::new(dir.path(), true).unwrap();
        let path = resolver.cache_path(&Url::parse(URI).unwrap()).unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("xbrl.example.com")
                .join("taxonomy")
                .join("2024")
                .join("core.xsd")
        );
    }

    #[test]
    fn test_populate_serves_second_fetch_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport();
        let resolver = CachingResolver::new(dir.path(), true)
            .unwrap()
            .with_transport(transport.clone());
        let uri = Url::parse(URI).unwrap();

        let first = resolver.fetch(&uri, ResourceShape::Bytes).unwrap();
        assert_eq!(first.origin(), ResourceOrigin::Network);
        let first = first.into_bytes().unwrap();

        let second = resolver.fetch(&uri, ResourceShape::Bytes).unwrap();
        assert_eq!(second.origin(), ResourceOrigin::Cache);
        assert_eq!(second.into_bytes().unwrap(), first);
        assert_eq!(transport.requests(), 1);
        assert!(resolver.cache_path(&uri).unwrap().is_file());
    }

    #[test]
    fn test_populate_leaves_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = CachingResolver::new(dir.path(), true)
            .unwrap()
            .with_transport(transport());
        let uri = Url::parse(URI).unwrap();
        resolver.fetch(&uri, ResourceShape::Bytes).unwrap();

        let entry = resolver.cache_path(&uri).unwrap();
        let names: Vec<_> = std::fs::read_dir(entry.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["core.xsd"]);
        assert_ne!(staging_path(&entry), staging_path(&entry));
    }

    #[test]
    fn test_no_store_never_writes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport();
        let resolver = CachingResolver::new(dir.path(), false)
            .unwrap()
            .with_transport(transport.clone());
        let uri = Url::parse(URI).unwrap();

        for _ in 0..2 {
            let bytes = resolver.fetch(&uri, ResourceShape::Bytes).unwrap().into_bytes().unwrap();
            assert_eq!(bytes, b"<schema/>");
        }
        assert_eq!(transport.requests(), 2);
        assert!(!resolver.cache_path(&uri).unwrap().exists());
    }

    #[test]
    fn test_offline_miss_is_unavailable_and_hit_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport();
        let resolver = CachingResolver::offline(dir.path())
            .unwrap()
            .with_transport(transport.clone());
        let uri = Url::parse(URI).unwrap();

        assert!(matches!(
            resolver.fetch(&uri, ResourceShape::Bytes),
            Err(Error::ResourceUnavailable { .. })
        ));

        let path = resolver.cache_path(&uri).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"cached").unwrap();
        let bytes = resolver.fetch(&uri, ResourceShape::Bytes).unwrap().into_bytes().unwrap();
        assert_eq!(bytes, b"cached");
        assert_eq!(transport.requests(), 0);
    }

    #[test]
    fn test_credentials_forwarded_on_every_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(CountingTransport::with(&[
            (URI, "a"),
            ("http://xbrl.example.com/other.xsd", "b"),
        ]));
        let creds = Credentials::new("filer", Some("secret".into()));
        let resolver = CachingResolver::new(dir.path(), false)
            .unwrap()
            .with_transport(transport.clone())
            .with_credentials(creds.clone());

        resolver.fetch(&Url::parse(URI).unwrap(), ResourceShape::Bytes).unwrap();
        resolver
            .fetch(&Url::parse("http://xbrl.example.com/other.xsd").unwrap(), ResourceShape::Bytes)
            .unwrap();
        assert_eq!(
            *transport.seen_credentials.lock(),
            vec![Some(creds.clone()), Some(creds)]
        );
    }

    #[test]
    fn test_local_files_and_text_shape_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("local.xsd");
        std::fs::write(&file, b"\xEF\xBB\xBF<schema/>").unwrap();
        let transport = transport();
        let resolver = CachingResolver::new(dir.path(), true)
            .unwrap()
            .with_transport(transport.clone());

        let local = resolver.fetch(&path_to_url(&file).unwrap(), ResourceShape::Bytes).unwrap();
        assert_eq!(local.origin(), ResourceOrigin::Local);
        assert_eq!(local.into_bytes().unwrap(), b"\xEF\xBB\xBF<schema/>");

        let text = resolver
            .fetch(&Url::parse(URI).unwrap(), ResourceShape::Text)
            .unwrap();
        assert_eq!(text.into_bytes().unwrap(), b"<schema/>");
        // Text requests bypass the cache entirely
        assert!(!resolver.cache_path(&Url::parse(URI).unwrap()).unwrap().exists());
    }

    #[test]
    fn test_resolve_reference() {
        let base = Url::parse("http://example.com/a/b/instance.xml").unwrap();
        assert_eq!(
            resolve_reference(&base, "../core.xsd").unwrap().as_str(),
            "http://example.com/a/core.xsd"
        );
        assert_eq!(
            resolve_reference(&base, "https://other.org/x.xsd").unwrap().as_str(),
            "https://other.org/x.xsd"
        );
        assert!(resolve_reference(&base, "  ").is_err());
    }

    #[tokio::test]
    async fn test_async_populate_matches_blocking_behavior() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport();
        let resolver = CachingResolver::new(dir.path(), true)
            .unwrap()
            .with_transport(transport.clone());
        let uri = Url::parse(URI).unwrap();

        let first = resolver
            .fetch_async(&uri, ResourceShape::Bytes)
            .await
            .unwrap()
            .into_bytes()
            .unwrap();
        let second = resolver.fetch_async(&uri, ResourceShape::Bytes).await.unwrap();
        assert_eq!(second.origin(), ResourceOrigin::Cache);
        assert_eq!(second.into_bytes().unwrap(), first);
        assert_eq!(transport.requests(), 1);
    }

    #[tokio::test]
    async fn test_async_missing_remote_is_unavailable() {
        let resolver = DefaultResolver::with_transport(transport());
        let uri = Url::parse("http://xbrl.example.com/missing.xsd").unwrap();
        assert!(matches!(
            resolver.fetch_async(&uri, ResourceShape::Bytes).await,
            Err(Error::ResourceUnavailable { .. })
        ));
    }
}
