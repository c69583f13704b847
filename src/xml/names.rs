use compact_str::CompactString;
use serde::Serialize;
use std::fmt;

pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const XLINK: &str = "http://www.w3.org/1999/xlink";
pub const XBRLI: &str = "http://www.xbrl.org/2003/instance";
pub const LINK: &str = "http://www.xbrl.org/2003/linkbase";

/// A (namespace, local name) pair. An empty namespace means "no namespace".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QualifiedName {
    pub namespace: CompactString,
    pub local_name: CompactString,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<CompactString>, local_name: impl Into<CompactString>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }

    pub fn local(local_name: impl Into<CompactString>) -> Self {
        Self::new("", local_name)
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace == namespace && self.local_name == local_name
    }

    /// Clark notation: `{namespace}local`, or just `local` without a namespace.
    pub fn fully_qualified(&self) -> String {
        if self.namespace.is_empty() {
            self.local_name.to_string()
        } else {
            format!("{{{}}}{}", self.namespace, self.local_name)
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fully_qualified())
    }
}

/// Prefix to namespace bindings in scope at one element.
///
/// Later declarations shadow earlier ones, so lookups scan from the back.
/// The default namespace is bound to the empty prefix.
#[derive(Debug, Clone, Default)]
pub struct NamespaceManager {
    bindings: Vec<(CompactString, CompactString)>,
}

impl NamespaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, prefix: &str, namespace: &str) {
        self.bindings
            .push((CompactString::from(prefix), CompactString::from(namespace)));
    }

    pub fn lookup_namespace(&self, prefix: &str) -> Option<&str> {
        match prefix {
            "xml" => Some(XML),
            "xmlns" => Some(XMLNS),
            _ => self
                .bindings
                .iter()
                .rev()
                .find(|(p, _)| p.as_str() == prefix)
                .map(|(_, ns)| ns.as_str())
                .filter(|ns| !ns.is_empty() || !prefix.is_empty()),
        }
    }

    /// Innermost non-empty prefix still bound to `namespace`. A default
    /// namespace declaration is not a prefix and is skipped.
    pub fn lookup_prefix(&self, namespace: &str) -> Option<&str> {
        self.bindings
            .iter()
            .rev()
            .find(|(p, ns)| {
                !p.is_empty() && ns.as_str() == namespace && self.lookup_namespace(p) == Some(namespace)
            })
            .map(|(p, _)| p.as_str())
    }

    /// Resolves a lexical QName such as `xbrli:item`. Unprefixed names take
    /// the default namespace, as XML Schema does for QName-valued attributes.
    pub fn resolve(&self, lexical: &str) -> Option<QualifiedName> {
        let lexical = lexical.trim();
        if lexical.is_empty() {
            return None;
        }
        match lexical.split_once(':') {
            Some((prefix, local)) => self
                .lookup_namespace(prefix)
                .map(|ns| QualifiedName::new(ns, local)),
            None => Some(QualifiedName::new(
                self.lookup_namespace("").unwrap_or(""),
                lexical,
            )),
        }
    }

    /// Effective bindings, one per prefix, outermost first.
    pub fn declared(&self) -> Vec<QualifiedName> {
        let mut seen: Vec<&str> = Vec::new();
        let mut out = Vec::new();
        for (prefix, ns) in self.bindings.iter().rev() {
            if seen.contains(&prefix.as_str()) {
                continue;
            }
            seen.push(prefix.as_str());
            if !ns.is_empty() {
                out.push(QualifiedName::new(ns.clone(), prefix.clone()));
            }
        }
        out.reverse();
        out
    }
}
