//! Engine-agnostic XML service interfaces.
//!
//! Everything above this module talks to documents only through
//! [`XmlEngine`], [`XmlDocument`] and [`XmlNode`]. The bundled engine is
//! [`QuickXmlEngine`]; hosts can swap it through the
//! [`ServiceRegistry`](crate::ServiceRegistry).

mod dom;
pub mod names;
mod schema;

pub use dom::{DomDocument, DomNode, QuickXmlEngine};
pub use names::{NamespaceManager, QualifiedName};
pub use schema::{
    AttributeUse, SchemaAttribute, SchemaDeclarations, SchemaElement, SchemaReader, SchemaType,
    XsdDeclarationReader,
};

use crate::Result;
use compact_str::CompactString;
use std::fmt;
use std::sync::Arc;
use url::Url;

pub type NodeRef = Arc<dyn XmlNode>;
pub type DocumentRef = Arc<dyn XmlDocument>;

/// Parses raw bytes into a navigable document.
pub trait XmlEngine: Send + Sync {
    fn parse(&self, data: &[u8], uri: &Url) -> Result<DocumentRef>;
}

pub trait XmlDocument: Send + Sync + fmt::Debug {
    fn uri(&self) -> &Url;

    /// `None` when the document holds no element at all.
    fn root(&self) -> Option<NodeRef>;
}

/// A read-only element node.
pub trait XmlNode: Send + Sync + fmt::Debug {
    fn name(&self) -> &QualifiedName;

    /// Prefix used in the source document, if any.
    fn prefix(&self) -> Option<&str>;

    fn attributes(&self) -> &AttributeList;

    /// Element children in document order.
    fn children(&self) -> &NodeList;

    /// Direct character content, whitespace-trimmed.
    fn text(&self) -> &str;

    /// Namespace bindings in scope at this element.
    fn namespaces(&self) -> &NamespaceManager;

    /// Base URI after `xml:base` processing.
    fn base_uri(&self) -> &Url;

    fn local_name(&self) -> &str {
        &self.name().local_name
    }

    fn namespace_uri(&self) -> &str {
        &self.name().namespace
    }

    fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.name().is(namespace, local_name)
    }

    fn attribute(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.attributes().get(namespace, local_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: QualifiedName,
    pub prefix: Option<CompactString>,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct AttributeList(Vec<XmlAttribute>);

impl AttributeList {
    pub fn new(attributes: Vec<XmlAttribute>) -> Self {
        Self(attributes)
    }

    pub fn get(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|a| a.name.is(namespace, local_name))
            .map(|a| a.value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, XmlAttribute> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a AttributeList {
    type Item = &'a XmlAttribute;
    type IntoIter = std::slice::Iter<'a, XmlAttribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeList(Vec<NodeRef>);

impl NodeList {
    pub fn new(nodes: Vec<NodeRef>) -> Self {
        Self(nodes)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeRef> {
        self.0.iter()
    }

    pub fn get(&self, index: usize) -> Option<&NodeRef> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a NodeRef> + 'a {
        self.0.iter().filter(move |n| n.is(namespace, local_name))
    }
}

impl<'a> IntoIterator for &'a NodeList {
    type Item = &'a NodeRef;
    type IntoIter = std::slice::Iter<'a, NodeRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// All element descendants of `node` in document order, `node` excluded.
pub fn descendants(node: &NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeRef> = node.children().iter().rev().cloned().collect();
    while let Some(next) = stack.pop() {
        stack.extend(next.children().iter().rev().cloned());
        out.push(next);
    }
    out
}
