// XLink classification of generic XML nodes
use crate::resolver::resolve_reference;
use crate::xml::names::XLINK;
use crate::xml::{NodeRef, XmlNode};
use crate::{Error, Result};
use compact_str::CompactString;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum XlinkType {
    Unknown,
    Simple,
    Extended,
    Locator,
    Arc,
    Resource,
    Title,
}

impl XlinkType {
    /// Maps a literal `xlink:type` value; anything unrecognised is `Unknown`.
    pub fn from_attribute(value: &str) -> Self {
        match value {
            "simple" => XlinkType::Simple,
            "extended" => XlinkType::Extended,
            "locator" => XlinkType::Locator,
            "arc" => XlinkType::Arc,
            "resource" => XlinkType::Resource,
            "title" => XlinkType::Title,
            _ => XlinkType::Unknown,
        }
    }

    /// Type of a node given its raw `type` and `href` attributes. A missing
    /// type with an `href` present defaults to simple.
    fn derive(type_attribute: Option<&str>, href: Option<&str>) -> Self {
        match (type_attribute, href) {
            (Some(t), _) if !t.is_empty() => Self::from_attribute(t),
            (_, Some(h)) if !h.is_empty() => XlinkType::Simple,
            _ => XlinkType::Unknown,
        }
    }
}

/// Whether `node` takes part in XLink at all: it must carry a non-empty
/// `xlink:type` or `xlink:href`.
pub fn is_xlink_node(node: &dyn XmlNode) -> bool {
    let non_empty = |local| node.attribute(XLINK, local).is_some_and(|v| !v.is_empty());
    non_empty("type") || non_empty("href")
}

/// `None` for plain XML nodes, otherwise the node's XLink type.
pub fn classify(node: &dyn XmlNode) -> Option<XlinkType> {
    if !is_xlink_node(node) {
        return None;
    }
    Some(XlinkType::derive(
        node.attribute(XLINK, "type"),
        node.attribute(XLINK, "href"),
    ))
}

/// XLink view over one element. Attributes are captured when the view is
/// built; the element itself is only weakly referenced.
#[derive(Clone)]
pub struct XlinkNode {
    node: Weak<dyn XmlNode>,
    kind: XlinkType,
    type_attribute: CompactString,
    href: CompactString,
    role: CompactString,
    arcrole: CompactString,
    title: CompactString,
    show: CompactString,
    actuate: CompactString,
    label: CompactString,
    from: CompactString,
    to: CompactString,
}

impl fmt::Debug for XlinkNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XlinkNode")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("href", &self.href)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("role", &self.role)
            .finish()
    }
}

impl XlinkNode {
    pub fn from_node(node: &NodeRef) -> Self {
        let attr = |local| CompactString::from(node.attribute(XLINK, local).unwrap_or(""));
        let type_attribute = attr("type");
        let href = attr("href");
        let kind = XlinkType::derive(
            Some(type_attribute.as_str()).filter(|t| !t.is_empty()),
            Some(href.as_str()),
        );
        Self {
            node: Arc::downgrade(node),
            kind,
            type_attribute,
            href,
            role: attr("role"),
            arcrole: attr("arcrole"),
            title: attr("title"),
            show: attr("show"),
            actuate: attr("actuate"),
            label: attr("label"),
            from: attr("from"),
            to: attr("to"),
        }
    }

    /// The underlying element, while its document is still alive.
    pub fn node(&self) -> Option<NodeRef> {
        self.node.upgrade()
    }

    pub fn kind(&self) -> XlinkType {
        self.kind
    }

    /// Raw `xlink:type` value, empty when absent.
    pub fn type_attribute(&self) -> &str {
        &self.type_attribute
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn arcrole(&self) -> &str {
        &self.arcrole
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn show(&self) -> &str {
        &self.show
    }

    pub fn actuate(&self) -> &str {
        &self.actuate
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// A locator target: `<document-uri>#<fragment-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Href {
    pub document: Url,
    pub fragment: CompactString,
}

impl Href {
    /// Parses `raw` relative to `base`. An empty document part refers to
    /// `base` itself; a missing or empty fragment is malformed.
    pub fn parse(raw: &str, base: &Url) -> Result<Self> {
        let raw = raw.trim();
        let (document, fragment) = raw
            .split_once('#')
            .ok_or_else(|| Error::MalformedReference(format!("href '{}' has no fragment", raw)))?;
        if fragment.is_empty() {
            return Err(Error::MalformedReference(format!(
                "href '{}' has an empty fragment",
                raw
            )));
        }
        let mut document = if document.is_empty() {
            base.clone()
        } else {
            resolve_reference(base, document)?
        };
        document.set_fragment(None);
        Ok(Self {
            document,
            fragment: fragment.into(),
        })
    }
}

impl fmt::Display for Href {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document, self.fragment)
    }
}
