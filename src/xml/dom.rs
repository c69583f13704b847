// Owned, namespace-resolved element tree built from quick-xml events
use super::names::{NamespaceManager, QualifiedName, XML};
use super::{
    AttributeList, DocumentRef, NodeList, NodeRef, XmlAttribute, XmlDocument, XmlEngine, XmlNode,
};
use crate::{Error, Result};
use compact_str::CompactString;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Display;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Default, Clone, Copy)]
pub struct QuickXmlEngine;

impl QuickXmlEngine {
    pub fn new() -> Self {
        Self
    }
}

impl XmlEngine for QuickXmlEngine {
    fn parse(&self, data: &[u8], uri: &Url) -> Result<DocumentRef> {
        // Skip BOM if present
        let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

        let mut reader = Reader::from_reader(data);
        let mut buf = Vec::new();
        let mut open: Vec<OpenElement> = Vec::new();
        let mut root: Option<NodeRef> = None;

        loop {
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| xml_error(uri, format!("{} at byte {}", e, reader.buffer_position())))?
            {
                Event::Start(e) => {
                    let element = OpenElement::start(&e, open.last(), uri)?;
                    open.push(element);
                }
                Event::Empty(e) => {
                    let node = OpenElement::start(&e, open.last(), uri)?.finish();
                    attach(&mut open, &mut root, node, uri)?;
                }
                Event::End(_) => {
                    let element = open
                        .pop()
                        .ok_or_else(|| xml_error(uri, "closing tag without an open element"))?;
                    attach(&mut open, &mut root, element.finish(), uri)?;
                }
                Event::Text(t) => {
                    if let Some(top) = open.last_mut() {
                        let text = t.unescape().map_err(|e| xml_error(uri, e))?;
                        top.text.push_str(&text);
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = open.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if let Some(unclosed) = open.last() {
            return Err(xml_error(
                uri,
                format!("unexpected end of document inside <{}>", unclosed.name.local_name),
            ));
        }

        Ok(Arc::new(DomDocument {
            uri: uri.clone(),
            root,
        }))
    }
}

fn attach(
    open: &mut [OpenElement],
    root: &mut Option<NodeRef>,
    node: NodeRef,
    uri: &Url,
) -> Result<()> {
    match open.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(xml_error(uri, "more than one root element")),
    }
    Ok(())
}

fn xml_error(uri: &Url, message: impl Display) -> Error {
    Error::Xml {
        uri: uri.to_string(),
        message: message.to_string(),
    }
}

struct OpenElement {
    name: QualifiedName,
    prefix: Option<CompactString>,
    attributes: Vec<XmlAttribute>,
    children: Vec<NodeRef>,
    text: String,
    namespaces: NamespaceManager,
    base_uri: Url,
}

impl OpenElement {
    fn start(e: &BytesStart<'_>, parent: Option<&OpenElement>, uri: &Url) -> Result<Self> {
        let mut namespaces = parent
            .map(|p| p.namespaces.clone())
            .unwrap_or_default();
        let mut base_uri = parent
            .map(|p| p.base_uri.clone())
            .unwrap_or_else(|| uri.clone());

        let mut raw = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| xml_error(uri, err))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|_| xml_error(uri, "invalid UTF-8 in attribute name"))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|err| xml_error(uri, err))?
                .into_owned();

            if key == "xmlns" {
                namespaces.declare("", &value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                namespaces.declare(prefix, &value);
            } else {
                raw.push((key, value));
            }
        }

        let tag = std::str::from_utf8(e.name().as_ref())
            .map_err(|_| xml_error(uri, "invalid UTF-8 in tag name"))?
            .to_string();
        let (prefix, local) = split_prefix(&tag);
        let namespace = match prefix {
            Some(p) => namespaces
                .lookup_namespace(p)
                .ok_or_else(|| xml_error(uri, format!("undeclared prefix '{}' on <{}>", p, tag)))?,
            None => namespaces.lookup_namespace("").unwrap_or(""),
        };
        let name = QualifiedName::new(namespace, local);

        let mut attributes = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let (attr_prefix, attr_local) = split_prefix(&key);
            // Unprefixed attributes are in no namespace
            let attr_ns = match attr_prefix {
                Some(p) => namespaces.lookup_namespace(p).ok_or_else(|| {
                    xml_error(uri, format!("undeclared prefix '{}' on attribute {}", p, key))
                })?,
                None => "",
            };
            let attr_name = QualifiedName::new(attr_ns, attr_local);
            if attr_name.is(XML, "base") {
                if let Ok(joined) = base_uri.join(&value) {
                    base_uri = joined;
                }
            }
            attributes.push(XmlAttribute {
                name: attr_name,
                prefix: attr_prefix.map(CompactString::from),
                value,
            });
        }

        Ok(Self {
            name,
            prefix: prefix.map(CompactString::from),
            attributes,
            children: Vec::new(),
            text: String::new(),
            namespaces,
            base_uri,
        })
    }

    fn finish(self) -> NodeRef {
        Arc::new(DomNode {
            name: self.name,
            prefix: self.prefix,
            attributes: AttributeList::new(self.attributes),
            children: NodeList::new(self.children),
            text: self.text.trim().to_string(),
            namespaces: self.namespaces,
            base_uri: self.base_uri,
        })
    }
}

fn split_prefix(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

#[derive(Debug)]
pub struct DomDocument {
    uri: Url,
    root: Option<NodeRef>,
}

impl XmlDocument for DomDocument {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn root(&self) -> Option<NodeRef> {
        self.root.clone()
    }
}

#[derive(Debug)]
pub struct DomNode {
    name: QualifiedName,
    prefix: Option<CompactString>,
    attributes: AttributeList,
    children: NodeList,
    text: String,
    namespaces: NamespaceManager,
    base_uri: Url,
}

impl XmlNode for DomNode {
    fn name(&self) -> &QualifiedName {
        &self.name
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    fn children(&self) -> &NodeList {
        &self.children
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn namespaces(&self) -> &NamespaceManager {
        &self.namespaces
    }

    fn base_uri(&self) -> &Url {
        &self.base_uri
    }
}
