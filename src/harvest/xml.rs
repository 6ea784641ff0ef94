//! Owned XML element tree.
//!
//! OAI-PMH responses are small enough to materialize, and both metadata
//! schemas are easier to walk as a tree than as an event stream. Element and
//! attribute names are stored by local name; namespaces are dropped.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    #[error("Malformed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },
    #[error("Document has no root element")]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Concatenated direct text content, whitespace-trimmed.
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Direct children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// All descendants (not including `self`) with the given local name,
    /// in document order.
    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut out = Vec::new();
        collect_descendants(self, name, &mut out);
        out
    }

    /// Descendants without element children, in document order.
    pub fn leaves(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

fn collect_descendants<'a>(el: &'a XmlElement, name: &str, out: &mut Vec<&'a XmlElement>) {
    for child in &el.children {
        if child.name == name {
            out.push(child);
        }
        collect_descendants(child, name, out);
    }
}

fn collect_leaves<'a>(el: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    for child in &el.children {
        if child.children.is_empty() {
            out.push(child);
        } else {
            collect_leaves(child, out);
        }
    }
}

/// Parses a complete document and returns its root element.
pub fn parse_document(xml: &str) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|e| XmlError::Malformed {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;
        match event {
            Event::Start(e) => stack.push(element_from_start(&e, &reader)?),
            Event::Empty(e) => {
                let el = element_from_start(&e, &reader)?;
                attach(&mut stack, &mut root, el);
            }
            Event::End(_) => {
                let el = stack.pop().ok_or_else(|| XmlError::Malformed {
                    position: reader.buffer_position() as u64,
                    message: "unexpected closing tag".to_string(),
                })?;
                attach(&mut stack, &mut root, el);
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| XmlError::Malformed {
                        position: reader.buffer_position() as u64,
                        message: e.to_string(),
                    })?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(XmlError::Malformed {
            position: reader.buffer_position() as u64,
            message: format!("unclosed element <{}>", stack[stack.len() - 1].name),
        });
    }
    root.ok_or(XmlError::Empty)
}

fn element_from_start(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<XmlElement, XmlError> {
    let malformed = |message: String| XmlError::Malformed {
        position: reader.buffer_position() as u64,
        message,
    };

    let mut el = XmlElement::new(String::from_utf8_lossy(e.local_name().as_ref()));
    for attr in e.attributes() {
        let attr = attr.map_err(|err| malformed(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| malformed(err.to_string()))?
            .into_owned();
        el.attributes.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, el: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}
