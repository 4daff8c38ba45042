//! Owned element tree over `quick-xml` events, plus the pre-parse fixups the
//! gateway's responses need.
//!
//! The Smile exports are small (a few hundred kB at most) and are queried many
//! times per poll, so they are parsed once into [`Element`] and navigated with
//! plain name/attribute lookups instead of string-built path expressions.

use core::fmt;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum XmlError {
    Syntax(String),
    Unbalanced(String),
    NoRoot,
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XmlError::Syntax(s) => write!(f, "xml syntax error: {}", s),
            XmlError::Unbalanced(s) => write!(f, "unbalanced xml: {}", s),
            XmlError::NoRoot => write!(f, "document has no root element"),
        }
    }
}

impl Error for XmlError {}

/// Escape every `&` that cannot start an entity or character reference.
///
/// Some firmware emits bare ampersands inside names and messages, which no
/// conforming parser accepts. An `&` followed by a letter or `#` is left
/// alone so that `&amp;` and `&#38;` survive untouched.
pub fn escape_illegal_xml_characters(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '&' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some(next) if next.is_ascii_alphabetic() || *next == '#' => out.push('&'),
            Some(_) => out.push_str("&amp;"),
            None => out.push('&'),
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// Parse a complete document and return its root element.
    pub fn parse(raw: &str) -> Result<Element, XmlError> {
        let mut reader = Reader::from_str(raw);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => stack.push(Element::from_start(&start)?),
                Ok(Event::Empty(start)) => {
                    let element = Element::from_start(&start)?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::End(end)) => {
                    let mut element = stack.pop().ok_or_else(|| {
                        XmlError::Unbalanced(format!(
                            "closing tag </{}> without opening tag",
                            String::from_utf8_lossy(end.name().as_ref())
                        ))
                    })?;
                    element.text = element.text.trim().to_string();
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::Text(text)) => {
                    if let Some(top) = stack.last_mut() {
                        let value = text
                            .unescape()
                            .map_err(|e| XmlError::Syntax(format!("at byte {}: {}", reader.buffer_position(), e)))?;
                        top.text.push_str(&value);
                    }
                }
                Ok(Event::CData(data)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(XmlError::Syntax(format!("at byte {}: {}", reader.buffer_position(), e)));
                }
            }
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Unbalanced(format!("element <{}> never closed", open.name)));
        }
        root.ok_or(XmlError::NoRoot)
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Element, XmlError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| XmlError::Syntax(format!("bad attribute on <{}>: {}", name, e)))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| XmlError::Syntax(format!("bad attribute value on <{}>: {}", name, e)))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Element {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    /// Trimmed text content, `None` when empty.
    pub fn text(&self) -> Option<&str> {
        if self.text.is_empty() { None } else { Some(self.text.as_str()) }
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(Element::text)
    }

    /// Every element below this one, in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: vec![self.children.iter()],
        }
    }

    pub fn descendants_named<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        self.descendants().filter(|e| e.name == name).collect()
    }

    pub fn find_descendant(&self, name: &str) -> Option<&Element> {
        self.descendants().find(|e| e.name == name)
    }

    /// All elements reached by following `steps` as direct children from here.
    pub fn path_all<'a>(&'a self, steps: &[&str]) -> Vec<&'a Element> {
        let mut current = vec![self];
        for step in steps {
            current = current
                .into_iter()
                .flat_map(|el| el.children.iter().filter(move |c| c.name == *step))
                .collect();
        }
        current
    }

    pub fn path(&self, steps: &[&str]) -> Option<&Element> {
        self.path_all(steps).into_iter().next()
    }

    /// All matches of `steps` anchored at any descendant named `steps[0]`.
    pub fn descendant_path_all<'a>(&'a self, steps: &[&str]) -> Vec<&'a Element> {
        let Some((first, rest)) = steps.split_first() else {
            return Vec::new();
        };
        self.descendants_named(first)
            .into_iter()
            .flat_map(|anchor| anchor.path_all(rest))
            .collect()
    }

    pub fn descendant_path(&self, steps: &[&str]) -> Option<&Element> {
        self.descendant_path_all(steps).into_iter().next()
    }
}

/// Depth-first walk over a subtree without collecting it.
pub struct Descendants<'a> {
    stack: Vec<std::slice::Iter<'a, Element>>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        loop {
            let level = self.stack.last_mut()?;
            match level.next() {
                Some(el) => {
                    if !el.children.is_empty() {
                        self.stack.push(el.children.iter());
                    }
                    return Some(el);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Escape then parse a raw gateway response.
pub fn parse_gateway_document(raw: &str) -> Result<Element, XmlError> {
    Element::parse(&escape_illegal_xml_characters(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descendants_walk_in_document_order() {
        let doc = Element::parse("<a><b><c/><d><e/></d></b><f/><g><h/></g></a>").expect("parses");
        let names: Vec<&str> = doc.descendants().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["b", "c", "d", "e", "f", "g", "h"]);
        assert_eq!(doc.find_descendant("e").map(|e| e.name.as_str()), Some("e"));
        assert_eq!(Element::parse("<empty/>").expect("parses").descendants().count(), 0);
    }

    #[test]
    fn escapes_bare_ampersands_only() {
        let raw = "A & B <x>1&2</x> &amp; &#38; &lt;";
        assert_eq!(
            escape_illegal_xml_characters(raw),
            "A &amp; B <x>1&amp;2</x> &amp; &#38; &lt;"
        );
    }

    #[test]
    fn escaped_document_parses_and_keeps_entities() {
        let raw = "<root><x>1&2</x><y>a &amp; b</y><z>&#38;</z></root>";
        let doc = parse_gateway_document(raw).expect("escaped document parses");
        assert_eq!(doc.child_text("x"), Some("1&2"));
        assert_eq!(doc.child_text("y"), Some("a & b"));
        assert_eq!(doc.child_text("z"), Some("&"));
    }

    #[test]
    fn bare_ampersand_fails_without_escaping() {
        assert!(Element::parse("<root><x>1&2</x></root>").is_err());
    }

    #[test]
    fn trailing_ampersand_is_left_alone() {
        assert_eq!(escape_illegal_xml_characters("tail&"), "tail&");
    }

    #[test]
    fn navigates_paths_attributes_and_cdata() {
        let raw = r#"<?xml version="1.0"?>
            <domain_objects>
              <rule id="r1"><name><![CDATA[Week & end]]></name><template tag="t" id="tpl"/></rule>
              <location id="l1"><logs><point_log><type>temperature</type>
                <period><measurement log_date="x">20.5</measurement></period></point_log></logs></location>
            </domain_objects>"#;
        let doc = Element::parse(raw).expect("parses");
        assert_eq!(doc.name, "domain_objects");
        let rule = doc.child("rule").expect("rule");
        assert_eq!(rule.id(), Some("r1"));
        assert_eq!(rule.child_text("name"), Some("Week & end"));
        assert_eq!(rule.child("template").and_then(|t| t.attr("tag")), Some("t"));
        let m = doc
            .descendant_path(&["logs", "point_log", "period", "measurement"])
            .expect("measurement");
        assert_eq!(m.text(), Some("20.5"));
        assert_eq!(m.attr("log_date"), Some("x"));
        assert_eq!(doc.path_all(&["location", "logs"]).len(), 1);
    }

    #[test]
    fn rejects_unbalanced_documents() {
        assert!(Element::parse("<a><b></a>").is_err());
        assert_eq!(Element::parse("   "), Err(XmlError::NoRoot));
    }
}
