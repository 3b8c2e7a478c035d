//! Minimal owned MARCXML tree and the namespace-tolerant tag lookup.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::error::ParseError;

/// Assumed namespace for qualified lookups when the root declares none.
pub const MARC21_NS: &str = "http://www.loc.gov/MARC21/slim";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Name as written, prefix included.
    pub name: String,
    pub namespace: Option<String>,
    pub local_name: String,
    pub attrs: Vec<(String, String)>,
    /// Text before the first child element.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn open(ns: &ResolveResult, start: &BytesStart) -> Result<Self, ParseError> {
        let namespace = match ns {
            ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
            _ => None,
        };
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            attrs.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                attr.unescape_value()?.into_owned(),
            ));
        }
        Ok(Element {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            namespace,
            local_name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attrs,
            text: String::new(),
            children: Vec::new(),
        })
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All elements below this one in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        let mut pending: Vec<&Element> = self.children.iter().rev().collect();
        while let Some(el) = pending.pop() {
            out.push(el);
            pending.extend(el.children.iter().rev());
        }
        out
    }

    fn push_text(&mut self, text: &str) {
        if self.children.is_empty() {
            self.text.push_str(text);
        }
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None if root.is_none() => *root = Some(el),
        None => {}
    }
}

pub fn parse_document(xml: &str) -> Result<Element, ParseError> {
    let mut reader = NsReader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        let (ns, event) = reader.read_resolved_event()?;
        match event {
            Event::Start(e) => stack.push(Element::open(&ns, &e)?),
            Event::Empty(e) => {
                let el = Element::open(&ns, &e)?;
                attach(&mut stack, &mut root, el);
            }
            Event::End(_) => {
                if let Some(el) = stack.pop() {
                    attach(&mut stack, &mut root, el);
                }
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    current.push_text(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.push_text(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Unclosed(open.name.clone()));
    }
    root.ok_or(ParseError::NoRoot)
}

/// How a tag name is matched against an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLookup {
    /// No namespace, exact name.
    Unqualified,
    /// In the document namespace, exact local name.
    Qualified,
    /// Local name ends with the tag, any namespace.
    LocalName,
}

impl TagLookup {
    pub const ORDER: [TagLookup; 3] = [
        TagLookup::Unqualified,
        TagLookup::Qualified,
        TagLookup::LocalName,
    ];

    fn matches(self, el: &Element, tag: &str, ns: &str) -> bool {
        match self {
            TagLookup::Unqualified => el.namespace.is_none() && el.name == tag,
            TagLookup::Qualified => el.namespace.as_deref() == Some(ns) && el.local_name == tag,
            TagLookup::LocalName => el.local_name.ends_with(tag),
        }
    }
}

/// Data fields carrying `tag="<field_tag>"`, with the lookup that found them.
pub fn find_fields<'a>(root: &'a Element, field_tag: &str) -> Option<(TagLookup, Vec<&'a Element>)> {
    let ns = root.namespace.as_deref().unwrap_or(MARC21_NS);
    let all = root.descendants();
    TagLookup::ORDER.into_iter().find_map(|lookup| {
        let fields: Vec<&Element> = all
            .iter()
            .copied()
            .filter(|el| lookup.matches(el, "datafield", ns) && el.attr("tag") == Some(field_tag))
            .collect();
        (!fields.is_empty()).then_some((lookup, fields))
    })
}

/// Subfields of a data field. The local-name fallback searches the whole subtree.
pub fn find_subfields<'a>(field: &'a Element, ns: &str) -> Vec<&'a Element> {
    for lookup in TagLookup::ORDER {
        let candidates: Vec<&Element> = match lookup {
            TagLookup::LocalName => field.descendants(),
            _ => field.children.iter().collect(),
        };
        let found: Vec<&Element> = candidates
            .into_iter()
            .filter(|el| lookup.matches(el, "subfield", ns))
            .collect();
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_resolved_on_tree() {
        let root = parse_document(
            r#"<?xml version="1.0"?>
            <marc:record xmlns:marc="http://www.loc.gov/MARC21/slim">
              <marc:datafield tag="505"><marc:subfield code="a">A &amp; B</marc:subfield></marc:datafield>
            </marc:record>"#,
        )
        .unwrap();
        assert_eq!(root.name, "marc:record");
        assert_eq!(root.local_name, "record");
        assert_eq!(root.namespace.as_deref(), Some(MARC21_NS));
        let sub = &root.children[0].children[0];
        assert_eq!(sub.attr("code"), Some("a"));
        assert_eq!(sub.text, "A & B");
    }

    #[test]
    fn text_stops_at_first_child() {
        let root = parse_document("<a>lead<b>inner</b>tail</a>").unwrap();
        assert_eq!(root.text, "lead");
        assert_eq!(root.children[0].text, "inner");
    }

    #[test]
    fn descendants_in_document_order() {
        let root = parse_document("<r><a><b/></a><c/></r>").unwrap();
        let names: Vec<&str> = root.descendants().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn mismatched_and_unclosed_tags_fail() {
        assert!(parse_document("<r><a></r>").is_err());
        assert!(parse_document("<r><a>").is_err());
        assert!(matches!(parse_document("just text"), Err(ParseError::NoRoot)));
    }

    #[test]
    fn unqualified_lookup_first() {
        let root = parse_document(
            r#"<record><datafield tag="505"><subfield code="a">x</subfield></datafield>
               <datafield tag="245"/></record>"#,
        )
        .unwrap();
        let (lookup, fields) = find_fields(&root, "505").unwrap();
        assert_eq!(lookup, TagLookup::Unqualified);
        assert_eq!(fields.len(), 1);
        assert_eq!(find_subfields(fields[0], MARC21_NS).len(), 1);
    }

    #[test]
    fn qualified_lookup_with_default_namespace() {
        let root = parse_document(
            r#"<record xmlns="http://www.loc.gov/MARC21/slim">
               <datafield tag="505"><subfield code="a">x</subfield></datafield></record>"#,
        )
        .unwrap();
        let (lookup, _) = find_fields(&root, "505").unwrap();
        assert_eq!(lookup, TagLookup::Qualified);
    }

    #[test]
    fn local_name_lookup_for_foreign_namespace() {
        let root = parse_document(
            r#"<record><x:datafield xmlns:x="urn:other" tag="505">
               <x:wrap><x:subfield code="a">deep</x:subfield></x:wrap></x:datafield></record>"#,
        )
        .unwrap();
        let (lookup, fields) = find_fields(&root, "505").unwrap();
        assert_eq!(lookup, TagLookup::LocalName);
        let subs = find_subfields(fields[0], MARC21_NS);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].text, "deep");
    }

    #[test]
    fn no_matching_field() {
        let root = parse_document(r#"<record><datafield tag="245"/></record>"#).unwrap();
        assert!(find_fields(&root, "505").is_none());
    }
}
