use std::io::Read;

use xmltree::{self, Element, XMLNode};

use crate::DavError;

pub(crate) const NS_DAV_URI: &str = "DAV:";

pub(crate) trait ElementExt {
    fn parse2<R: Read>(r: R) -> Result<Element, DavError>;
    fn child_elements(&self) -> impl Iterator<Item = &Element>;
    fn is_dav(&self, local: &str) -> bool;
    fn dav_child(&self, local: &str) -> Option<&Element>;
    fn text_content(&self) -> String;
}

impl ElementExt for Element {
    fn parse2<R: Read>(r: R) -> Result<Element, DavError> {
        match Element::parse(r) {
            Ok(elem) => Ok(elem),
            Err(xmltree::ParseError::MalformedXml(_)) => Err(DavError::XmlParseError),
            Err(_) => Err(DavError::XmlReadError),
        }
    }

    fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(XMLNode::as_element)
    }

    // clients are sloppy with namespaces, an element without one is accepted too.
    fn is_dav(&self, local: &str) -> bool {
        self.name == local && self.namespace.as_deref().is_none_or(|ns| ns == NS_DAV_URI)
    }

    fn dav_child(&self, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is_dav(local))
    }

    // all text below this element, concatenated and trimmed.
    fn text_content(&self) -> String {
        fn collect(e: &Element, out: &mut String) {
            for node in &e.children {
                match node {
                    XMLNode::Text(t) | XMLNode::CData(t) => out.push_str(t),
                    XMLNode::Element(c) => collect(c, out),
                    _ => {}
                }
            }
        }
        let mut s = String::new();
        collect(self, &mut s);
        s.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockinfo() {
        let xml = br#"<?xml version="1.0"?>
            <D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:shared/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
              <D:owner><D:href> mailto:alice@example.com </D:href></D:owner>
            </D:lockinfo>"#;
        let root = Element::parse2(&xml[..]).unwrap();
        assert!(root.is_dav("lockinfo"));
        let scope = root.dav_child("lockscope").unwrap();
        assert!(scope.dav_child("shared").is_some());
        assert!(scope.dav_child("exclusive").is_none());
        assert_eq!(root.child_elements().count(), 3);
        assert_eq!(
            root.dav_child("owner").unwrap().text_content(),
            "mailto:alice@example.com"
        );
    }

    #[test]
    fn malformed() {
        assert!(Element::parse2(&b"<a><b></a>"[..]).is_err());
    }
}
