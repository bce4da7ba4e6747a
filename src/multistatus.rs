//! Incremental XML output for multi-status and lock-discovery bodies.
//!
//! Element names are written as `prefix:local`, the prefix resolved
//! against the namespace table the writer was created with. All
//! namespace declarations go on the first element written.
use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Response, StatusCode};
use xml::EmitterConfig;
use xml::common::XmlVersion;
use xml::name::Name;
use xml::namespace::Namespace;
use xml::writer::{EventWriter, XmlEvent};

use crate::body::Body;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::{MemBuffer, status_line};
use crate::DavResult;

/// How `write_element` writes an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementMode {
    /// `<name>`
    Opening,
    /// `</name>`
    Closing,
    /// `<name></name>`
    NoContent,
}

/// Namespace aware XML writer with an explicit flush.
pub struct MultistatusWriter {
    emitter: EventWriter<MemBuffer>,
    // prefix -> namespace uri
    namespaces: Vec<(String, String)>,
    root_written: bool,
}

impl MultistatusWriter {
    pub fn new(namespaces: &[(&str, &str)]) -> MultistatusWriter {
        let config = EmitterConfig::new()
            .perform_indent(false)
            .write_document_declaration(false)
            // start tags are closed right away, so flush() never
            // leaves a dangling `<tag` behind.
            .normalize_empty_elements(false);
        MultistatusWriter {
            emitter: EventWriter::new_with_config(MemBuffer::new(), config),
            namespaces: namespaces
                .iter()
                .map(|(p, u)| (p.to_string(), u.to_string()))
                .collect(),
            root_written: false,
        }
    }

    /// Writer with `D` bound to `DAV:`.
    pub fn dav() -> MultistatusWriter {
        MultistatusWriter::new(&[("D", "DAV:")])
    }

    /// `<?xml version="1.0" encoding="utf-8"?>`
    pub fn write_xml_header(&mut self) -> DavResult<()> {
        self.emitter.write(XmlEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;
        Ok(())
    }

    fn resolve(&self, name: &str) -> DavResult<(String, String, String)> {
        let (prefix, local) = name
            .split_once(':')
            .ok_or_else(|| DavError::XmlNameError(name.to_string()))?;
        let uri = self
            .namespaces
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, u)| u.clone())
            .ok_or_else(|| DavError::XmlNameError(name.to_string()))?;
        Ok((prefix.to_string(), local.to_string(), uri))
    }

    /// Write an element named `prefix:local`.
    pub fn write_element(&mut self, name: &str, mode: ElementMode) -> DavResult<()> {
        let (prefix, local, uri) = self.resolve(name)?;
        let name = Name {
            local_name: &local,
            namespace: Some(&uri),
            prefix: Some(&prefix),
        };
        self.write_name(name, None, mode)
    }

    /// Write an element by namespace uri. A namespace that is not in the
    /// table is declared as default namespace on the element itself.
    pub fn write_element_ns(&mut self, namespace: &str, local: &str, mode: ElementMode) -> DavResult<()> {
        let prefix = self
            .namespaces
            .iter()
            .find(|(_, u)| u == namespace)
            .map(|(p, _)| p.clone());
        match prefix {
            Some(prefix) => {
                let name = Name {
                    local_name: local,
                    namespace: Some(namespace),
                    prefix: Some(&prefix),
                };
                self.write_name(name, None, mode)
            }
            None => {
                let name = Name {
                    local_name: local,
                    namespace: Some(namespace),
                    prefix: None,
                };
                self.write_name(name, Some(namespace), mode)
            }
        }
    }

    fn write_name(&mut self, name: Name<'_>, default_ns: Option<&str>, mode: ElementMode) -> DavResult<()> {
        if mode != ElementMode::Closing {
            let mut ns = Namespace::empty();
            if !self.root_written {
                for (p, u) in &self.namespaces {
                    ns.put(p.as_str(), u.as_str());
                }
                self.root_written = true;
            }
            if let Some(d) = default_ns {
                ns.put(xml::namespace::NS_NO_PREFIX, d);
            }
            self.emitter.write(XmlEvent::StartElement {
                name,
                attributes: Vec::new().into(),
                namespace: std::borrow::Cow::Owned(ns),
            })?;
        }
        if mode != ElementMode::Opening {
            self.emitter.write(XmlEvent::EndElement { name: Some(name) })?;
        }
        Ok(())
    }

    /// Escaped character data.
    pub fn write_text(&mut self, text: &str) -> DavResult<()> {
        self.emitter.write(XmlEvent::Characters(text))?;
        Ok(())
    }

    /// Text wrapped in a CDATA section.
    pub fn write_data(&mut self, data: &str) -> DavResult<()> {
        self.emitter.write(XmlEvent::CData(data))?;
        Ok(())
    }

    /// `<name>value</name>`, or `<name></name>` without a value.
    pub fn write_property(&mut self, name: &str, value: Option<&str>) -> DavResult<()> {
        match value {
            Some(v) => {
                self.write_element(name, ElementMode::Opening)?;
                self.write_text(v)?;
                self.write_element(name, ElementMode::Closing)
            }
            None => self.write_element(name, ElementMode::NoContent),
        }
    }

    /// Take what has been written so far. The buffer starts out empty again.
    /// Safe between any two events.
    pub fn flush(&mut self) -> Bytes {
        self.emitter.inner_mut().take()
    }
}

/// Per-path failures collected during a tree-wide operation.
#[derive(Debug, Default, Clone)]
pub struct ErrorList(Vec<(DavPath, StatusCode)>);

impl ErrorList {
    pub fn new() -> ErrorList {
        ErrorList(Vec::new())
    }

    pub fn add(&mut self, path: &DavPath, status: StatusCode) {
        debug!("errorlist: {} {}", path, status);
        self.0.push((path.clone(), status));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DavPath, StatusCode)> {
        self.0.iter()
    }

    /// Render as a 207 multi-status response.
    pub(crate) fn into_response(self) -> DavResult<Response<Body>> {
        let mut w = MultistatusWriter::dav();
        w.write_xml_header()?;
        w.write_element("D:multistatus", ElementMode::Opening)?;
        for (path, status) in &self.0 {
            w.write_element("D:response", ElementMode::Opening)?;
            w.write_property("D:href", Some(&path.as_url_string_with_prefix()))?;
            w.write_property("D:status", Some(&status_line(*status)))?;
            w.write_element("D:response", ElementMode::Closing)?;
        }
        w.write_element("D:multistatus", ElementMode::Closing)?;
        Ok(multistatus(w.flush()))
    }
}

// 207 response with an xml body.
pub(crate) fn multistatus(body: Bytes) -> Response<Body> {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = StatusCode::MULTI_STATUS;
    resp.headers_mut().typed_insert(davheaders::ContentType(
        "application/xml; charset=utf-8".to_owned(),
    ));
    resp
}
