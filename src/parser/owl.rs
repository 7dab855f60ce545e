//! Event reader for the Mondo OWL/RDF export
//!
//! The reader resolves XML namespaces and decodes every element name once
//! into a [`Node`]. Consumers never deal with raw tag strings.
//!
//! # Examples
//!
//! ```
//! use g2p_import::parser::owl::{Node, OwlEvent, OwlReader};
//!
//! let doc = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
//!                       xmlns:rdfs="http://www.w3.org/2000/01/rdf-schema#"
//!                       xmlns:owl="http://www.w3.org/2002/07/owl#">
//!     <owl:Class><rdfs:label>Foo</rdfs:label></owl:Class>
//! </rdf:RDF>"#;
//!
//! let events: Vec<OwlEvent> = OwlReader::new(doc.as_bytes())
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//!
//! assert_eq!(events[3], OwlEvent::Text { node: Node::Label, value: "Foo".to_string() });
//! ```
use std::collections::VecDeque;
use std::fmt::Display;
use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use smallvec::SmallVec;
use tracing::trace;

use crate::{ImportError, ImportResult};

const RDF: &[u8] = b"http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const RDFS: &[u8] = b"http://www.w3.org/2000/01/rdf-schema#";
const OWL: &[u8] = b"http://www.w3.org/2002/07/owl#";
const OBO_IN_OWL: &[u8] = b"http://www.geneontology.org/formats/oboInOwl#";

/// The kinds of elements the extractor cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    /// `rdf:RDF`, the document root
    Root,
    /// `owl:Ontology`, the metadata block of the release
    OntologyHeader,
    /// `owl:versionIRI`
    VersionIri,
    /// `owl:versionInfo`
    VersionInfo,
    /// `owl:Class`, defines one disease
    Entity,
    /// `owl:Restriction`
    Relationship,
    /// `owl:someValuesFrom`, points to the related resource
    RelationshipTarget,
    /// `oboInOwl:id`
    Identifier,
    /// `rdfs:label`
    Label,
    /// `oboInOwl:hasExactSynonym`
    Synonym,
    /// `owl:deprecated`
    Deprecated,
    /// Everything else
    Other,
}

impl Node {
    fn decode(namespace: &ResolveResult, local_name: &[u8]) -> Self {
        let ResolveResult::Bound(Namespace(namespace)) = namespace else {
            return Node::Other;
        };
        match (*namespace, local_name) {
            (RDF, b"RDF") => Node::Root,
            (OWL, b"Ontology") => Node::OntologyHeader,
            (OWL, b"versionIRI") => Node::VersionIri,
            (OWL, b"versionInfo") => Node::VersionInfo,
            (OWL, b"Class") => Node::Entity,
            (OWL, b"Restriction") => Node::Relationship,
            (OWL, b"someValuesFrom") => Node::RelationshipTarget,
            (OWL, b"deprecated") => Node::Deprecated,
            (OBO_IN_OWL, b"id") => Node::Identifier,
            (OBO_IN_OWL, b"hasExactSynonym") => Node::Synonym,
            (RDFS, b"label") => Node::Label,
            _ => Node::Other,
        }
    }

    /// Only the text of these nodes is buffered and reported
    fn carries_text(self) -> bool {
        matches!(
            self,
            Node::VersionInfo | Node::Identifier | Node::Label | Node::Synonym | Node::Deprecated
        )
    }
}

/// The `rdf:` attributes of a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAttributes {
    /// `rdf:about`
    pub about: Option<String>,
    /// `rdf:resource`
    pub resource: Option<String>,
}

/// A single step of the document traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwlEvent {
    /// An element was opened
    NodeStart {
        node: Node,
        attributes: NodeAttributes,
    },
    /// The complete text content of an element, reported right before its `NodeEnd`
    Text { node: Node, value: String },
    /// An element was closed
    NodeEnd { node: Node },
}

/// Forward-only iterator of [`OwlEvent`]s
///
/// Self-closing elements produce a `NodeStart` directly followed by a `NodeEnd`.
/// The iterator stops after the first error, there is no recovery
/// from malformed input.
pub struct OwlReader<R: BufRead> {
    reader: NsReader<R>,
    buf: Vec<u8>,
    stack: SmallVec<[Node; 16]>,
    text: String,
    pending: VecDeque<OwlEvent>,
    done: bool,
}

impl<R: BufRead> OwlReader<R> {
    /// Constructs a new `OwlReader` from a buffered reader
    pub fn new(inner: R) -> Self {
        let mut reader = NsReader::from_reader(inner);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::with_capacity(1024),
            stack: SmallVec::new(),
            text: String::new(),
            pending: VecDeque::with_capacity(2),
            done: false,
        }
    }

    /// The current byte offset in the document
    pub fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    /// Reads from the document until at least one event is pending
    /// or the document is finished
    fn advance(&mut self) -> ImportResult<()> {
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(err) => return Err(parse_error(&self.reader, err)),
            };
            match event {
                Event::Start(start) => {
                    let (node, attributes) = decode_start(&self.reader, &start)?;
                    self.stack.push(node);
                    self.pending
                        .push_back(OwlEvent::NodeStart { node, attributes });
                    return Ok(());
                }
                Event::Empty(start) => {
                    let (node, attributes) = decode_start(&self.reader, &start)?;
                    self.pending
                        .push_back(OwlEvent::NodeStart { node, attributes });
                    self.pending.push_back(OwlEvent::NodeEnd { node });
                    return Ok(());
                }
                Event::Text(text) => {
                    if self.stack.last().is_some_and(|node| node.carries_text()) {
                        let value = text
                            .unescape()
                            .map_err(|err| parse_error(&self.reader, err))?;
                        self.text.push_str(&value);
                    }
                }
                Event::CData(data) => {
                    if self.stack.last().is_some_and(|node| node.carries_text()) {
                        self.text.push_str(&String::from_utf8_lossy(&data));
                    }
                }
                Event::End(_) => {
                    let Some(node) = self.stack.pop() else {
                        return Err(parse_error(
                            &self.reader,
                            "closing tag without opening tag",
                        ));
                    };
                    if node.carries_text() && !self.text.is_empty() {
                        self.pending.push_back(OwlEvent::Text {
                            node,
                            value: std::mem::take(&mut self.text),
                        });
                    }
                    self.pending.push_back(OwlEvent::NodeEnd { node });
                    return Ok(());
                }
                Event::Eof => {
                    if !self.stack.is_empty() {
                        return Err(parse_error(
                            &self.reader,
                            format!(
                                "document ends with {} unclosed elements",
                                self.stack.len()
                            ),
                        ));
                    }
                    trace!("Reached end of document");
                    self.done = true;
                    return Ok(());
                }
                // Declarations, comments, processing instructions, doctype
                _ => (),
            }
        }
    }
}

impl<R: BufRead> Iterator for OwlReader<R> {
    type Item = ImportResult<OwlEvent>;
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.advance() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

fn parse_error<R, E: Display>(reader: &NsReader<R>, err: E) -> ImportError {
    ImportError::Parse {
        offset: reader.buffer_position() as u64,
        message: err.to_string(),
    }
}

fn decode_start<R>(
    reader: &NsReader<R>,
    start: &BytesStart,
) -> ImportResult<(Node, NodeAttributes)> {
    let (namespace, local_name) = reader.resolve_element(start.name());
    let node = Node::decode(&namespace, local_name.as_ref());

    let mut attributes = NodeAttributes::default();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| parse_error(reader, err))?;
        let (namespace, local_name) = reader.resolve_attribute(attr.key);
        if !matches!(namespace, ResolveResult::Bound(Namespace(RDF))) {
            continue;
        }
        match local_name.as_ref() {
            b"about" => {
                let value = attr
                    .unescape_value()
                    .map_err(|err| parse_error(reader, err))?;
                attributes.about = Some(value.into_owned());
            }
            b"resource" => {
                let value = attr
                    .unescape_value()
                    .map_err(|err| parse_error(reader, err))?;
                attributes.resource = Some(value.into_owned());
            }
            _ => (),
        }
    }
    Ok((node, attributes))
}
