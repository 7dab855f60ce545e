//! Assembles [`Association`]s from the parser output
//!
//! In the OWL export a disease is defined by an `owl:Class` node that holds
//! the identifier and the label. The gene is often not part of that node,
//! but of an `owl:Restriction` that follows the class as a sibling. The
//! [`Extractor`] therefore remembers the last completed disease and the
//! names of all diseases it has seen, so that facts arriving later can
//! still be attributed.
//!
//! ```text
//! <owl:Class rdf:about="http://purl.obolibrary.org/obo/MONDO_0011584">
//!     <oboInOwl:id>MONDO:0011584</oboInOwl:id>
//!     <rdfs:label>IMPDH1-related retinopathy</rdfs:label>
//! </owl:Class>
//! <owl:Restriction>
//!     <owl:onProperty rdf:resource="http://purl.obolibrary.org/obo/RO_0004003"/>
//!     <owl:someValuesFrom rdf:resource="http://identifiers.org/hgnc/6052"/>
//! </owl:Restriction>
//! ```
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use tracing::{debug, info, trace, warn};

use crate::parser::owl::{Node, OwlEvent, OwlReader};
use crate::parser::tabular::{Row, TabularLayout, TabularReader};
use crate::parser::{self, SourceFormat};
use crate::{
    Association, AssociationSet, ImportError, ImportResult, CROSS_REF_NAMESPACE, OBSOLETE_PREFIX,
};

/// A disease under construction while its entity node is open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationCandidate {
    node_id: usize,
    primary_id: Option<String>,
    display_name: Option<String>,
    synonym: Option<String>,
    cross_ref_id: Option<String>,
    obsolete: bool,
}

impl AssociationCandidate {
    fn new(node_id: usize) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// The ordinal of the entity node in the document
    pub fn node_id(&self) -> usize {
        self.node_id
    }

    /// The disease identifier, if already known
    pub fn primary_id(&self) -> Option<&str> {
        self.primary_id.as_deref()
    }

    /// The name of the disease
    ///
    /// This is the canonical label or, if the node has none, the
    /// first exact synonym
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.synonym.as_deref())
    }

    /// The gene reference, if already known
    pub fn cross_ref_id(&self) -> Option<&str> {
        self.cross_ref_id.as_deref()
    }

    /// Returns `true` if the entity is marked as obsolete
    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    /// Returns `true` if identifier, name and gene are known
    pub fn is_complete(&self) -> bool {
        self.primary_id.is_some() && self.display_name().is_some() && self.cross_ref_id.is_some()
    }

    fn set_text(&mut self, node: Node, value: &str) {
        match node {
            Node::Identifier if self.primary_id.is_none() => {
                self.primary_id = Some(value.to_string());
            }
            Node::Label if self.display_name.is_none() => {
                if value.to_ascii_lowercase().starts_with(OBSOLETE_PREFIX) {
                    self.obsolete = true;
                }
                self.display_name = Some(value.to_string());
            }
            Node::Synonym if self.synonym.is_none() => {
                self.synonym = Some(value.to_string());
            }
            Node::Deprecated if value.eq_ignore_ascii_case("true") => {
                self.obsolete = true;
            }
            _ => (),
        }
    }
}

/// State machine that turns parser output into [`Association`]s
///
/// Every `Extractor` keeps its own state, independent extractions can
/// run side by side.
///
/// # Examples
///
/// ```
/// use g2p_import::extractor::Extractor;
/// use g2p_import::parser::owl::OwlReader;
///
/// let doc = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
///         xmlns:rdfs="http://www.w3.org/2000/01/rdf-schema#"
///         xmlns:owl="http://www.w3.org/2002/07/owl#"
///         xmlns:oboInOwl="http://www.geneontology.org/formats/oboInOwl#">
///     <owl:Class>
///         <oboInOwl:id>MONDO:0011584</oboInOwl:id>
///         <rdfs:label>IMPDH1-related retinopathy</rdfs:label>
///     </owl:Class>
///     <owl:Restriction>
///         <owl:someValuesFrom rdf:resource="http://identifiers.org/hgnc/6052"/>
///     </owl:Restriction>
/// </rdf:RDF>"#;
///
/// let associations: Vec<_> = Extractor::new()
///     .extract_owl(OwlReader::new(doc.as_bytes()))
///     .collect::<Result<_, _>>()
///     .unwrap();
///
/// assert_eq!(associations.len(), 1);
/// assert_eq!(associations[0].primary_id(), "MONDO:0011584");
/// assert_eq!(associations[0].cross_ref_id(), "6052");
/// ```
#[derive(Debug)]
pub struct Extractor {
    active: Option<AssociationCandidate>,
    entity_depth: usize,
    anonymous_entities: usize,
    relationship_depth: usize,
    relationship_cross_ref: Option<String>,
    entities_seen: usize,
    last_primary_id_seen: Option<String>,
    display_name_cache: HashMap<String, String>,
    emitted: HashSet<String>,
    cross_ref_namespace: String,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            active: None,
            entity_depth: 0,
            anonymous_entities: 0,
            relationship_depth: 0,
            relationship_cross_ref: None,
            entities_seen: 0,
            last_primary_id_seen: None,
            display_name_cache: HashMap::new(),
            emitted: HashSet::new(),
            cross_ref_namespace: CROSS_REF_NAMESPACE.to_string(),
        }
    }
}

impl Extractor {
    /// Constructs a new `Extractor` that links diseases to HGNC genes
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the namespace that relationship targets must reference
    /// to be accepted as cross reference
    #[must_use]
    pub fn with_cross_ref_namespace(mut self, namespace: &str) -> Self {
        self.cross_ref_namespace = namespace.to_ascii_lowercase();
        self
    }

    /// The entity node that is currently open
    pub fn active_candidate(&self) -> Option<&AssociationCandidate> {
        self.active.as_ref()
    }

    /// The identifier of the last completed, non-obsolete entity
    pub fn last_primary_id_seen(&self) -> Option<&str> {
        self.last_primary_id_seen.as_deref()
    }

    /// Returns `true` if an association for `primary_id` was already emitted
    pub fn is_emitted(&self, primary_id: &str) -> bool {
        self.emitted.contains(primary_id)
    }

    /// Processes a single [`OwlEvent`]
    ///
    /// Returns an [`Association`] if the event completed one
    pub fn handle(&mut self, event: &OwlEvent) -> Option<Association> {
        match event {
            OwlEvent::NodeStart {
                node: Node::Entity, ..
            } => {
                self.entity_start();
                None
            }
            OwlEvent::NodeEnd { node: Node::Entity } => self.entity_end(),
            // facts inside nested entities are ignored
            _ if self.entity_depth > 1 => None,
            OwlEvent::NodeStart {
                node: Node::Relationship,
                ..
            } => {
                if self.active.is_none() {
                    self.relationship_depth += 1;
                }
                None
            }
            OwlEvent::NodeEnd {
                node: Node::Relationship,
            } => self.relationship_end(),
            OwlEvent::NodeStart {
                node: Node::RelationshipTarget,
                attributes,
            } => {
                if let Some(resource) = attributes.resource.as_deref() {
                    self.relationship_target(resource);
                }
                None
            }
            OwlEvent::Text { node, value } => {
                let value = value.trim();
                if !value.is_empty() {
                    if let Some(candidate) = self.active.as_mut() {
                        candidate.set_text(*node, value);
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Processes a single [`Row`] of the CSV snapshot
    ///
    /// Comment and header rows are ignored. Rows that have an empty
    /// required value are skipped with a warning.
    ///
    /// # Errors
    ///
    /// [`ImportError::Parse`] if the row does not have enough columns
    pub fn handle_row(
        &mut self,
        row: &Row,
        layout: &TabularLayout,
    ) -> ImportResult<Option<Association>> {
        let Some(first) = row.field(0) else {
            return Ok(None);
        };
        if layout.is_marker(first) {
            trace!(line = row.line(), "Ignoring comment or header row");
            return Ok(None);
        }
        if row.fields().len() < layout.min_columns() {
            return Err(ImportError::Parse {
                offset: row.offset(),
                message: format!(
                    "line {} has {} columns, expected at least {}",
                    row.line(),
                    row.fields().len(),
                    layout.min_columns()
                ),
            });
        }
        let (Some(primary_id), Some(name), Some(cross_ref)) = (
            row.field(layout.id_column),
            row.field(layout.name_column),
            row.field(layout.cross_ref_column),
        ) else {
            return Ok(None);
        };
        Ok(self.emit(primary_id, name, cross_ref))
    }

    /// Consumes the extractor and returns an iterator of associations
    /// from OWL events
    pub fn extract_owl<I>(self, events: I) -> Associations<I>
    where
        I: Iterator<Item = ImportResult<OwlEvent>>,
    {
        Associations {
            events,
            extractor: self,
        }
    }

    /// Consumes the extractor and returns an iterator of associations
    /// from CSV rows
    pub fn extract_rows<I>(self, rows: I, layout: TabularLayout) -> RowAssociations<I>
    where
        I: Iterator<Item = ImportResult<Row>>,
    {
        RowAssociations {
            rows,
            layout,
            extractor: self,
        }
    }

    fn entity_start(&mut self) {
        if self.active.is_some() {
            self.entity_depth += 1;
            trace!(depth = self.entity_depth, "Ignoring nested entity");
        } else if self.relationship_depth > 0 {
            // class expression inside a relationship
            self.anonymous_entities += 1;
        } else {
            self.entities_seen += 1;
            self.active = Some(AssociationCandidate::new(self.entities_seen));
            self.entity_depth = 1;
        }
    }

    fn entity_end(&mut self) -> Option<Association> {
        if self.entity_depth > 1 {
            self.entity_depth -= 1;
            return None;
        }
        if self.anonymous_entities > 0 && self.active.is_none() {
            self.anonymous_entities -= 1;
            return None;
        }
        let candidate = self.active.take()?;
        self.entity_depth = 0;

        // entities without an identifier don't affect the attribution
        let primary_id = candidate.primary_id.as_deref()?;

        if candidate.obsolete {
            debug!(primary_id, "Skipping obsolete entity");
            self.last_primary_id_seen = None;
            return None;
        }

        let Some(name) = candidate.display_name() else {
            debug!(primary_id, "Entity without label or synonym");
            self.last_primary_id_seen = None;
            return None;
        };
        if candidate.display_name.is_none() {
            trace!(primary_id, synonym = name, "Using synonym as name");
        }

        self.display_name_cache
            .entry(primary_id.to_string())
            .or_insert_with(|| name.to_string());
        self.last_primary_id_seen = Some(primary_id.to_string());

        let cross_ref = candidate.cross_ref_id.as_deref()?;
        self.emit(primary_id, name, cross_ref)
    }

    fn relationship_target(&mut self, resource: &str) {
        if !resource
            .to_ascii_lowercase()
            .contains(&self.cross_ref_namespace)
        {
            return;
        }
        if self.entity_depth == 1 {
            if let Some(candidate) = self.active.as_mut() {
                candidate.cross_ref_id.get_or_insert_with(|| resource.to_string());
            }
        } else if self.active.is_none() && self.relationship_depth > 0 {
            self.relationship_cross_ref
                .get_or_insert_with(|| resource.to_string());
        }
    }

    fn relationship_end(&mut self) -> Option<Association> {
        if self.active.is_some() || self.relationship_depth == 0 {
            return None;
        }
        self.relationship_depth -= 1;
        if self.relationship_depth > 0 {
            return None;
        }
        let cross_ref = self.relationship_cross_ref.take()?;
        let Some(primary_id) = self.last_primary_id_seen.clone() else {
            trace!(%cross_ref, "No entity to attribute the cross reference to");
            return None;
        };
        let name = self.display_name_cache.get(&primary_id)?.clone();
        self.emit(&primary_id, &name, &cross_ref)
    }

    fn emit(&mut self, primary_id: &str, name: &str, cross_ref: &str) -> Option<Association> {
        let Some(association) = Association::new(primary_id, name, cross_ref) else {
            warn!(primary_id, name, cross_ref, "Skipping incomplete association");
            return None;
        };
        if self.emitted.insert(association.primary_id().to_string()) {
            Some(association)
        } else {
            trace!(primary_id, "Association was already emitted");
            None
        }
    }
}

/// Iterator of [`Association`]s from OWL events
///
/// Created by [`Extractor::extract_owl`]
pub struct Associations<I> {
    events: I,
    extractor: Extractor,
}

impl<I> Iterator for Associations<I>
where
    I: Iterator<Item = ImportResult<OwlEvent>>,
{
    type Item = ImportResult<Association>;
    fn next(&mut self) -> Option<Self::Item> {
        for event in self.events.by_ref() {
            match event {
                Ok(event) => {
                    if let Some(association) = self.extractor.handle(&event) {
                        return Some(Ok(association));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

/// Iterator of [`Association`]s from CSV rows
///
/// Created by [`Extractor::extract_rows`]
pub struct RowAssociations<I> {
    rows: I,
    layout: TabularLayout,
    extractor: Extractor,
}

impl<I> Iterator for RowAssociations<I>
where
    I: Iterator<Item = ImportResult<Row>>,
{
    type Item = ImportResult<Association>;
    fn next(&mut self) -> Option<Self::Item> {
        for row in self.rows.by_ref() {
            let association = row.and_then(|row| self.extractor.handle_row(&row, &self.layout));
            match association {
                Ok(Some(association)) => return Some(Ok(association)),
                Ok(None) => (),
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

/// Reads all associations from the file at `path`
///
/// # Errors
///
/// - [`ImportError::CannotOpenFile`] if the file cannot be opened
/// - [`ImportError::Parse`] if the document is malformed
pub fn read_associations<P: AsRef<Path>>(
    path: P,
    format: SourceFormat,
    layout: &TabularLayout,
) -> ImportResult<AssociationSet> {
    let reader = parser::open(path)?;
    read_associations_from(reader, format, layout)
}

/// Reads all associations from a buffered reader
///
/// # Errors
///
/// [`ImportError::Parse`] if the document is malformed
pub fn read_associations_from<R: BufRead>(
    reader: R,
    format: SourceFormat,
    layout: &TabularLayout,
) -> ImportResult<AssociationSet> {
    let mut associations = AssociationSet::new();
    match format {
        SourceFormat::Hierarchical => {
            for association in Extractor::new().extract_owl(OwlReader::new(reader)) {
                associations.insert(association?);
            }
        }
        SourceFormat::Tabular => {
            let rows = TabularReader::new(reader);
            for association in Extractor::new().extract_rows(rows, layout.clone()) {
                associations.insert(association?);
            }
        }
    }
    info!(
        count = associations.len(),
        %format,
        "Extracted associations"
    );
    Ok(associations)
}
