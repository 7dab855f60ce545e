//! Release version detection
//!
//! Mondo releases are identified by their release date. The OWL export
//! carries it in the `owl:versionIRI` of the ontology header, the CSV
//! snapshot in a leading comment line.
use std::cmp::Ordering;
use std::fmt::Display;
use std::io::BufRead;
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, trace};

use crate::parser::owl::{Node, OwlEvent, OwlReader};
use crate::parser::{self, SourceFormat};
use crate::ImportResult;

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("date pattern is a valid regex")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"v\d+(?:\.\d+)+").expect("tag pattern is a valid regex"))
}

/// The generation token of a release
///
/// Dates are compared chronologically, tags by their string value.
/// A date and a tag are compared by their string representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReleaseVersion {
    /// A release date, e.g. `2024-06-04`
    Date(NaiveDate),
    /// A free version tag, e.g. `v2.1.0`
    Tag(String),
}

impl ReleaseVersion {
    /// Extracts a version from a token such as a version IRI
    ///
    /// The first `YYYY-MM-DD` date wins. If the token does not contain
    /// a valid date, the first `vN.N` tag is used.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use g2p_import::ReleaseVersion;
    ///
    /// let version = ReleaseVersion::parse(
    ///     "http://purl.obolibrary.org/obo/mondo/releases/2024-06-04/mondo.owl"
    /// ).unwrap();
    /// assert_eq!(version, ReleaseVersion::Date(NaiveDate::from_ymd_opt(2024, 6, 4).unwrap()));
    ///
    /// assert_eq!(
    ///     ReleaseVersion::parse("mondo v2.1 release").unwrap(),
    ///     ReleaseVersion::Tag("v2.1".to_string())
    /// );
    ///
    /// assert!(ReleaseVersion::parse("latest").is_none());
    /// ```
    pub fn parse(token: &str) -> Option<Self> {
        for caps in date_pattern().captures_iter(token) {
            let year = caps[1].parse::<i32>().ok()?;
            let month = caps[2].parse::<u32>().ok()?;
            let day = caps[3].parse::<u32>().ok()?;
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(ReleaseVersion::Date(date));
            }
            trace!(token, "Ignoring invalid date");
        }
        tag_pattern()
            .find(token)
            .map(|tag| ReleaseVersion::Tag(tag.as_str().to_string()))
    }

    /// Returns the release date, if the version is a date
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            ReleaseVersion::Date(date) => Some(*date),
            ReleaseVersion::Tag(_) => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ReleaseVersion::Date(_) => 0,
            ReleaseVersion::Tag(_) => 1,
        }
    }
}

impl From<NaiveDate> for ReleaseVersion {
    fn from(date: NaiveDate) -> Self {
        ReleaseVersion::Date(date)
    }
}

impl Display for ReleaseVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseVersion::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            ReleaseVersion::Tag(tag) => write!(f, "{tag}"),
        }
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ReleaseVersion::Date(a), ReleaseVersion::Date(b)) => a.cmp(b),
            (ReleaseVersion::Tag(a), ReleaseVersion::Tag(b)) => a.cmp(b),
            _ => self
                .to_string()
                .cmp(&other.to_string())
                .then_with(|| self.rank().cmp(&other.rank())),
        }
    }
}

/// Detects the release version of the file at `path`
///
/// # Errors
///
/// - [`crate::ImportError::CannotOpenFile`] if the file cannot be opened
/// - [`crate::ImportError::Parse`] if the header is malformed
pub fn detect_version<P: AsRef<Path>>(
    path: P,
    format: SourceFormat,
) -> ImportResult<Option<ReleaseVersion>> {
    let reader = parser::open(path)?;
    detect_version_from(reader, format)
}

/// Detects the release version from a buffered reader
///
/// Only the document header is read: the ontology header of the OWL
/// export or the leading comment lines of the CSV snapshot.
///
/// # Errors
///
/// [`crate::ImportError::Parse`] if the header is malformed
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use g2p_import::parser::SourceFormat;
/// use g2p_import::version::detect_version_from;
/// use g2p_import::ReleaseVersion;
///
/// let csv = "##2024-06-04,Mondo gene disease associations\nMONDO:1,Foo,x,HGNC:1\n";
/// let version = detect_version_from(csv.as_bytes(), SourceFormat::Tabular).unwrap();
/// assert_eq!(version, Some(ReleaseVersion::Date(NaiveDate::from_ymd_opt(2024, 6, 4).unwrap())));
/// ```
pub fn detect_version_from<R: BufRead>(
    reader: R,
    format: SourceFormat,
) -> ImportResult<Option<ReleaseVersion>> {
    let version = match format {
        SourceFormat::Hierarchical => owl_version(reader)?,
        SourceFormat::Tabular => tabular_version(reader)?,
    };
    match &version {
        Some(version) => debug!(%version, %format, "Detected release version"),
        None => debug!(%format, "No release version in document header"),
    }
    Ok(version)
}

fn owl_version<R: BufRead>(reader: R) -> ImportResult<Option<ReleaseVersion>> {
    let mut in_header = false;
    for event in OwlReader::new(reader) {
        match event? {
            OwlEvent::NodeStart {
                node: Node::OntologyHeader,
                ..
            } => in_header = true,
            OwlEvent::NodeEnd {
                node: Node::OntologyHeader,
            }
            | OwlEvent::NodeStart {
                node: Node::Entity, ..
            } => break,
            OwlEvent::NodeStart {
                node: Node::VersionIri,
                attributes,
            } if in_header => {
                let resource = attributes.resource.as_deref();
                if let Some(version) = resource.and_then(ReleaseVersion::parse) {
                    return Ok(Some(version));
                }
            }
            OwlEvent::Text {
                node: Node::VersionInfo,
                value,
            } if in_header => {
                if let Some(version) = ReleaseVersion::parse(&value) {
                    return Ok(Some(version));
                }
            }
            _ => (),
        }
    }
    Ok(None)
}

fn tabular_version<R: BufRead>(reader: R) -> ImportResult<Option<ReleaseVersion>> {
    for line in reader.lines() {
        let line = line?;
        if !line.starts_with('#') {
            break;
        }
        let first = line
            .trim_start_matches('#')
            .split(',')
            .next()
            .unwrap_or_default()
            .trim();
        if let Some(version) = ReleaseVersion::parse(first) {
            return Ok(Some(version));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod test {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> ReleaseVersion {
        ReleaseVersion::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn owl(header: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rdf:RDF xmlns:owl="http://www.w3.org/2002/07/owl#"
     xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
     xmlns:rdfs="http://www.w3.org/2000/01/rdf-schema#">
    {header}
    <owl:Class><rdfs:label>Foo</rdfs:label></owl:Class>
</rdf:RDF>"#
        )
    }

    #[test]
    fn parse_dates() {
        assert_eq!(ReleaseVersion::parse("2024-06-04"), Some(date(2024, 6, 4)));
        assert_eq!(
            ReleaseVersion::parse("releases/2023-13-01/and/2023-12-01"),
            Some(date(2023, 12, 1))
        );
    }

    #[test]
    fn parse_tags() {
        assert_eq!(
            ReleaseVersion::parse("version v1.2.3"),
            Some(ReleaseVersion::Tag("v1.2.3".to_string()))
        );
        assert!(ReleaseVersion::parse("v1").is_none());
        assert!(ReleaseVersion::parse("").is_none());
    }

    #[test]
    fn order_of_versions() {
        assert!(date(2024, 6, 4) > date(2024, 5, 30));
        assert!(date(2024, 6, 4) == date(2024, 6, 4));
        assert!(
            ReleaseVersion::Tag("v1.2".to_string()) < ReleaseVersion::Tag("v1.3".to_string())
        );
        assert_eq!(date(2024, 6, 4).max(date(2023, 1, 1)), date(2024, 6, 4));
    }

    #[test]
    fn display_versions() {
        assert_eq!(date(2024, 6, 4).to_string(), "2024-06-04");
        assert_eq!(ReleaseVersion::Tag("v2.0".to_string()).to_string(), "v2.0");
    }

    #[test]
    fn owl_version_iri() {
        let doc = owl(
            r#"<owl:Ontology rdf:about="http://purl.obolibrary.org/obo/mondo.owl">
                <owl:versionIRI rdf:resource="http://purl.obolibrary.org/obo/mondo/releases/2024-06-04/mondo.owl"/>
            </owl:Ontology>"#,
        );
        let version = detect_version_from(doc.as_bytes(), SourceFormat::Hierarchical).unwrap();
        assert_eq!(version, Some(date(2024, 6, 4)));
    }

    #[test]
    fn owl_version_info() {
        let doc = owl(
            r#"<owl:Ontology rdf:about="http://purl.obolibrary.org/obo/mondo.owl">
                <owl:versionInfo>2023-09-12</owl:versionInfo>
            </owl:Ontology>"#,
        );
        let version = detect_version_from(doc.as_bytes(), SourceFormat::Hierarchical).unwrap();
        assert_eq!(version, Some(date(2023, 9, 12)));
    }

    #[test]
    fn owl_without_version() {
        let doc = owl(r#"<owl:Ontology rdf:about="http://purl.obolibrary.org/obo/mondo.owl"/>"#);
        let version = detect_version_from(doc.as_bytes(), SourceFormat::Hierarchical).unwrap();
        assert!(version.is_none());
    }

    #[test]
    fn owl_scan_stops_at_first_entity() {
        // the body is truncated, but it is never reached
        let doc = r#"<rdf:RDF xmlns:owl="http://www.w3.org/2002/07/owl#"
     xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
     <owl:Class><owl:versionInfo>2024-01-01</owl:versionInfo>"#;
        let version = detect_version_from(doc.as_bytes(), SourceFormat::Hierarchical).unwrap();
        assert!(version.is_none());
    }

    #[test]
    fn tabular_comment_lines() {
        let data = "# Mondo gene disease\n##2024-06-04,exported\nMONDO:1,Foo,x,HGNC:1\n";
        let version = detect_version_from(data.as_bytes(), SourceFormat::Tabular).unwrap();
        assert_eq!(version, Some(date(2024, 6, 4)));
    }

    #[test]
    fn tabular_without_comment() {
        let data = "MONDO:1,Foo,x,HGNC:1\n#2024-06-04\n";
        let version = detect_version_from(data.as_bytes(), SourceFormat::Tabular).unwrap();
        assert!(version.is_none());
    }

    #[test]
    fn fixture_versions() {
        assert_eq!(
            detect_version("tests/fixtures/mondo_small.owl", SourceFormat::Hierarchical).unwrap(),
            Some(date(2024, 6, 4))
        );
        assert_eq!(
            detect_version("tests/fixtures/mondo_small.csv", SourceFormat::Tabular).unwrap(),
            Some(date(2024, 6, 4))
        );
    }
}
