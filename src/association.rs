use std::collections::HashMap;
use std::fmt::Display;

/// Strips URI and namespace prefixes from a cross reference
///
/// Gene identifiers show up as full URIs in the OWL export, as URIs in the
/// CSV snapshot and as CURIEs in the datastore. They are always compared in
/// their bare form.
///
/// # Examples
///
/// ```
/// use g2p_import::normalize_cross_ref;
///
/// assert_eq!(normalize_cross_ref("http://identifiers.org/hgnc/6052"), "6052");
/// assert_eq!(normalize_cross_ref("HGNC:6052"), "6052");
/// assert_eq!(normalize_cross_ref(" 6052 "), "6052");
/// ```
pub fn normalize_cross_ref(raw: &str) -> &str {
    let raw = raw.trim();
    let tail = raw.rsplit('/').next().unwrap_or(raw);
    tail.rsplit(':').next().unwrap_or(tail).trim()
}

/// A single gene-disease association
///
/// `primary_id` is the unique key of the association (the disease id),
/// `cross_ref_id` links it to a gene. Several diseases can be linked
/// to the same gene.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Association {
    primary_id: String,
    display_name: String,
    cross_ref_id: String,
}

impl Association {
    /// Constructs a new `Association`
    ///
    /// All values are trimmed and the cross reference is normalized
    /// with [`normalize_cross_ref`].
    ///
    /// Returns `None` if any of the values is empty
    ///
    /// # Examples
    ///
    /// ```
    /// use g2p_import::Association;
    ///
    /// let association = Association::new(
    ///     "MONDO:0011584",
    ///     "IMPDH1-related retinopathy",
    ///     "http://identifiers.org/hgnc/6052"
    /// ).unwrap();
    /// assert_eq!(association.cross_ref_id(), "6052");
    ///
    /// assert!(Association::new("MONDO:0011584", " ", "6052").is_none());
    /// ```
    pub fn new(primary_id: &str, display_name: &str, cross_ref_id: &str) -> Option<Self> {
        let primary_id = primary_id.trim();
        let display_name = display_name.trim();
        let cross_ref_id = normalize_cross_ref(cross_ref_id);
        if primary_id.is_empty() || display_name.is_empty() || cross_ref_id.is_empty() {
            return None;
        }
        Some(Self {
            primary_id: primary_id.to_string(),
            display_name: display_name.to_string(),
            cross_ref_id: cross_ref_id.to_string(),
        })
    }

    /// The disease identifier, e.g. `MONDO:0011584`
    pub fn primary_id(&self) -> &str {
        &self.primary_id
    }

    /// The disease name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The bare gene identifier, e.g. `6052`
    pub fn cross_ref_id(&self) -> &str {
        &self.cross_ref_id
    }
}

impl Display for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{}\t{}",
            self.primary_id, self.display_name, self.cross_ref_id
        )
    }
}

/// An ordered set of [`Association`]s
///
/// Associations keep the order in which they were added, which is the
/// document order when the set is built by the extractor. Each
/// `primary_id` can only be present once, the first association wins.
#[derive(Debug, Default, Clone)]
pub struct AssociationSet {
    associations: Vec<Association>,
    index: HashMap<String, usize>,
}

impl AssociationSet {
    /// Constructs an empty `AssociationSet`
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an association to the set
    ///
    /// Returns `false` if an association with the same `primary_id`
    /// is already present. The set is unchanged in that case.
    pub fn insert(&mut self, association: Association) -> bool {
        if self.index.contains_key(association.primary_id()) {
            return false;
        }
        self.index
            .insert(association.primary_id().to_string(), self.associations.len());
        self.associations.push(association);
        true
    }

    /// Returns the association with the given `primary_id`
    pub fn get(&self, primary_id: &str) -> Option<&Association> {
        self.index
            .get(primary_id)
            .map(|idx| &self.associations[*idx])
    }

    /// Returns `true` if an association with the given `primary_id` is present
    pub fn contains(&self, primary_id: &str) -> bool {
        self.index.contains_key(primary_id)
    }

    /// The number of associations
    pub fn len(&self) -> usize {
        self.associations.len()
    }

    /// Returns `true` if the set has no associations
    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }

    /// Iterates all associations in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Association> {
        self.associations.iter()
    }
}

impl FromIterator<Association> for AssociationSet {
    fn from_iter<T: IntoIterator<Item = Association>>(iter: T) -> Self {
        let mut set = AssociationSet::new();
        for association in iter {
            set.insert(association);
        }
        set
    }
}

impl<'a> IntoIterator for &'a AssociationSet {
    type Item = &'a Association;
    type IntoIter = std::slice::Iter<'a, Association>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
