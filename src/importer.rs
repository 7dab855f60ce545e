use std::fmt::Display;
use std::path::Path;

use tracing::{info, warn};

use crate::extractor::read_associations;
use crate::parser::tabular::TabularLayout;
use crate::parser::SourceFormat;
use crate::reconcile::{Reconciler, Reconciliation};
use crate::snapshot::{AssociationStore, MetaRecord, Snapshot, SnapshotSelector, SnapshotSource};
use crate::version::detect_version;
use crate::{ImportError, ImportResult, ReleaseVersion, DEFAULT_DESCRIPTION, DEFAULT_RUN_KEY};

/// How the run treats already persisted associations
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// First import into an empty datastore
    ///
    /// The run is refused if a previous run was recorded. Nothing is
    /// updated or deleted.
    Import,
    /// Bring the persisted associations up to date with a newer release
    #[default]
    Update,
}

impl Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Import => write!(f, "import"),
            RunMode::Update => write!(f, "update"),
        }
    }
}

/// When persisted associations that are missing from a release are deleted
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Never delete, only report them
    Never,
    /// Delete only if the source format is a complete snapshot (CSV)
    #[default]
    CompleteSnapshots,
    /// Always delete
    Always,
}

impl DeletionPolicy {
    /// Returns `true` if deletions are allowed for documents of `format`
    pub fn allows(&self, format: SourceFormat) -> bool {
        match self {
            DeletionPolicy::Never => false,
            DeletionPolicy::CompleteSnapshots => format.is_complete_snapshot(),
            DeletionPolicy::Always => true,
        }
    }
}

/// Settings of an import run
///
/// # Examples
///
/// ```
/// use g2p_import::{DeletionPolicy, ImportConfig, RunMode};
///
/// let config = ImportConfig::default()
///     .with_mode(RunMode::Import)
///     .with_deletions(DeletionPolicy::Never);
///
/// assert_eq!(config.mode(), RunMode::Import);
/// assert_eq!(config.run_key(), "import_gene_disease");
/// ```
#[derive(Debug, Clone)]
pub struct ImportConfig {
    mode: RunMode,
    format: Option<SourceFormat>,
    deletions: DeletionPolicy,
    layout: TabularLayout,
    selector: SnapshotSelector,
    run_key: String,
    description: String,
    gene_in_name: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            format: None,
            deletions: DeletionPolicy::default(),
            layout: TabularLayout::default(),
            selector: SnapshotSelector::default(),
            run_key: DEFAULT_RUN_KEY.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            gene_in_name: false,
        }
    }
}

impl ImportConfig {
    /// Sets the [`RunMode`]
    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Uses `format` instead of detecting it from the file extension
    #[must_use]
    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the [`DeletionPolicy`]
    #[must_use]
    pub fn with_deletions(mut self, deletions: DeletionPolicy) -> Self {
        self.deletions = deletions;
        self
    }

    /// Sets the column layout of CSV snapshots
    #[must_use]
    pub fn with_layout(mut self, layout: TabularLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the [`SnapshotSelector`]
    #[must_use]
    pub fn with_selector(mut self, selector: SnapshotSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Sets the key of the meta record
    #[must_use]
    pub fn with_run_key(mut self, run_key: &str) -> Self {
        self.run_key = run_key.to_string();
        self
    }

    /// Sets the description of the meta record
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Refuse renames whose new name lacks the gene symbol
    ///
    /// See [`Reconciler::require_gene_in_name`]
    #[must_use]
    pub fn with_gene_in_name(mut self, required: bool) -> Self {
        self.gene_in_name = required;
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn format(&self) -> Option<SourceFormat> {
        self.format
    }

    pub fn deletions(&self) -> DeletionPolicy {
        self.deletions
    }

    pub fn layout(&self) -> &TabularLayout {
        &self.layout
    }

    pub fn selector(&self) -> &SnapshotSelector {
        &self.selector
    }

    pub fn run_key(&self) -> &str {
        &self.run_key
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn gene_in_name(&self) -> bool {
        self.gene_in_name
    }
}

/// The result of [`Importer::run`]
#[derive(Debug)]
pub enum Outcome {
    /// Import mode, but a previous run was already recorded
    AlreadyImported(MetaRecord),
    /// The persisted release is the same or newer than the document
    UpToDate {
        persisted: ReleaseVersion,
        found: ReleaseVersion,
    },
    /// Operations that bring the datastore up to date
    Proposed(ImportRun),
}

/// The proposed changes of a run, ready to be applied
#[derive(Debug)]
pub struct ImportRun {
    format: SourceFormat,
    version: Option<ReleaseVersion>,
    associations: usize,
    reconciliation: Reconciliation,
    meta: MetaRecord,
}

impl ImportRun {
    /// The format of the source document
    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// The release version of the source document
    pub fn version(&self) -> Option<&ReleaseVersion> {
        self.version.as_ref()
    }

    /// The number of associations extracted from the document
    pub fn associations(&self) -> usize {
        self.associations
    }

    /// The proposed operations and the audit information
    pub fn reconciliation(&self) -> &Reconciliation {
        &self.reconciliation
    }

    /// The meta record that is written together with the operations
    pub fn meta(&self) -> &MetaRecord {
        &self.meta
    }

    /// Applies all operations and the meta record to `store`
    ///
    /// # Errors
    ///
    /// [`ImportError::Apply`] if the store rejects the operations. The store
    /// is unchanged in that case.
    pub fn apply<S: AssociationStore + ?Sized>(&self, store: &mut S) -> ImportResult<()> {
        store.apply(self.reconciliation.operations(), &self.meta)
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Runs the complete import pipeline for one document
///
/// ```mermaid
/// flowchart LR
///     file[(owl / csv)] --> format[SourceFormat]
///     file --> version[ReleaseVersion]
///     version --> meta{latest meta}
///     meta -- up to date --> stop([Outcome::UpToDate])
///     meta -- newer --> extract[AssociationSet]
///     store[(SnapshotSource)] --> snapshot[Snapshot]
///     extract --> reconcile[Reconciler]
///     snapshot --> reconcile
///     reconcile --> run([Outcome::Proposed])
/// ```
///
/// The importer only reads from the datastore. The proposed operations
/// are applied with [`ImportRun::apply`].
///
/// # Examples
///
/// ```
/// use g2p_import::snapshot::{MemoryStore, RecordId};
/// use g2p_import::{ImportConfig, Importer, Outcome, RunMode};
///
/// let mut store = MemoryStore::new();
/// store.add_identifier("HGNC", "HGNC:6052", RecordId::from(1u64));
///
/// let importer = Importer::new(ImportConfig::default().with_mode(RunMode::Import));
/// let outcome = importer.run("tests/fixtures/mondo_small.csv", &store).unwrap();
///
/// let Outcome::Proposed(run) = outcome else {
///     panic!("nothing imported yet");
/// };
/// run.apply(&mut store).unwrap();
///
/// assert!(matches!(
///     importer.run("tests/fixtures/mondo_small.csv", &store).unwrap(),
///     Outcome::AlreadyImported(_)
/// ));
/// ```
#[derive(Debug, Default, Clone)]
pub struct Importer {
    config: ImportConfig,
}

impl Importer {
    pub fn new(config: ImportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Reads the document at `path` and proposes the operations
    ///
    /// # Errors
    ///
    /// - [`ImportError::UnsupportedFormat`] if the format cannot be detected
    /// - [`ImportError::CannotOpenFile`] if the document cannot be opened
    /// - [`ImportError::VersionNotFound`] in update mode, if the document has no version
    /// - [`ImportError::Parse`] if the document is malformed
    /// - [`ImportError::Snapshot`] or [`ImportError::DuplicatePersistedKey`]
    ///   if the persisted state cannot be loaded
    pub fn run<P, S>(&self, path: P, source: &S) -> ImportResult<Outcome>
    where
        P: AsRef<Path>,
        S: SnapshotSource + ?Sized,
    {
        let path = path.as_ref();
        let config = &self.config;
        let format = match config.format {
            Some(format) => format,
            None => SourceFormat::from_path(path)?,
        };

        let version = detect_version(path, format)?;
        if version.is_none() {
            if config.mode == RunMode::Update {
                return Err(ImportError::VersionNotFound(path.display().to_string()));
            }
            warn!(path = %path.display(), "Importing a document without release version");
        }

        let latest = source.latest_meta(&config.run_key, &config.selector.source_tag)?;
        match (config.mode, latest) {
            (RunMode::Import, Some(meta)) => {
                info!(run_key = meta.run_key(), "Associations were already imported");
                return Ok(Outcome::AlreadyImported(meta));
            }
            (RunMode::Update, Some(meta)) => {
                if let (Some(persisted), Some(found)) = (meta.release_version(), version.as_ref()) {
                    if persisted >= found {
                        info!(%persisted, %found, "Datastore is up to date");
                        return Ok(Outcome::UpToDate {
                            persisted: persisted.clone(),
                            found: found.clone(),
                        });
                    }
                }
            }
            (_, None) => (),
        }

        let associations = read_associations(path, format, &config.layout)?;

        let (snapshot, strict) = match config.mode {
            RunMode::Import => (Snapshot::load_lookup(source, &config.selector)?, false),
            RunMode::Update => (
                Snapshot::load(source, &config.selector)?,
                config.deletions.allows(format),
            ),
        };

        let reconciliation = Reconciler::new(&snapshot)
            .strict_deletions(strict)
            .require_gene_in_name(config.gene_in_name)
            .reconcile(&associations);

        let meta = MetaRecord::new(
            &config.run_key,
            &config.description,
            &config.selector.source_tag,
            version.clone(),
        );

        info!(
            mode = %config.mode,
            %format,
            associations = associations.len(),
            "Import run prepared"
        );
        Ok(Outcome::Proposed(ImportRun {
            format,
            version,
            associations: associations.len(),
            reconciliation,
            meta,
        }))
    }
}
