//! Reconcile a Mondo release against an in-memory datastore
//!
//! Usage:
//! reconcile_file <mondo.owl|mondo.csv> [import|update] [hgnc_lookup.tsv]
//!
//! The lookup file has tab separated columns: the HGNC identifier, the
//! numerical id of the gene record and optionally the gene symbol. Renames
//! that drop the gene symbol from the disease name are refused. Both
//! reports are written to the current directory.
//!
//! Set `RUST_LOG=debug` for more output.

use std::fs::File;
use std::io::BufWriter;
use std::process;

use g2p_import::parser::tabular::TabularReader;
use g2p_import::reconcile::{write_not_updated_report, write_unresolved_report};
use g2p_import::snapshot::{MemoryStore, RecordId};
use g2p_import::{ImportConfig, Importer, Outcome, RunMode};

fn lookup(path: &str, store: &mut MemoryStore) {
    let file = File::open(path).expect("lookup file cannot be opened");
    for row in TabularReader::with_delimiter(file, b'\t') {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                eprintln!("Invalid lookup file: {err}");
                process::exit(1)
            }
        };
        let identifier = row.field(0).unwrap_or_default().trim();
        if identifier.is_empty() || identifier.starts_with('#') {
            continue;
        }
        let Some(record) = row.field(1) else {
            eprintln!("Missing record id in line {}", row.line());
            process::exit(1)
        };
        let record = RecordId::try_from(record).expect("record id must be numerical");
        store.add_identifier("HGNC", identifier, record);
        if let Some(symbol) = row.field(2).filter(|symbol| !symbol.trim().is_empty()) {
            store.add_gene_symbol("HGNC", identifier, symbol);
        }
    }
}

fn main() {
    simple_logger::init_with_env().expect("logger can be initialized");

    let mut args = std::env::args().skip(1);
    let Some(source) = args.next() else {
        eprintln!("Usage: reconcile_file <mondo.owl|mondo.csv> [import|update] [hgnc_lookup.tsv]");
        process::exit(1)
    };
    let mode = match args.next().as_deref() {
        Some("import") => RunMode::Import,
        None | Some("update") => RunMode::Update,
        Some(other) => {
            eprintln!("Unknown mode {other}, use 'import' or 'update'");
            process::exit(1)
        }
    };

    let mut store = MemoryStore::new();
    if let Some(path) = args.next() {
        lookup(&path, &mut store);
    }

    let config = ImportConfig::default()
        .with_mode(mode)
        .with_gene_in_name(true);
    let importer = Importer::new(config);
    let run = match importer.run(&source, &store) {
        Ok(Outcome::Proposed(run)) => run,
        Ok(Outcome::AlreadyImported(meta)) => {
            println!("Already imported on {}", meta.timestamp());
            return;
        }
        Ok(Outcome::UpToDate { persisted, found }) => {
            println!("Datastore has release {persisted}, document has {found}");
            return;
        }
        Err(err) => {
            eprintln!("Import failed: {err}");
            process::exit(1)
        }
    };

    println!(
        "#Release\t{}",
        run.version()
            .map_or_else(|| "unknown".to_string(), |v| v.to_string())
    );
    println!("#Associations\t{}", run.associations());
    println!("#Summary\t{}", run.reconciliation());
    for op in run.reconciliation().operations() {
        println!("{op}");
    }

    let unresolved = BufWriter::new(File::create("unresolved.tsv").expect("report can be created"));
    write_unresolved_report(run.reconciliation(), unresolved).expect("report can be written");
    let not_updated =
        BufWriter::new(File::create("not_updated.tsv").expect("report can be created"));
    write_not_updated_report(run.reconciliation(), not_updated).expect("report can be written");

    if let Err(err) = run.apply(&mut store) {
        eprintln!("Operations rejected: {err}");
        process::exit(1)
    }
    println!("#Stored\t{}", store.associations().len());
}
