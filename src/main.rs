//! doclib-rs command line entry point.

use clap::Parser;
use doclib_rs::{
    Library,
    config::{CategoryCommand, Cli, Command, Config, DocCommand, OpsCommand, Selection, TaxonomyCommand},
    db::{Database, Document, TaxonomyKind, timestamp_to_datetime},
    fileops::{BulkKind, BulkOperation},
    import::{ImportMode, collect_sources},
    search::{SearchCriteria, SearchField, SearchScope},
    worker::{BatchReport, ChannelSink, ItemOutcome, ProgressEvent},
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doclib_rs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Import {
            paths,
            move_files,
            category,
            collection,
        }) => cmd_import(config, paths, move_files, category, collection),
        Some(Command::Search {
            field,
            scope,
            page,
            term,
        }) => cmd_search(config, config_path, field, scope, page, term),
        Some(Command::Category { action }) => cmd_category(config, action),
        Some(Command::Taxonomy { action }) => cmd_taxonomy(config, action),
        Some(Command::Doc { action }) => cmd_doc(config, action),
        Some(Command::Ops { action }) => cmd_ops(config, action),
        Some(Command::Verify) => cmd_verify(config),
        None => {
            let library = Library::open(config)?;
            println!(
                "{} documents in {}",
                library.db.count_documents()?,
                library.store().root().display()
            );
            Ok(())
        }
    }
}

/// Initialize config, database and library directories.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    for dir in [
        &config.library.root,
        &config.library.covers_root,
        &config.library.trash_dir,
    ] {
        std::fs::create_dir_all(dir)?;
        println!("Created directory: {}", dir.display());
    }

    println!("\nEdit config.toml to point at your library.");
    println!("Then run: doclib-rs import /path/to/documents");

    Ok(())
}

/// Import files.
fn cmd_import(
    config: Config,
    paths: Vec<PathBuf>,
    move_files: bool,
    category: Option<i64>,
    collection: Option<i64>,
) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let sources = collect_sources(&paths);
    if sources.is_empty() {
        println!("Nothing to import.");
        return Ok(());
    }

    let mut options = library.import_options();
    options.mode = if move_files {
        ImportMode::Move
    } else {
        ImportMode::Copy
    };
    options.category = category;
    options.collection = collection;

    let (sink, events) = ChannelSink::new();
    let handle = library.start_import(sources, options, Arc::new(sink))?;
    drain_progress(events);
    let report = handle.join()??;

    print_report(&report);
    Ok(())
}

/// Search the catalog.
fn cmd_search(
    config: Config,
    config_path: Option<PathBuf>,
    field: SearchField,
    scope: Option<String>,
    page: usize,
    term: String,
) -> anyhow::Result<()> {
    let scope = match scope {
        Some(s) => s.parse::<SearchScope>()?,
        None => SearchScope::Catalog,
    };
    let criteria = SearchCriteria { scope, field, term };

    let mut saved = config.clone();
    let library = Library::open(config)?;
    let mut view = library.view();
    view.set_criteria(criteria.clone())?;
    let shown = view.go_to_page(page);

    if let Some(path) = config_path {
        saved.record_search(&criteria)?;
        if let Err(e) = saved.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remember last search");
        }
    }

    if view.total_matches() == 0 {
        println!("No documents found.");
        return Ok(());
    }

    print_documents(view.current_rows());
    println!(
        "\nPage {}/{} ({} matches)",
        shown,
        view.total_pages(),
        view.total_matches()
    );
    Ok(())
}

/// Category management commands.
fn cmd_category(config: Config, action: CategoryCommand) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let categories = library.categories();

    match action {
        CategoryCommand::Add {
            name,
            parent,
            description,
        } => {
            let category = categories.create(&name, parent, description.as_deref())?;
            println!("Created category: {} (id: {})", category.name, category.id);
        }

        CategoryCommand::Del { id } => {
            if categories.delete(id)? {
                println!("Deleted category: {}", id);
            } else {
                println!("Category not found: {}", id);
            }
        }

        CategoryCommand::List { parent } => {
            let children = categories.children_of(parent)?;
            if children.is_empty() {
                println!("No categories found.");
            } else {
                println!("{:<8} {:<30} DESCRIPTION", "ID", "NAME");
                println!("{}", "-".repeat(80));
                for c in children {
                    println!(
                        "{:<8} {:<30} {}",
                        c.id,
                        c.name,
                        c.description.unwrap_or_default()
                    );
                }
            }
        }

        CategoryCommand::Tree => {
            let tree = categories.tree()?;
            for (depth, c) in tree.walk() {
                println!("{}{} ({})", "  ".repeat(depth), c.name, c.id);
            }
            for c in tree.unreachable() {
                println!("! {} ({}) is not reachable from any root", c.name, c.id);
            }
        }

        CategoryCommand::Move { id, parent } => {
            if categories.reparent(id, parent)? {
                println!("Moved category {} under {:?}", id, parent);
            } else {
                println!("Category not found: {}", id);
            }
        }
    }

    Ok(())
}

/// Flat taxonomy commands.
fn cmd_taxonomy(config: Config, action: TaxonomyCommand) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let db = &library.db;

    match action {
        TaxonomyCommand::Add {
            kind,
            name,
            description,
        } => {
            let taxon = db.create_taxon(kind, &name, description.as_deref())?;
            println!("Created {}: {} (id: {})", kind, taxon.name, taxon.id);
        }

        TaxonomyCommand::Del { kind, id } => {
            if db.delete_taxon(kind, id)? {
                println!("Deleted {}: {}", kind, id);
            } else {
                println!("{} not found: {}", kind, id);
            }
        }

        TaxonomyCommand::List { kind } => {
            let entries = if kind == TaxonomyKind::Category {
                db.list_categories()?
                    .into_iter()
                    .map(|c| (c.id, c.name, c.description))
                    .collect::<Vec<_>>()
            } else {
                db.list_taxa(kind)?
                    .into_iter()
                    .map(|t| (t.id, t.name, t.description))
                    .collect()
            };
            if entries.is_empty() {
                println!("No {} entries found.", kind);
            } else {
                println!("{:<8} {:<30} MEMBERS", "ID", "NAME");
                println!("{}", "-".repeat(60));
                for (id, name, _) in entries {
                    println!("{:<8} {:<30} {}", id, name, db.members_of(kind, id)?.len());
                }
            }
        }

        TaxonomyCommand::Assign { kind, id, document } => {
            if db.add_membership(kind, document, id)? {
                println!("Added document {} to {} {}", document, kind, id);
            } else {
                println!("Document {} already in {} {}", document, kind, id);
            }
        }

        TaxonomyCommand::Unassign { kind, id, document } => {
            if db.remove_membership(kind, document, id)? {
                println!("Removed document {} from {} {}", document, kind, id);
            } else {
                println!("Document {} was not in {} {}", document, kind, id);
            }
        }
    }

    Ok(())
}

/// Single document commands.
fn cmd_doc(config: Config, action: DocCommand) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let db = &library.db;

    match action {
        DocCommand::Show { id } => {
            let Some(doc) = db.get_document(id)? else {
                println!("Document not found: {}", id);
                return Ok(());
            };

            println!("ID:       {}", doc.id);
            println!("File:     {}", library.document_path(&doc).display());
            println!("Hash:     {}", doc.hash);
            println!("Size:     {} bytes", doc.size);
            println!("Active:   {}", if doc.active { "yes" } else { "no" });
            println!(
                "Added:    {}",
                timestamp_to_datetime(doc.created_at).format("%Y-%m-%d %H:%M")
            );

            if let Some(bib) = db.get_bibliography(id)? {
                if let Some(title) = bib.title {
                    println!("Title:    {}", title);
                }
                if let Some(authors) = bib.authors {
                    println!("Authors:  {}", authors);
                }
                if let Some(year) = bib.year {
                    println!("Year:     {}", year);
                }
            }
            if let Some(progress) = db.get_progress(id)? {
                println!(
                    "Progress: page {} of {} ({:?})",
                    progress.current_page,
                    progress
                        .total_pages
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    progress.state()
                );
            }
            if let Some(flags) = db.taxonomy_flags(id)?
                && flags.favorite
            {
                println!("Favorite: yes");
            }
            for (key, value) in db.get_metadata(id)? {
                println!("  {} = {}", key, value);
            }
            for chapter in db.list_chapters(id)? {
                println!("  {}. {}", chapter.number, chapter.title);
            }
        }

        DocCommand::Rename { id, name } => {
            if library.rename_document(id, &name)? {
                println!("Renamed document {} to {}", id, name);
            } else {
                println!("Document not found: {}", id);
            }
        }

        DocCommand::Toggle { id } => match library.toggle_active(id)? {
            Some(active) => println!(
                "Document {} is now {}",
                id,
                if active { "active" } else { "inactive" }
            ),
            None => println!("Document not found: {}", id),
        },

        DocCommand::Favorite { id, off } => {
            db.set_favorite(id, !off)?;
            println!(
                "Document {} {} favorites",
                id,
                if off { "removed from" } else { "added to" }
            );
        }

        DocCommand::Progress { id, page, total } => {
            let progress = db.save_progress(id, page, total)?;
            println!(
                "Document {} at page {} ({:?})",
                id,
                progress.current_page,
                progress.state()
            );
        }
    }

    Ok(())
}

/// Bulk file operations.
fn cmd_ops(config: Config, action: OpsCommand) -> anyhow::Result<()> {
    let (kind, selection) = match action {
        OpsCommand::Copy { to, selection } => (BulkKind::Copy { dest: to }, selection),
        OpsCommand::Move { to, selection } => (BulkKind::Move { dest: to }, selection),
        OpsCommand::Delete { selection } => (BulkKind::Delete, selection),
        OpsCommand::Trash { selection } => (BulkKind::Trash, selection),
    };

    let library = Library::open(config)?;
    let snapshot = select_documents(&library, &selection)?;
    if snapshot.is_empty() {
        println!("No documents selected.");
        return Ok(());
    }

    if kind.is_destructive()
        && !selection.yes
        && !confirm(&format!("{} {} documents?", kind, snapshot.len()))?
    {
        println!("Aborted.");
        return Ok(());
    }

    let operation = BulkOperation {
        kind,
        existing_only: selection.existing_only,
    };
    let (sink, events) = ChannelSink::new();
    let handle = library.start_bulk(operation, snapshot, Arc::new(sink))?;
    drain_progress(events);
    let report = handle.join()??;

    print_report(&report);
    Ok(())
}

/// Compare catalog and library.
fn cmd_verify(config: Config) -> anyhow::Result<()> {
    let library = Library::open(config)?;
    let report = library.verify()?;

    for doc in &report.missing {
        println!("missing  {:<8} {}", doc.id, library.document_path(doc).display());
    }
    for path in &report.orphans {
        println!("orphan   {:<8} {}", "-", path.display());
    }

    if report.is_consistent() {
        println!("Catalog and library are consistent.");
    } else {
        println!(
            "\n{} missing files, {} orphan files",
            report.missing.len(),
            report.orphans.len()
        );
    }
    Ok(())
}

/// Resolve the documents a bulk operation acts on.
fn select_documents(library: &Library, selection: &Selection) -> anyhow::Result<Vec<Document>> {
    if !selection.ids.is_empty() {
        let mut docs = Vec::with_capacity(selection.ids.len());
        for id in &selection.ids {
            match library.db.get_document(*id)? {
                Some(doc) => docs.push(doc),
                None => println!("Skipping unknown document: {}", id),
            }
        }
        return Ok(docs);
    }

    let mut view = library.view();
    view.set_criteria(SearchCriteria {
        term: selection.search.clone().unwrap_or_default(),
        ..Default::default()
    })?;
    Ok(view.snapshot())
}

/// Print progress events until the producing task drops its sink.
fn drain_progress(events: Receiver<ProgressEvent>) {
    for event in events {
        match event {
            ProgressEvent::Started { total, .. } => println!("Processing {} items", total),
            ProgressEvent::Item {
                index, total, name, ..
            } => println!("[{}/{}] {}", index, total, name),
            ProgressEvent::Finished { summary, .. } => println!("{}", summary),
        }
    }
}

fn print_report(report: &BatchReport) {
    for item in &report.items {
        match &item.outcome {
            ItemOutcome::Failed(e) => println!("FAILED    {}: {}", item.name, e),
            ItemOutcome::Drift(e) => println!("DRIFT     {}: {}", item.name, e),
            ItemOutcome::Skipped(reason) => println!("skipped   {}: {}", item.name, reason),
            _ => {}
        }
    }
    println!("Summary: {}", report.summary());
}

fn print_documents(docs: &[Document]) {
    println!("{:<8} {:<50} {:>12}", "ID", "FILE", "SIZE");
    println!("{}", "-".repeat(72));
    for doc in docs {
        println!("{:<8} {:<50} {:>12}", doc.id, doc.file_name(), doc.size);
    }
}

/// Ask for a yes/no confirmation.
fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
