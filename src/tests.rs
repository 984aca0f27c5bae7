use crate::Library;
use crate::categories::SectionTree;
use crate::config::{Config, LastFilter, LastSearch};
use crate::db::{
    Bibliography, Database, NewDocument, ReadingState, TaxonomyKind, join_file_name, split_file_name,
};
use crate::error::{AppError, Result};
use crate::fileops::{BulkKind, BulkOperation};
use crate::formats::{ExtractedMetadata, MetadataExtractor, OutlineEntry, ThumbnailRenderer, keys};
use crate::import::{ImportMode, ImportOptions};
use crate::search::{SearchCriteria, SearchField, SearchScope};
use crate::store::stored_file_name;
use crate::worker::{CancellationToken, ChannelSink, ItemOutcome, NullSink, ProgressEvent};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

/// Records each render call and whether the source still existed.
#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<(i64, bool)>>,
}

impl ThumbnailRenderer for RecordingRenderer {
    fn render(&self, source: &Path, id: i64, _title: &str) -> Result<()> {
        self.calls.lock().push((id, source.exists()));
        Ok(())
    }
}

/// Returns the same metadata for every file.
#[derive(Default)]
struct StaticExtractor(ExtractedMetadata);

impl MetadataExtractor for StaticExtractor {
    fn extract(&self, _path: &Path) -> Result<ExtractedMetadata> {
        Ok(self.0.clone())
    }
}

struct Fixture {
    dir: TempDir,
    library: Library,
    renderer: Arc<RecordingRenderer>,
}

impl Fixture {
    fn root(&self) -> PathBuf {
        self.dir.path().join("lib")
    }

    fn inbox(&self) -> PathBuf {
        self.dir.path().join("inbox")
    }

    /// Write a source file in the inbox.
    fn source(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.inbox().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn import(&self, sources: &[PathBuf], options: &ImportOptions) -> crate::worker::BatchReport {
        self.library
            .import(sources, options, &CancellationToken::new(), &NullSink)
            .unwrap()
    }

    fn import_one(&self, name: &str, contents: &[u8]) -> i64 {
        let source = self.source(name, contents);
        let report = self.import(&[source], &ImportOptions::default());
        report.completed_ids()[0]
    }
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.library.root = dir.join("lib");
    config.library.covers_root = dir.join("covers");
    config.library.trash_dir = dir.join("trash");
    config.import.pacing_ms = 0;
    config.search.page_size = 3;
    config
}

fn fixture_with(metadata: ExtractedMetadata) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("lib")).unwrap();
    std::fs::create_dir_all(dir.path().join("inbox")).unwrap();

    let renderer = Arc::new(RecordingRenderer::default());
    let library = Library::with_collaborators(
        test_config(dir.path()),
        test_db(),
        Arc::new(StaticExtractor(metadata)),
        renderer.clone(),
    )
    .unwrap();

    Fixture {
        dir,
        library,
        renderer,
    }
}

fn fixture() -> Fixture {
    fixture_with(ExtractedMetadata::default())
}

fn new_doc(name: &str, hash: &str) -> NewDocument {
    NewDocument {
        name: name.to_string(),
        extension: "pdf".to_string(),
        hash: hash.to_string(),
        size: 10,
    }
}

fn files_under(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

// ========== CATALOG ==========

#[test]
fn db_insert_and_get_document() {
    let db = test_db();
    let doc = db.insert_document(&new_doc("notes", "h1")).unwrap();

    let found = db.get_document(doc.id).unwrap().unwrap();
    assert_eq!(found.file_name(), "notes.pdf");
    assert!(found.active);
    assert_eq!(db.get_document_by_hash("h1").unwrap().unwrap().id, doc.id);
    assert!(db.get_document(999).unwrap().is_none());
}

#[test]
fn db_update_document() {
    let db = test_db();
    let mut doc = db.insert_document(&new_doc("draft", "h1")).unwrap();

    doc.name = "final".to_string();
    doc.size = 2048;
    doc.active = false;
    assert!(db.update_document(&doc).unwrap());

    let found = db.get_document(doc.id).unwrap().unwrap();
    assert_eq!(found.file_name(), "final.pdf");
    assert_eq!(found.size, 2048);
    assert!(!found.active);
    assert_eq!(found.hash, "h1");

    doc.id = 999;
    assert!(!db.update_document(&doc).unwrap());
}

#[test]
fn db_duplicate_hash_rejected() {
    let db = test_db();
    db.insert_document(&new_doc("a", "same")).unwrap();

    let err = db.insert_document(&new_doc("b", "same")).unwrap_err();
    assert!(matches!(err, AppError::Duplicate(_)));
    assert_eq!(db.count_documents().unwrap(), 1);
}

#[test]
fn db_delete_document_cascades() {
    let db = test_db();
    let doc = db.insert_document(&new_doc("a", "h")).unwrap();
    let tag = db.create_taxon(TaxonomyKind::Tag, "todo", None).unwrap();
    let chapter = db.add_chapter(doc.id, 1, "Intro", Some(1)).unwrap();
    db.add_section(chapter.id, "Scope", "1.1", None, Some(2))
        .unwrap();
    db.add_membership(TaxonomyKind::Tag, doc.id, tag.id).unwrap();
    db.set_favorite(doc.id, true).unwrap();
    db.save_progress(doc.id, 3, Some(10)).unwrap();
    db.save_bibliography(&Bibliography {
        document_id: doc.id,
        title: Some("A".to_string()),
        ..Default::default()
    })
    .unwrap();

    assert!(db.delete_document(doc.id).unwrap());

    assert!(db.get_bibliography(doc.id).unwrap().is_none());
    assert!(db.list_chapters(doc.id).unwrap().is_empty());
    assert!(db.list_sections(chapter.id).unwrap().is_empty());
    assert!(!db.is_favorite(doc.id).unwrap());
    assert!(db.get_progress(doc.id).unwrap().is_none());
    assert!(db.members_of(TaxonomyKind::Tag, tag.id).unwrap().is_empty());
    assert!(!db.delete_document(doc.id).unwrap());
}

#[test]
fn db_metadata_replaced_as_a_set() {
    let db = test_db();
    let doc = db.insert_document(&new_doc("a", "h")).unwrap();

    let mut first = std::collections::BTreeMap::new();
    first.insert("title".to_string(), "Old".to_string());
    first.insert("pages".to_string(), "10".to_string());
    db.set_metadata(doc.id, &first).unwrap();

    let mut second = std::collections::BTreeMap::new();
    second.insert("title".to_string(), "New".to_string());
    db.set_metadata(doc.id, &second).unwrap();

    assert_eq!(db.get_metadata(doc.id).unwrap(), second);
}

#[test]
fn db_reading_progress_state() {
    let db = test_db();
    let doc = db.insert_document(&new_doc("a", "h")).unwrap();

    assert_eq!(
        db.save_progress(doc.id, 0, Some(100)).unwrap().state(),
        ReadingState::Pending
    );
    assert_eq!(
        db.save_progress(doc.id, 40, None).unwrap().state(),
        ReadingState::InProgress
    );

    // The known total is kept when an update omits it.
    let done = db.save_progress(doc.id, 100, None).unwrap();
    assert_eq!(done.total_pages, Some(100));
    assert_eq!(done.state(), ReadingState::Completed);

    assert_eq!(db.save_progress(doc.id, -5, None).unwrap().current_page, 0);
}

#[test]
fn db_favorites() {
    let db = test_db();
    let a = db.insert_document(&new_doc("a", "h1")).unwrap();
    let b = db.insert_document(&new_doc("b", "h2")).unwrap();

    assert!(db.set_favorite(a.id, true).unwrap());
    assert!(!db.set_favorite(a.id, true).unwrap());
    assert!(db.is_favorite(a.id).unwrap());
    assert!(!db.is_favorite(b.id).unwrap());
    assert_eq!(db.list_favorites().unwrap(), vec![a.id]);

    assert!(db.set_favorite(a.id, false).unwrap());
    assert!(db.list_favorites().unwrap().is_empty());
}

#[test]
fn db_taxonomy_flags_view() {
    let db = test_db();
    let doc = db.insert_document(&new_doc("a", "h")).unwrap();
    let collection = db
        .create_taxon(TaxonomyKind::Collection, "Thesis", None)
        .unwrap();
    let category = db.create_category("Math", None, None).unwrap();

    db.add_membership(TaxonomyKind::Collection, doc.id, collection.id)
        .unwrap();
    db.add_membership(TaxonomyKind::Category, doc.id, category.id)
        .unwrap();
    db.set_favorite(doc.id, true).unwrap();

    let flags = db.taxonomy_flags(doc.id).unwrap().unwrap();
    assert!(flags.in_collection);
    assert!(flags.in_category);
    assert!(flags.favorite);
    assert!(!flags.tagged);
    assert!(!flags.in_group);
    assert!(!flags.has_keywords);
}

#[test]
fn db_membership_is_idempotent() {
    let db = test_db();
    let doc = db.insert_document(&new_doc("a", "h")).unwrap();
    let group = db.create_taxon(TaxonomyKind::Group, "Lab", None).unwrap();

    assert!(db.add_membership(TaxonomyKind::Group, doc.id, group.id).unwrap());
    assert!(!db.add_membership(TaxonomyKind::Group, doc.id, group.id).unwrap());
    assert_eq!(db.memberships_of(TaxonomyKind::Group, doc.id).unwrap(), vec![group.id]);
    assert!(db.remove_membership(TaxonomyKind::Group, doc.id, group.id).unwrap());
    assert!(!db.remove_membership(TaxonomyKind::Group, doc.id, group.id).unwrap());
}

#[test]
fn db_duplicate_taxon_name_is_constraint() {
    let db = test_db();
    db.create_taxon(TaxonomyKind::Keyword, "topology", None)
        .unwrap();
    assert!(matches!(
        db.create_taxon(TaxonomyKind::Keyword, "topology", None),
        Err(AppError::Constraint(_))
    ));
    // Names are unique per taxonomy only.
    assert!(db.create_taxon(TaxonomyKind::Tag, "topology", None).is_ok());
}

#[test]
fn db_file_name_split_round_trips() {
    assert_eq!(split_file_name("a.tar.gz"), ("a.tar".to_string(), "gz".to_string()));
    assert_eq!(split_file_name("notes."), ("notes.".to_string(), String::new()));
    assert_eq!(split_file_name(".bashrc"), (".bashrc".to_string(), String::new()));
    assert_eq!(split_file_name("plain"), ("plain".to_string(), String::new()));

    for name in ["notes.", "a.tar.gz", ".bashrc", "plain", "x..y"] {
        let (stem, ext) = split_file_name(name);
        assert_eq!(join_file_name(&stem, &ext), name);
    }
}

// ========== IMPORT ==========

#[test]
fn import_scenario_notes_pdf_lands_in_shard_and_dedups() {
    let f = fixture();
    for i in 1..42 {
        f.library
            .db
            .insert_document(&new_doc(&format!("filler{}", i), &format!("h{}", i)))
            .unwrap();
    }

    let source = f.source("notes.pdf", b"%PDF-1.4 lecture notes");
    let report = f.import(std::slice::from_ref(&source), &ImportOptions::default());
    assert_eq!(report.completed_ids(), vec![42]);

    let expected = f.root().join("000").join("42_notes.pdf");
    assert!(expected.is_file());
    let doc = f.library.db.get_document(42).unwrap().unwrap();
    assert_eq!(f.library.document_path(&doc), expected);

    // Same bytes again: reported as existing, nothing new on disk or in the catalog.
    let again = f.import(&[source], &ImportOptions::default());
    assert_eq!(again.skipped(), 1);
    assert_eq!(again.items[0].document_id, Some(42));
    assert_eq!(f.library.db.count_documents().unwrap(), 42);
    assert_eq!(files_under(&f.root()), 1);
}

#[test]
fn import_identical_payloads_yield_one_row() {
    let f = fixture();
    let a = f.source("a.pdf", b"identical bytes");
    let b = f.source("b.pdf", b"identical bytes");

    let report = f.import(&[a, b], &ImportOptions::default());
    assert_eq!(report.completed(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(f.library.db.count_documents().unwrap(), 1);
}

#[test]
fn import_move_renders_thumbnail_before_moving() {
    let f = fixture();
    let source = f.source("paper.pdf", b"moved content");

    let options = ImportOptions {
        mode: ImportMode::Move,
        ..Default::default()
    };
    let report = f.import(std::slice::from_ref(&source), &options);
    let id = report.completed_ids()[0];

    assert_eq!(*f.renderer.calls.lock(), vec![(id, true)]);
    assert!(!source.exists());
    assert!(f.root().join("000").join(format!("{}_paper.pdf", id)).is_file());
}

#[test]
fn import_copy_keeps_source_and_renders_from_library() {
    let f = fixture();
    let source = f.source("paper.pdf", b"copied content");

    let report = f.import(std::slice::from_ref(&source), &ImportOptions::default());
    let id = report.completed_ids()[0];

    assert!(source.exists());
    assert_eq!(*f.renderer.calls.lock(), vec![(id, true)]);
}

#[test]
fn import_missing_root_aborts_before_any_change() {
    let f = fixture();
    let source = f.source("a.pdf", b"x");
    std::fs::remove_dir_all(f.root()).unwrap();

    let err = f
        .library
        .import(&[source], &ImportOptions::default(), &CancellationToken::new(), &NullSink)
        .unwrap_err();
    assert!(matches!(err, AppError::NotAvailable(_)));
    assert_eq!(f.library.db.count_documents().unwrap(), 0);
    assert!(!f.root().exists());
}

#[test]
fn import_item_failure_does_not_abort_batch() {
    let f = fixture();
    let first = f.source("first.pdf", b"one");
    let missing = f.inbox().join("missing.pdf");
    let third = f.source("third.pdf", b"three");

    let report = f.import(&[first, missing, third], &ImportOptions::default());
    assert_eq!(report.items.len(), 3);
    assert_eq!(report.items[0].outcome, ItemOutcome::Done);
    assert!(matches!(report.items[1].outcome, ItemOutcome::Failed(_)));
    assert_eq!(report.items[2].outcome, ItemOutcome::Done);
    assert_eq!(f.library.db.count_documents().unwrap(), 2);
}

#[test]
fn import_placement_failure_removes_catalog_row() {
    let f = fixture();
    // The first document gets ID 1; occupy its slot.
    let slot = f.root().join("000");
    std::fs::create_dir_all(&slot).unwrap();
    std::fs::write(slot.join("1_a.pdf"), b"squatter").unwrap();

    let source = f.source("a.pdf", b"real content");
    let report = f.import(&[source], &ImportOptions::default());

    assert!(matches!(report.items[0].outcome, ItemOutcome::Failed(_)));
    assert_eq!(f.library.db.count_documents().unwrap(), 0);
    assert_eq!(std::fs::read(slot.join("1_a.pdf")).unwrap(), b"squatter");
}

#[test]
fn import_placement_and_cleanup_failure_reports_drift() {
    let f = fixture();
    let slot = f.root().join("000");
    std::fs::create_dir_all(&slot).unwrap();
    std::fs::write(slot.join("1_a.pdf"), b"squatter").unwrap();
    f.library.db.reject_document_deletes();

    let source = f.source("a.pdf", b"real content");
    let report = f.import(&[source], &ImportOptions::default());

    assert!(matches!(report.items[0].outcome, ItemOutcome::Drift(_)));
    assert_eq!(report.items[0].document_id, Some(1));
    assert_eq!(report.drifted(), 1);
    assert_eq!(f.library.db.count_documents().unwrap(), 1);
    assert_eq!(std::fs::read(slot.join("1_a.pdf")).unwrap(), b"squatter");
}

#[test]
fn import_trailing_dot_name_round_trips() {
    let f = fixture();
    let id = f.import_one("notes.", b"no extension");

    let doc = f.library.db.get_document(id).unwrap().unwrap();
    assert_eq!(doc.file_name(), "notes.");
    assert!(f.library.document_path(&doc).is_file());
    assert!(f.library.verify().unwrap().is_consistent());

    let dest = f.dir.path().join("export");
    let report = run_bulk(&f, BulkKind::Move { dest: dest.clone() }, true);
    assert_eq!(report.completed_ids(), vec![id]);
    assert!(dest.join("notes.").is_file());
}

#[test]
fn import_stores_metadata_bibliography_and_outline() {
    let mut metadata = ExtractedMetadata::default();
    metadata.set(keys::TITLE, "Linear Algebra");
    metadata.set(keys::AUTHOR, "G. Strang");
    metadata.page_count = Some(120);
    metadata.outline = vec![
        OutlineEntry {
            title: "Vectors".to_string(),
            page: Some(1),
            children: vec![OutlineEntry {
                title: "Dot product".to_string(),
                page: Some(5),
                children: vec![OutlineEntry {
                    title: "Angles".to_string(),
                    page: Some(6),
                    children: Vec::new(),
                }],
            }],
        },
        OutlineEntry {
            title: "Matrices".to_string(),
            page: Some(30),
            children: Vec::new(),
        },
    ];

    let f = fixture_with(metadata);
    let id = f.import_one("la.pdf", b"linear algebra");
    let db = &f.library.db;

    let stored = db.get_metadata(id).unwrap();
    assert_eq!(stored.get("title").map(String::as_str), Some("Linear Algebra"));
    assert_eq!(stored.get("pages").map(String::as_str), Some("120"));

    let bib = db.get_bibliography(id).unwrap().unwrap();
    assert_eq!(bib.authors.as_deref(), Some("G. Strang"));
    assert_eq!(bib.pages, Some(120));

    let chapters = db.list_chapters(id).unwrap();
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0].number, 1);
    assert_eq!(chapters[1].title, "Matrices");

    let tree = SectionTree::load(db, chapters[0].id).unwrap();
    let walked: Vec<(usize, &str, &str)> = tree
        .walk()
        .into_iter()
        .map(|(depth, s)| (depth, s.title.as_str(), s.level.as_str()))
        .collect();
    assert_eq!(
        walked,
        vec![(0, "Dot product", "1.1"), (1, "Angles", "1.1.1")]
    );
}

#[test]
fn import_assigns_category_and_collection() {
    let f = fixture();
    let category = f.library.categories().create("Math", None, None).unwrap();
    let collection = f
        .library
        .db
        .create_taxon(TaxonomyKind::Collection, "Reading list", None)
        .unwrap();

    let source = f.source("a.pdf", b"a");
    let options = ImportOptions {
        category: Some(category.id),
        collection: Some(collection.id),
        ..Default::default()
    };
    let id = f.import(&[source], &options).completed_ids()[0];

    assert!(
        f.library
            .db
            .members_of(TaxonomyKind::Category, category.id)
            .unwrap()
            .contains(&id)
    );
    assert!(
        f.library
            .db
            .members_of(TaxonomyKind::Collection, collection.id)
            .unwrap()
            .contains(&id)
    );
}

#[test]
fn import_cancelled_marks_remaining_items() {
    let f = fixture();
    let a = f.source("a.pdf", b"a");
    let token = CancellationToken::new();
    token.cancel();

    let report = f
        .library
        .import(&[a], &ImportOptions::default(), &token, &NullSink)
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.items[0].outcome, ItemOutcome::NotProcessed);
    assert_eq!(f.library.db.count_documents().unwrap(), 0);
}

// ========== CATEGORIES ==========

#[test]
fn category_scenario_delete_guard() {
    let f = fixture();
    let categories = f.library.categories();

    let math = categories.create("Math", None, None).unwrap();
    let algebra = categories.create("Algebra", Some(math.id), None).unwrap();
    assert_eq!(math.id, 1);
    assert_eq!(algebra.id, 2);

    assert!(matches!(categories.delete(1), Err(AppError::Constraint(_))));
    assert!(categories.delete(2).unwrap());
    assert!(categories.delete(1).unwrap());
    assert!(categories.tree().unwrap().is_empty());
}

#[test]
fn category_children_are_name_ordered() {
    let f = fixture();
    let categories = f.library.categories();
    let root = categories.create("Science", None, None).unwrap();
    categories.create("Physics", Some(root.id), None).unwrap();
    categories.create("Biology", Some(root.id), None).unwrap();
    categories.create("chemistry", Some(root.id), None).unwrap();

    let names: Vec<String> = categories
        .children_of(Some(root.id))
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Biology", "chemistry", "Physics"]);

    let tree = categories.tree().unwrap();
    assert_eq!(tree.children_of(Some(root.id)).len(), 3);
    assert_eq!(tree.walk().len(), 4);
}

#[test]
fn category_reparent_rejects_self_and_cycles() {
    let f = fixture();
    let categories = f.library.categories();
    let a = categories.create("A", None, None).unwrap();
    let b = categories.create("B", Some(a.id), None).unwrap();
    let c = categories.create("C", Some(b.id), None).unwrap();

    assert!(matches!(
        categories.reparent(a.id, Some(a.id)),
        Err(AppError::Constraint(_))
    ));
    assert!(matches!(
        categories.reparent(a.id, Some(c.id)),
        Err(AppError::Constraint(_))
    ));

    assert!(categories.reparent(c.id, None).unwrap());
    assert!(categories.reparent(a.id, Some(c.id)).unwrap());
    let tree = categories.tree().unwrap();
    assert!(tree.is_in_subtree(b.id, c.id));
    assert!(tree.unreachable().is_empty());
}

#[test]
fn category_create_requires_existing_parent() {
    let f = fixture();
    assert!(matches!(
        f.library.categories().create("Orphan", Some(99), None),
        Err(AppError::NotFound(_))
    ));
}

// ========== SEARCH ==========

#[test]
fn search_pagination_and_reset() {
    let f = fixture();
    for i in 0..7 {
        f.import_one(&format!("doc{}.pdf", i), format!("payload {}", i).as_bytes());
    }

    let mut view = f.library.view();
    view.refresh().unwrap();
    assert_eq!(view.total_matches(), 7);
    assert_eq!(view.total_pages(), 3);
    assert_eq!(view.current_rows().len(), 3);

    assert_eq!(view.go_to_page(10), 3);
    assert_eq!(view.current_rows().len(), 1);
    assert_eq!(view.go_to_page(0), 1);

    view.go_to_page(2);
    view.set_criteria(SearchCriteria {
        term: "doc1".to_string(),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(view.page(), 1);
    assert_eq!(view.total_matches(), 1);
    assert_eq!(view.total_pages(), 1);

    view.set_criteria(SearchCriteria {
        term: "nothing matches".to_string(),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(view.total_pages(), 0);
    assert_eq!(view.go_to_page(1), 1);
    assert!(view.current_rows().is_empty());
    assert!(!view.next_page());
}

#[test]
fn search_empty_and_term_share_order() {
    let f = fixture();
    f.import_one("zeta-doc.pdf", b"1");
    f.import_one("Alpha-doc.pdf", b"2");
    f.import_one("mid-doc.pdf", b"3");

    let engine = f.library.search();
    let names = |term: &str| {
        engine
            .search(&SearchCriteria {
                term: term.to_string(),
                ..Default::default()
            })
            .unwrap()
            .iter()
            .map(|d| d.name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(""), vec!["Alpha-doc", "mid-doc", "zeta-doc"]);
    assert_eq!(names("doc"), names(""));
}

#[test]
fn search_taxonomy_filter_intersects_matches() {
    let f = fixture();
    let algebra1 = f.import_one("algebra-notes.pdf", b"1");
    let algebra2 = f.import_one("algebra-exam.pdf", b"2");
    let calculus = f.import_one("calculus.pdf", b"3");

    let db = &f.library.db;
    let tag = db.create_taxon(TaxonomyKind::Tag, "revise", None).unwrap();
    db.add_membership(TaxonomyKind::Tag, algebra1, tag.id).unwrap();
    db.add_membership(TaxonomyKind::Tag, calculus, tag.id).unwrap();

    let engine = f.library.search();
    let scope = SearchScope::Taxonomy {
        kind: TaxonomyKind::Tag,
        id: tag.id,
    };

    let ids = |term: &str| -> Vec<i64> {
        engine
            .search(&SearchCriteria {
                scope,
                field: SearchField::Name,
                term: term.to_string(),
            })
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect()
    };

    assert_eq!(ids("algebra"), vec![algebra1]);
    assert!(!ids("algebra").contains(&algebra2));
    assert!(ids("topology").is_empty());

    let mut all = ids("");
    all.sort();
    assert_eq!(all, vec![algebra1, calculus]);
}

#[test]
fn search_field_resolution_uses_bibliography() {
    let f = fixture();
    let id = f.import_one("scan0001.pdf", b"scan");
    f.library
        .db
        .save_bibliography(&Bibliography {
            document_id: id,
            title: Some("Topology Without Tears".to_string()),
            authors: Some("Sidney Morris".to_string()),
            ..Default::default()
        })
        .unwrap();

    let engine = f.library.search();
    let search = |field: SearchField, term: &str| {
        engine
            .search(&SearchCriteria {
                scope: SearchScope::Catalog,
                field,
                term: term.to_string(),
            })
            .unwrap()
            .len()
    };

    assert_eq!(search(SearchField::Title, "topology"), 1);
    assert_eq!(search(SearchField::Name, "topology"), 0);
    assert_eq!(search(SearchField::All, "morris"), 1);
    assert_eq!(search(SearchField::Author, "scan0001"), 0);
    assert_eq!(search(SearchField::All, "100%"), 0);
}

#[test]
fn search_view_is_stale_until_refresh() {
    let f = fixture();
    f.import_one("a.pdf", b"a");

    let mut view = f.library.view();
    view.refresh().unwrap();
    assert_eq!(view.total_matches(), 1);

    f.import_one("b.pdf", b"b");
    assert_eq!(view.total_matches(), 1);
    view.refresh().unwrap();
    assert_eq!(view.total_matches(), 2);
}

// ========== BULK OPERATIONS ==========

fn run_bulk(f: &Fixture, kind: BulkKind, existing_only: bool) -> crate::worker::BatchReport {
    let mut view = f.library.view();
    view.refresh().unwrap();
    f.library
        .bulk(
            &BulkOperation {
                kind,
                existing_only,
            },
            view.snapshot(),
            &CancellationToken::new(),
            &NullSink,
        )
        .unwrap()
}

#[test]
fn ops_scenario_move_existing_with_one_failure() {
    let f = fixture();
    let a = f.import_one("a.pdf", b"first");
    let b = f.import_one("b.pdf", b"second");
    let c = f.import_one("c.pdf", b"third");

    let dest = f.dir.path().join("export");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("b.pdf"), b"already here").unwrap();

    let mut view = f.library.view();
    view.refresh().unwrap();
    let snapshot = view.snapshot();
    assert_eq!(snapshot.iter().map(|d| d.id).collect::<Vec<_>>(), vec![a, b, c]);

    let report = f
        .library
        .bulk(
            &BulkOperation {
                kind: BulkKind::Move { dest: dest.clone() },
                existing_only: true,
            },
            snapshot,
            &CancellationToken::new(),
            &NullSink,
        )
        .unwrap();

    assert_eq!(report.items.len(), 3);
    assert_eq!(report.items[0].outcome, ItemOutcome::Done);
    assert!(matches!(report.items[1].outcome, ItemOutcome::Failed(_)));
    assert_eq!(report.items[2].outcome, ItemOutcome::Done);
    assert!(report.summary().contains("2 done"));

    view.remove_rows(&report.completed_ids());
    let remaining: Vec<i64> = view.snapshot().iter().map(|d| d.id).collect();
    assert_eq!(remaining, vec![b]);

    let db = &f.library.db;
    assert!(db.get_document(a).unwrap().is_none());
    assert!(db.get_document(c).unwrap().is_none());
    let kept = db.get_document(b).unwrap().unwrap();
    assert!(f.library.document_path(&kept).is_file());
    assert_eq!(std::fs::read(dest.join("a.pdf")).unwrap(), b"first");
    assert_eq!(std::fs::read(dest.join("b.pdf")).unwrap(), b"already here");
}

#[test]
fn ops_delete_removes_files_and_rows() {
    let f = fixture();
    let id = f.import_one("a.pdf", b"a");
    let path = f.root().join("000").join(stored_file_name(id, "a.pdf"));
    assert!(path.is_file());

    let report = run_bulk(&f, BulkKind::Delete, false);
    assert_eq!(report.completed(), 1);
    assert!(!path.exists());
    assert_eq!(f.library.db.count_documents().unwrap(), 0);
    assert_eq!(files_under(&f.root()), 0);
}

#[test]
fn ops_trash_moves_into_trash_dir() {
    let f = fixture();
    let id = f.import_one("a.pdf", b"a");

    let report = run_bulk(&f, BulkKind::Trash, false);
    assert_eq!(report.completed(), 1);
    assert!(
        f.dir
            .path()
            .join("trash")
            .join(stored_file_name(id, "a.pdf"))
            .is_file()
    );
    assert!(f.library.db.get_document(id).unwrap().is_none());
}

#[test]
fn ops_copy_leaves_catalog_untouched() {
    let f = fixture();
    let id = f.import_one("a.pdf", b"a");
    let dest = f.dir.path().join("copies");

    let report = run_bulk(&f, BulkKind::Copy { dest: dest.clone() }, false);
    assert_eq!(report.completed_ids(), vec![id]);
    assert!(dest.join("a.pdf").is_file());
    assert!(f.library.db.get_document(id).unwrap().is_some());
    assert!(!BulkKind::Copy { dest }.removes_rows());
}

#[test]
fn ops_existing_only_skips_missing_files() {
    let f = fixture();
    let present = f.import_one("a.pdf", b"a");
    let ghost = f
        .library
        .db
        .insert_document(&new_doc("ghost", "nohash"))
        .unwrap();

    let report = run_bulk(&f, BulkKind::Delete, true);
    let by_id = |id| {
        report
            .items
            .iter()
            .find(|i| i.document_id == Some(id))
            .map(|i| i.outcome.clone())
    };
    assert_eq!(by_id(present), Some(ItemOutcome::Done));
    assert!(matches!(by_id(ghost.id), Some(ItemOutcome::Skipped(_))));
    assert!(f.library.db.get_document(ghost.id).unwrap().is_some());

    // Without the filter, the catalog row goes even though the file is gone.
    let report = run_bulk(&f, BulkKind::Delete, false);
    assert_eq!(report.completed_ids(), vec![ghost.id]);
    assert_eq!(f.library.db.count_documents().unwrap(), 0);
}

#[test]
fn ops_document_removed_after_snapshot_is_skipped() {
    let f = fixture();
    let id = f.import_one("a.pdf", b"a");

    let mut view = f.library.view();
    view.refresh().unwrap();
    let snapshot = view.snapshot();
    f.library.db.delete_document(id).unwrap();

    let report = f
        .library
        .bulk(
            &BulkOperation {
                kind: BulkKind::Trash,
                existing_only: false,
            },
            snapshot,
            &CancellationToken::new(),
            &NullSink,
        )
        .unwrap();
    assert!(matches!(report.items[0].outcome, ItemOutcome::Skipped(_)));
}

#[test]
fn ops_catalog_failure_restores_file() {
    let f = fixture();
    let id = f.import_one("a.pdf", b"a");
    let doc = f.library.db.get_document(id).unwrap().unwrap();
    f.library.db.reject_document_deletes();

    let dest = f.dir.path().join("export");
    for kind in [BulkKind::Move { dest: dest.clone() }, BulkKind::Trash] {
        let report = run_bulk(&f, kind, false);
        assert!(matches!(report.items[0].outcome, ItemOutcome::Failed(_)));
        assert!(f.library.document_path(&doc).is_file());
        assert!(f.library.db.get_document(id).unwrap().is_some());
    }
    assert_eq!(files_under(&dest), 0);
    assert_eq!(files_under(&f.dir.path().join("trash")), 0);
}

// ========== LIBRARY ==========

#[test]
fn library_start_import_reports_progress() {
    let f = fixture();
    let a = f.source("a.pdf", b"a");
    let b = f.source("b.pdf", b"b");

    let (sink, events) = ChannelSink::new();
    let handle = f
        .library
        .start_import(vec![a, b], ImportOptions::default(), Arc::new(sink))
        .unwrap();
    let report = handle.join().unwrap().unwrap();
    assert_eq!(report.completed(), 2);

    let events: Vec<ProgressEvent> = events.try_iter().collect();
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], ProgressEvent::Started { total: 2, .. }));
    assert!(matches!(&events[2], ProgressEvent::Item { index: 2, name, .. } if name == "b.pdf"));
    assert!(matches!(events[3], ProgressEvent::Finished { .. }));
}

#[test]
fn library_start_import_rejects_missing_root_up_front() {
    let f = fixture();
    std::fs::remove_dir_all(f.root()).unwrap();

    let result = f
        .library
        .start_import(Vec::new(), ImportOptions::default(), Arc::new(NullSink));
    assert!(matches!(result, Err(AppError::NotAvailable(_))));
    assert_eq!(f.library.workers().pending(), 0);
}

#[test]
fn library_rename_moves_file_and_row() {
    let f = fixture();
    let id = f.import_one("draft.pdf", b"draft");
    let old_path = f.root().join("000").join(stored_file_name(id, "draft.pdf"));

    assert!(f.library.rename_document(id, "final.pdf").unwrap());

    let doc = f.library.db.get_document(id).unwrap().unwrap();
    assert_eq!(doc.file_name(), "final.pdf");
    assert!(f.library.document_path(&doc).is_file());
    assert!(!old_path.exists());

    assert!(matches!(
        f.library.rename_document(id, "../escape.pdf"),
        Err(AppError::Constraint(_))
    ));
    assert!(!f.library.rename_document(999, "x.pdf").unwrap());
}

#[test]
fn library_rename_to_trailing_dot_keeps_file_reachable() {
    let f = fixture();
    let id = f.import_one("draft.pdf", b"draft");

    assert!(f.library.rename_document(id, "draft.").unwrap());

    let doc = f.library.db.get_document(id).unwrap().unwrap();
    assert_eq!(doc.file_name(), "draft.");
    assert!(f.library.document_path(&doc).is_file());
    assert!(f.library.verify().unwrap().is_consistent());
}

#[test]
fn library_toggle_active() {
    let f = fixture();
    let id = f.import_one("a.pdf", b"a");

    assert_eq!(f.library.toggle_active(id).unwrap(), Some(false));
    assert_eq!(f.library.toggle_active(id).unwrap(), Some(true));
    assert_eq!(f.library.toggle_active(999).unwrap(), None);
}

#[test]
fn library_verify_reports_missing_and_orphans() {
    let f = fixture();
    let kept = f.import_one("kept.pdf", b"kept");
    let lost = f.import_one("lost.pdf", b"lost");
    let lost_doc = f.library.db.get_document(lost).unwrap().unwrap();
    std::fs::remove_file(f.library.document_path(&lost_doc)).unwrap();

    let stray = f.root().join("000").join("777_stray.pdf");
    std::fs::write(&stray, b"stray").unwrap();

    let report = f.library.verify().unwrap();
    assert_eq!(
        report.missing.iter().map(|d| d.id).collect::<Vec<_>>(),
        vec![lost]
    );
    assert_eq!(report.orphans, vec![stray]);
    assert!(!report.is_consistent());
    assert!(f.library.db.get_document(kept).unwrap().is_some());
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[library]
root = "/srv/library"
covers_root = "/srv/covers"

[workers]
threads = 4

[search]
page_size = 25
"#;

    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.library.root, PathBuf::from("/srv/library"));
    assert_eq!(config.workers.threads, 4);
    assert_eq!(config.workers.max_pending, 8);
    assert_eq!(config.search.page_size, 25);
    assert_eq!(config.import.pacing_ms, 100);
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.database.path, PathBuf::from("data/catalog.db"));
    assert_eq!(config.library.trash_dir, PathBuf::from("data/trash"));
    assert!(config.ui.show_sidebar);
}

#[test]
fn config_remembers_last_search() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config
        .record_search(&SearchCriteria {
            scope: SearchScope::Taxonomy {
                kind: TaxonomyKind::Collection,
                id: 4,
            },
            field: SearchField::Title,
            term: "algebra".to_string(),
        })
        .unwrap();
    config.save(&path).unwrap();

    let view = Config::load(&path).unwrap().view_state();
    assert_eq!(
        view.last_search,
        Some(LastSearch {
            term: "algebra".to_string(),
            field: SearchField::Title,
        })
    );
    assert_eq!(
        view.last_filter,
        Some(LastFilter {
            kind: TaxonomyKind::Collection,
            id: 4,
        })
    );

    // A catalog-wide search clears the filter.
    let mut config = Config::load(&path).unwrap();
    config.record_search(&SearchCriteria::default()).unwrap();
    assert_eq!(config.view_state().last_filter, None);
}
