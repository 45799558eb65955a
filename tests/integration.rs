//! Library-level pipeline tests.
//!
//! Each test builds a project layout in a temp directory (config, schema
//! files, query files), runs the pipeline through the public API, and
//! asserts on the summary, diagnostics, and written files.

use std::path::PathBuf;

use db_catalyst::pipeline::{
    CancellationToken, Hooks, Pipeline, PipelineCaches, PipelineError, RunOptions, Stage,
    WriteAction,
};
use db_catalyst::{SemanticType, config};

struct Project {
    _tmp: tempfile::TempDir,
    root: PathBuf,
}

impl Project {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().to_path_buf();
        std::fs::create_dir_all(root.join("schema")).unwrap();
        std::fs::create_dir_all(root.join("queries")).unwrap();
        Self { _tmp: tmp, root }
    }

    fn write(&self, rel: &str, contents: &str) -> &Self {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
        self
    }

    fn config_path(&self) -> PathBuf {
        self.root.join("db-catalyst.toml")
    }

    fn with_default_config(self) -> Self {
        self.write("db-catalyst.toml", "package = \"db\"\nout = \"gen\"\n");
        self
    }

    fn out_dir(&self) -> PathBuf {
        self.root.join("gen")
    }
}

const USERS_SCHEMA: &str =
    "CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);\n";

fn run_project(project: &Project, options: RunOptions) -> (db_catalyst::Summary, Option<PipelineError>) {
    let (plan, _) = config::load(&project.config_path(), false).expect("config");
    let caches = PipelineCaches::default();
    Pipeline::new(&plan, options, &caches).run()
}

#[test]
fn test_get_user_scenario() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/users.sql",
        "-- name: GetUser :one\nSELECT id, name, email FROM users WHERE id = ?1;\n",
    );

    let (summary, error) = run_project(
        &project,
        RunOptions {
            list_queries: true,
            ..Default::default()
        },
    );
    assert!(error.is_none(), "{error:?} / {:?}", summary.diagnostics);

    let query = &summary.analyses[0].queries[0];
    assert_eq!(query.name, "GetUser");
    assert_eq!(query.params.len(), 1);
    assert_eq!(query.params[0].semantic_type, SemanticType::Integer);
    assert!(!query.params[0].nullable);

    let columns: Vec<(&str, bool)> = query
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.nullable))
        .collect();
    assert_eq!(
        columns,
        vec![("id", false), ("name", false), ("email", true)]
    );
}

#[test]
fn test_left_join_nullability_scenario() {
    let project = Project::new().with_default_config();
    project
        .write("schema/users.sql", USERS_SCHEMA)
        .write(
            "schema/posts.sql",
            "CREATE TABLE posts(id INTEGER PRIMARY KEY, user_id INTEGER NOT NULL, title TEXT NOT NULL);\n",
        )
        .write(
            "queries/posts.sql",
            "-- name: PostsWithAuthor :many\nSELECT p.title, u.name FROM posts p LEFT JOIN users u ON u.id = p.user_id;\n",
        );

    let (summary, error) = run_project(
        &project,
        RunOptions {
            list_queries: true,
            ..Default::default()
        },
    );
    assert!(error.is_none(), "{:?}", summary.diagnostics);
    let query = &summary.analyses[0].queries[0];
    assert!(!query.columns[0].nullable, "title stays NOT NULL");
    assert!(query.columns[1].nullable, "left join nullifies u.name");
}

#[test]
fn test_slice_param_scenario() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/users.sql",
        "-- name: ByIds :many\nSELECT id FROM users WHERE id IN (/*SLICE:ids*/);\n",
    );

    let (summary, error) = run_project(
        &project,
        RunOptions {
            list_queries: true,
            ..Default::default()
        },
    );
    assert!(error.is_none());
    let query = &summary.analyses[0].queries[0];
    assert_eq!(query.params.len(), 1);
    assert_eq!(query.params[0].name, "ids");
    assert!(query.params[0].is_variadic);
    assert_eq!(query.params[0].semantic_type, SemanticType::Integer);
}

#[test]
fn test_duplicate_table_across_files_is_error() {
    let project = Project::new().with_default_config();
    project
        .write("schema/a.sql", USERS_SCHEMA)
        .write("schema/b.sql", "CREATE TABLE users(id INTEGER);\n")
        .write(
            "queries/q.sql",
            "-- name: All :many\nSELECT id FROM users;\n",
        );

    let (summary, error) = run_project(&project, RunOptions::default());
    match error {
        Some(PipelineError::Diagnostics(first)) => {
            assert!(first.message.contains("already defined"), "{first}");
            // The diagnostic lands on the second definition and points back
            // at the first one's location.
            assert!(first.path.ends_with("b.sql"));
            assert!(first.message.contains("a.sql"));
        }
        other => panic!("expected DiagnosticsError, got {other:?}"),
    }
    assert!(!summary.diagnostics.is_empty());
}

#[test]
fn test_sql_before_first_marker_is_error() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/q.sql",
        "SELECT 1;\n-- name: All :many\nSELECT id FROM users;\n",
    );

    let (_, error) = run_project(&project, RunOptions::default());
    match error {
        Some(PipelineError::Diagnostics(first)) => {
            assert!(first.message.contains("marker"), "{first}");
        }
        other => panic!("expected DiagnosticsError, got {other:?}"),
    }
}

#[test]
fn test_write_then_idempotent_rerun() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/users.sql",
        "-- name: GetUser :one\nSELECT id, name, email FROM users WHERE id = ?1;\n",
    );

    let (first, error) = run_project(&project, RunOptions::default());
    assert!(error.is_none(), "{:?}", first.diagnostics);
    assert!(first.written > 0);
    assert!(project.out_dir().join("models.go").exists());
    assert!(project.out_dir().join("db.go").exists());
    assert!(project.out_dir().join("users.sql.go").exists());

    // A second run with identical inputs writes nothing.
    let (second, error) = run_project(&project, RunOptions::default());
    assert!(error.is_none());
    assert_eq!(second.written, 0);
    assert!(
        second.files.iter().all(|f| f.action == WriteAction::Skip),
        "{:?}",
        second.files
    );
}

#[test]
fn test_dry_run_matches_write_run_file_list() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/users.sql",
        "-- name: GetUser :one\nSELECT id FROM users WHERE id = ?1;\n",
    );

    let (dry, error) = run_project(
        &project,
        RunOptions {
            dry_run: true,
            ..Default::default()
        },
    );
    assert!(error.is_none());
    assert!(!dry.files.is_empty());
    assert!(
        !project.out_dir().exists(),
        "dry-run must not touch the filesystem"
    );

    let (wet, error) = run_project(&project, RunOptions::default());
    assert!(error.is_none());
    let dry_paths: Vec<_> = dry.files.iter().map(|f| &f.path).collect();
    let wet_paths: Vec<_> = wet.files.iter().map(|f| &f.path).collect();
    assert_eq!(dry_paths, wet_paths);
}

#[test]
fn test_deterministic_output_bytes() {
    let make = || {
        let project = Project::new().with_default_config();
        project
            .write("schema/users.sql", USERS_SCHEMA)
            .write(
                "queries/users.sql",
                "-- name: GetUser :one\nSELECT id, name FROM users WHERE id = ?1;\n",
            );
        let (_, error) = run_project(&project, RunOptions::default());
        assert!(error.is_none());
        std::fs::read(project.out_dir().join("users.sql.go")).unwrap()
    };
    assert_eq!(make(), make());
}

#[test]
fn test_glob_no_match_is_diagnostic_error() {
    let project = Project::new();
    project.write(
        "db-catalyst.toml",
        "package = \"db\"\nschemas = [\"missing/*.sql\"]\n",
    );

    let (summary, error) = run_project(&project, RunOptions::default());
    assert!(matches!(error, Some(PipelineError::Diagnostics(_))));
    assert!(
        summary
            .diagnostics
            .iter()
            .any(|d| d.message.contains("missing/*.sql"))
    );
}

#[test]
fn test_warnings_alone_do_not_fail() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/q.sql",
        "-- name: Odd :unknown\nSELECT id FROM users;\n",
    );

    let (summary, error) = run_project(&project, RunOptions::default());
    assert!(error.is_none(), "{:?}", summary.diagnostics);
    assert!(
        summary
            .diagnostics
            .iter()
            .any(|d| d.message.contains(":unknown") || d.message.contains("unknown command"))
    );
}

#[test]
fn test_hook_error_aborts() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/users.sql",
        "-- name: GetUser :one\nSELECT id FROM users WHERE id = ?1;\n",
    );

    let (plan, _) = config::load(&project.config_path(), false).unwrap();
    let caches = PipelineCaches::default();
    let mut hooks = Hooks::new();
    hooks.before(
        Stage::Generate,
        Box::new(|| Err("refused by test hook".to_string())),
    );
    let (summary, error) = Pipeline::new(&plan, RunOptions::default(), &caches)
        .with_hooks(hooks)
        .run();

    assert!(matches!(error, Some(PipelineError::Hook { .. })));
    assert!(
        summary
            .diagnostics
            .iter()
            .any(|d| d.message.contains("refused by test hook"))
    );
    assert!(!project.out_dir().exists(), "no files written after abort");
}

#[test]
fn test_cancellation_surfaces_as_canceled() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/users.sql",
        "-- name: GetUser :one\nSELECT id FROM users WHERE id = ?1;\n",
    );

    let (plan, _) = config::load(&project.config_path(), false).unwrap();
    let caches = PipelineCaches::default();
    let token = CancellationToken::new();
    token.cancel();
    let (_, error) = Pipeline::new(&plan, RunOptions::default(), &caches)
        .with_cancellation(token)
        .run();
    assert!(matches!(error, Some(PipelineError::Canceled)));
    assert!(!project.out_dir().exists());
}

#[test]
fn test_custom_type_substitution_end_to_end() {
    let project = Project::new();
    project
        .write(
            "db-catalyst.toml",
            "package = \"db\"\nout = \"gen\"\n\n[[custom_types.mapping]]\ncustom_type = \"status_t\"\nsqlite_type = \"TEXT\"\n",
        )
        .write(
            "schema/jobs.sql",
            "CREATE TABLE jobs(id INTEGER PRIMARY KEY, status status_t NOT NULL);\n",
        )
        .write(
            "queries/jobs.sql",
            "-- name: JobStatus :one\nSELECT status FROM jobs WHERE id = ?1;\n",
        );

    let (summary, error) = run_project(
        &project,
        RunOptions {
            list_queries: true,
            ..Default::default()
        },
    );
    assert!(error.is_none(), "{:?}", summary.diagnostics);
    let query = &summary.analyses[0].queries[0];
    assert_eq!(query.columns[0].semantic_type, SemanticType::Text);
}

#[test]
fn test_unknown_custom_type_is_error() {
    let project = Project::new().with_default_config();
    project
        .write(
            "schema/jobs.sql",
            "CREATE TABLE jobs(id INTEGER PRIMARY KEY, status status_t);\n",
        )
        .write(
            "queries/jobs.sql",
            "-- name: J :one\nSELECT id FROM jobs;\n",
        );

    let (_, error) = run_project(&project, RunOptions::default());
    match error {
        Some(PipelineError::Diagnostics(first)) => {
            assert!(first.message.contains("status_t"), "{first}");
        }
        other => panic!("expected DiagnosticsError, got {other:?}"),
    }
}

#[test]
fn test_view_resolves_in_queries() {
    let project = Project::new().with_default_config();
    project
        .write(
            "schema/users.sql",
            "CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);\n\
             CREATE VIEW user_names AS SELECT id, name FROM users;\n",
        )
        .write(
            "queries/q.sql",
            "-- name: Names :many\nSELECT name FROM user_names;\n",
        );

    let (summary, error) = run_project(
        &project,
        RunOptions {
            list_queries: true,
            ..Default::default()
        },
    );
    assert!(error.is_none(), "{:?}", summary.diagnostics);
    let query = &summary.analyses[0].queries[0];
    assert_eq!(query.columns[0].semantic_type, SemanticType::Text);
    assert!(!query.columns[0].nullable);
}

#[test]
fn test_diagnostics_have_valid_positions() {
    let project = Project::new().with_default_config();
    project
        .write("schema/bad.sql", "CREATE TABLE t(a INTEGER, a TEXT);\n")
        .write(
            "queries/bad.sql",
            "-- name: Q :one\nSELECT nope FROM missing;\n",
        );

    let (summary, _) = run_project(&project, RunOptions::default());
    assert!(!summary.diagnostics.is_empty());
    for d in &summary.diagnostics {
        assert!(d.line >= 1, "{d:?}");
        assert!(d.column >= 1, "{d:?}");
        assert!(!d.path.is_empty(), "{d:?}");
        assert!(!d.message.is_empty(), "{d:?}");
    }
}

#[test]
fn test_generated_go_mentions_query_names() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/users.sql",
        "-- name: GetUser :one\nSELECT id, name, email FROM users WHERE id = ?1;\n\
         -- name: ListUsers :many\nSELECT id, name FROM users ORDER BY id;\n\
         -- name: DeleteUser :exec\nDELETE FROM users WHERE id = ?1;\n",
    );

    let (summary, error) = run_project(&project, RunOptions::default());
    assert!(error.is_none(), "{:?}", summary.diagnostics);
    let generated = std::fs::read_to_string(project.out_dir().join("users.sql.go")).unwrap();
    assert!(generated.contains("func (q *Queries) GetUser"));
    assert!(generated.contains("func (q *Queries) ListUsers"));
    assert!(generated.contains("func (q *Queries) DeleteUser"));
    let models = std::fs::read_to_string(project.out_dir().join("models.go")).unwrap();
    assert!(models.contains("type Users struct"));
}

#[test]
fn test_if_not_exists_preserves_files() {
    let project = Project::new().with_default_config();
    project.write("schema/users.sql", USERS_SCHEMA).write(
        "queries/users.sql",
        "-- name: GetUser :one\nSELECT id FROM users WHERE id = ?1;\n",
    );
    std::fs::create_dir_all(project.out_dir()).unwrap();
    std::fs::write(project.out_dir().join("models.go"), "hands off").unwrap();

    let (summary, error) = run_project(
        &project,
        RunOptions {
            if_not_exists: true,
            ..Default::default()
        },
    );
    assert!(error.is_none(), "{:?}", summary.diagnostics);
    assert_eq!(
        std::fs::read_to_string(project.out_dir().join("models.go")).unwrap(),
        "hands off"
    );
    // Files that did not exist yet are still produced.
    assert!(project.out_dir().join("db.go").exists());
}
