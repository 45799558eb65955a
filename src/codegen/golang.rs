//! Go backend
//!
//! Emits `models.go` (one struct per table and view), `db.go` (DBTX
//! interface and Queries), and one `<file>.sql.go` per query file with the
//! embedded SQL, parameter/row structs, and a method per query. Output is
//! deterministic for identical input.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::analyzer::{AnalysisResult, ResultColumn, ResultParam};
use crate::catalog::Catalog;
use crate::codegen::{CodeGenerator, FileAnalyses, GenOptions, GeneratedFile};
use crate::diagnostics::Diagnostic;
use crate::input::slicer::Command;
use crate::types::{LanguageMapper, LanguageType, SemanticType};

pub struct GoCodegen {
    options: GenOptions,
}

impl GoCodegen {
    pub fn new(options: GenOptions) -> Self {
        Self { options }
    }
}

impl CodeGenerator for GoCodegen {
    fn generate(
        &self,
        catalog: &Catalog,
        analyses: &[FileAnalyses],
    ) -> (Vec<GeneratedFile>, Vec<Diagnostic>) {
        let mut files = Vec::new();
        let diagnostics = Vec::new();

        files.push(GeneratedFile {
            name: "models.go".to_string(),
            contents: self.render_models(catalog).into_bytes(),
        });
        files.push(GeneratedFile {
            name: "db.go".to_string(),
            contents: self.render_db().into_bytes(),
        });
        for file in analyses {
            let stem = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "queries.sql".to_string());
            files.push(GeneratedFile {
                name: format!("{stem}.go"),
                contents: self.render_queries(&stem, &file.queries).into_bytes(),
            });
        }
        (files, diagnostics)
    }
}

/// Semantic-to-Go mapping. `Unknown` maps to `interface{}`, the most general
/// Go type.
pub struct GoMapper;

impl LanguageMapper for GoMapper {
    fn map(&self, ty: &SemanticType) -> LanguageType {
        let (name, import, natively_nullable) = match ty {
            SemanticType::Integer
            | SemanticType::BigInteger
            | SemanticType::SmallInteger
            | SemanticType::TinyInteger
            | SemanticType::Serial
            | SemanticType::BigSerial => ("int64", None, false),
            SemanticType::Float | SemanticType::Double => ("float64", None, false),
            SemanticType::Decimal { .. } | SemanticType::Numeric => ("float64", None, false),
            SemanticType::Text
            | SemanticType::Char { .. }
            | SemanticType::Varchar { .. }
            | SemanticType::Enum { .. }
            | SemanticType::Uuid => ("string", None, false),
            SemanticType::Blob => ("[]byte", None, true),
            SemanticType::Boolean => ("bool", None, false),
            SemanticType::Date
            | SemanticType::Time
            | SemanticType::Timestamp
            | SemanticType::TimestampTz => ("time.Time", Some("time"), false),
            SemanticType::Json | SemanticType::Jsonb => {
                ("json.RawMessage", Some("encoding/json"), true)
            }
            SemanticType::Unknown => ("interface{}", None, true),
        };
        LanguageType {
            name: name.to_string(),
            import: import.map(str::to_string),
            is_natively_nullable: natively_nullable,
        }
    }
}

/// Accumulates one Go source file: imports discovered while rendering the
/// body, joined under a single header at the end.
struct GoFile {
    package: String,
    imports: BTreeSet<String>,
    body: String,
}

impl GoFile {
    fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            imports: BTreeSet::new(),
            body: String::new(),
        }
    }

    fn import(&mut self, path: &str) {
        self.imports.insert(path.to_string());
    }

    fn finish(self, driver_note: Option<&str>) -> String {
        let mut out = String::new();
        out.push_str("// Code generated by db-catalyst. DO NOT EDIT.\n");
        if let Some(driver) = driver_note {
            let _ = writeln!(out, "// sqlite driver: {driver}");
        }
        let _ = writeln!(out, "\npackage {}\n", self.package);
        if !self.imports.is_empty() {
            out.push_str("import (\n");
            for import in &self.imports {
                let _ = writeln!(out, "\t\"{import}\"");
            }
            out.push_str(")\n\n");
        }
        out.push_str(&self.body);
        out
    }
}

impl GoCodegen {
    /// Resolved Go type for a column or parameter, nullability applied.
    fn go_type(&self, file: &mut GoFile, ty: &SemanticType, nullable: bool) -> String {
        let mapped = GoMapper.map(ty);
        if let Some(import) = &mapped.import {
            file.import(import);
        }
        if !nullable || mapped.is_natively_nullable {
            return mapped.name;
        }
        if self.options.emit_pointers_for_null {
            return format!("*{}", mapped.name);
        }
        file.import("database/sql");
        match mapped.name.as_str() {
            "int64" => "sql.NullInt64".to_string(),
            "float64" => "sql.NullFloat64".to_string(),
            "string" => "sql.NullString".to_string(),
            "bool" => "sql.NullBool".to_string(),
            "time.Time" => "sql.NullTime".to_string(),
            other => format!("*{other}"),
        }
    }

    fn render_models(&self, catalog: &Catalog) -> String {
        let mut file = GoFile::new(&self.options.package);
        for table in catalog.tables() {
            let struct_name = pascal_case(&table.name);
            let _ = writeln!(file.body, "type {struct_name} struct {{");
            for col in table.columns() {
                let field = pascal_case(&col.name);
                let ty = self.go_type(&mut file, &col.semantic_type, col.nullable);
                if self.options.emit_json_tags {
                    let _ = writeln!(
                        file.body,
                        "\t{field} {ty} `json:\"{}\"`",
                        col.name.to_lowercase()
                    );
                } else {
                    let _ = writeln!(file.body, "\t{field} {ty}");
                }
            }
            file.body.push_str("}\n\n");
        }
        for view in catalog.views() {
            let struct_name = pascal_case(&view.name);
            let _ = writeln!(file.body, "type {struct_name} struct {{");
            for col in &view.projection {
                let field = pascal_case(&col.name);
                let ty = self.go_type(&mut file, &col.semantic_type, col.nullable);
                if self.options.emit_json_tags {
                    let _ = writeln!(
                        file.body,
                        "\t{field} {ty} `json:\"{}\"`",
                        col.name.to_lowercase()
                    );
                } else {
                    let _ = writeln!(file.body, "\t{field} {ty}");
                }
            }
            file.body.push_str("}\n\n");
        }
        file.finish(Some(&self.options.sqlite_driver))
    }

    fn render_db(&self) -> String {
        let mut file = GoFile::new(&self.options.package);
        file.import("context");
        file.import("database/sql");

        file.body.push_str(
            "type DBTX interface {\n\
             \tExecContext(context.Context, string, ...interface{}) (sql.Result, error)\n\
             \tPrepareContext(context.Context, string) (*sql.Stmt, error)\n\
             \tQueryContext(context.Context, string, ...interface{}) (*sql.Rows, error)\n\
             \tQueryRowContext(context.Context, string, ...interface{}) *sql.Row\n\
             }\n\n",
        );

        if !self.options.prepared_queries {
            file.body.push_str(
                "func New(db DBTX) *Queries {\n\
                 \treturn &Queries{db: db}\n\
                 }\n\n\
                 type Queries struct {\n\
                 \tdb DBTX\n\
                 }\n\n\
                 func (q *Queries) WithTx(tx *sql.Tx) *Queries {\n\
                 \treturn &Queries{db: tx}\n\
                 }\n",
            );
            return file.finish(None);
        }

        file.import("sync");
        file.body.push_str(
            "func New(db DBTX) *Queries {\n\
             \treturn &Queries{db: db, stmts: make(map[string]*sql.Stmt)}\n\
             }\n\n\
             type Queries struct {\n\
             \tdb    DBTX\n\
             \tmu    sync.Mutex\n\
             \tstmts map[string]*sql.Stmt\n\
             }\n\n\
             func (q *Queries) WithTx(tx *sql.Tx) *Queries {\n\
             \treturn &Queries{db: tx, stmts: make(map[string]*sql.Stmt)}\n\
             }\n\n\
             // stmt returns a prepared statement for the query, preparing and\n\
             // caching it on first use. Queries containing runtime-expanded\n\
             // slices bypass the cache.\n\
             func (q *Queries) stmt(ctx context.Context, query string) (*sql.Stmt, error) {\n\
             \tq.mu.Lock()\n\
             \tdefer q.mu.Unlock()\n\
             \tif s, ok := q.stmts[query]; ok {\n\
             \t\treturn s, nil\n\
             \t}\n\
             \ts, err := q.db.PrepareContext(ctx, query)\n\
             \tif err != nil {\n\
             \t\treturn nil, err\n\
             \t}\n\
             \tq.stmts[query] = s\n\
             \treturn s, nil\n\
             }\n",
        );
        file.finish(None)
    }

    fn render_queries(&self, stem: &str, queries: &[AnalysisResult]) -> String {
        let mut file = GoFile::new(&self.options.package);
        let _ = writeln!(file.body, "// Queries from {stem}.\n");

        for query in queries {
            if query.command == Command::Unknown {
                // Sliced with a warning upstream; nothing to emit.
                continue;
            }
            self.render_query(&mut file, query);
        }
        file.finish(None)
    }

    fn render_query(&self, file: &mut GoFile, query: &AnalysisResult) {
        file.import("context");
        let const_name = camel_case(&query.name);

        for comment in &query.leading_comments {
            let _ = writeln!(file.body, "// {comment}");
        }
        let _ = writeln!(
            file.body,
            "const {const_name} = `-- name: {} :{}\n{}`\n",
            query.name, query.command, query.sql
        );

        let has_slice = query.params.iter().any(|p| p.is_variadic);
        if has_slice {
            file.import("strings");
        }

        // Parameter passing: zero params, one inline arg, or a Params struct.
        let params_struct = query.params.len() > 1;
        if params_struct {
            let _ = writeln!(file.body, "type {}Params struct {{", query.name);
            for param in &query.params {
                let ty = self.param_type(file, param);
                let _ = writeln!(file.body, "\t{} {}", pascal_case(&param.name), ty);
            }
            file.body.push_str("}\n\n");
        }

        let row_struct = !query.columns.is_empty()
            && matches!(query.command, Command::One | Command::Many);
        if row_struct {
            let _ = writeln!(file.body, "type {}Row struct {{", query.name);
            for col in &query.columns {
                let ty = self.go_type(file, &col.semantic_type, col.nullable);
                let field = pascal_case(&col.name);
                if self.options.emit_json_tags {
                    let _ = writeln!(
                        file.body,
                        "\t{field} {ty} `json:\"{}\"`",
                        col.name.to_lowercase()
                    );
                } else {
                    let _ = writeln!(file.body, "\t{field} {ty}");
                }
            }
            file.body.push_str("}\n\n");
        }

        let signature_args = self.signature_args(file, query, params_struct);
        let return_type = match query.command {
            Command::One => format!("({}Row, error)", query.name),
            Command::Many => format!("([]{}Row, error)", query.name),
            Command::Exec => "error".to_string(),
            Command::ExecResult => {
                file.import("database/sql");
                "(sql.Result, error)".to_string()
            }
            Command::Unknown => return,
        };

        let _ = writeln!(
            file.body,
            "func (q *Queries) {}(ctx context.Context{signature_args}) {return_type} {{",
            query.name
        );
        self.render_body(file, query, params_struct, has_slice);
        file.body.push_str("}\n\n");
    }

    fn param_type(&self, file: &mut GoFile, param: &ResultParam) -> String {
        let base = self.go_type(file, &param.semantic_type, param.nullable);
        if param.is_variadic {
            format!("[]{base}")
        } else {
            base
        }
    }

    fn signature_args(
        &self,
        file: &mut GoFile,
        query: &AnalysisResult,
        params_struct: bool,
    ) -> String {
        if query.params.is_empty() {
            String::new()
        } else if params_struct {
            format!(", arg {}Params", query.name)
        } else {
            let param = &query.params[0];
            format!(", {} {}", camel_case(&param.name), self.param_type(file, param))
        }
    }

    /// Go expression for one parameter at call time.
    fn param_expr(param: &ResultParam, params_struct: bool) -> String {
        if params_struct {
            format!("arg.{}", pascal_case(&param.name))
        } else {
            camel_case(&param.name)
        }
    }

    fn render_body(
        &self,
        file: &mut GoFile,
        query: &AnalysisResult,
        params_struct: bool,
        has_slice: bool,
    ) {
        let body = &mut file.body;
        let const_name = camel_case(&query.name);

        // Assemble the query string and argument list. Slice parameters are
        // expanded at call time; everything else binds positionally.
        if has_slice {
            let _ = writeln!(body, "\tquery := {const_name}");
            let _ = writeln!(body, "\tvar queryArgs []interface{{}}");
            for param in &query.params {
                let expr = Self::param_expr(param, params_struct);
                if param.is_variadic {
                    let marker = format!("/*SLICE:{}*/", param.name);
                    let _ = writeln!(body, "\tif len({expr}) > 0 {{");
                    let _ = writeln!(
                        body,
                        "\t\tquery = strings.Replace(query, \"{marker}\", strings.Repeat(\",?\", len({expr}))[1:], 1)"
                    );
                    let _ = writeln!(body, "\t\tfor _, v := range {expr} {{");
                    let _ = writeln!(body, "\t\t\tqueryArgs = append(queryArgs, v)");
                    let _ = writeln!(body, "\t\t}}");
                    let _ = writeln!(body, "\t}} else {{");
                    let _ = writeln!(
                        body,
                        "\t\tquery = strings.Replace(query, \"{marker}\", \"NULL\", 1)"
                    );
                    let _ = writeln!(body, "\t}}");
                } else {
                    let _ = writeln!(body, "\tqueryArgs = append(queryArgs, {expr})");
                }
            }
        }

        let (query_expr, args_expr) = if has_slice {
            ("query".to_string(), ", queryArgs...".to_string())
        } else {
            let args: Vec<String> = query
                .params
                .iter()
                .map(|p| Self::param_expr(p, params_struct))
                .collect();
            let args_expr = if args.is_empty() {
                String::new()
            } else {
                format!(", {}", args.join(", "))
            };
            (const_name.clone(), args_expr)
        };

        let scan_fields = |prefix: &str| -> String {
            query
                .columns
                .iter()
                .map(|c: &ResultColumn| format!("&{prefix}.{}", pascal_case(&c.name)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        match query.command {
            Command::One => {
                let _ = writeln!(
                    body,
                    "\trow := q.db.QueryRowContext(ctx, {query_expr}{args_expr})"
                );
                let _ = writeln!(body, "\tvar i {}Row", query.name);
                let _ = writeln!(body, "\terr := row.Scan({})", scan_fields("i"));
                let _ = writeln!(body, "\treturn i, err");
            }
            Command::Many => {
                let _ = writeln!(
                    body,
                    "\trows, err := q.db.QueryContext(ctx, {query_expr}{args_expr})"
                );
                let _ = writeln!(body, "\tif err != nil {{");
                let _ = writeln!(body, "\t\treturn nil, err");
                let _ = writeln!(body, "\t}}");
                let _ = writeln!(body, "\tdefer rows.Close()");
                if self.options.emit_empty_slices {
                    let _ = writeln!(body, "\titems := []{}Row{{}}", query.name);
                } else {
                    let _ = writeln!(body, "\tvar items []{}Row", query.name);
                }
                let _ = writeln!(body, "\tfor rows.Next() {{");
                let _ = writeln!(body, "\t\tvar i {}Row", query.name);
                let _ = writeln!(
                    body,
                    "\t\tif err := rows.Scan({}); err != nil {{",
                    scan_fields("i")
                );
                let _ = writeln!(body, "\t\t\treturn nil, err");
                let _ = writeln!(body, "\t\t}}");
                let _ = writeln!(body, "\t\titems = append(items, i)");
                let _ = writeln!(body, "\t}}");
                let _ = writeln!(body, "\tif err := rows.Err(); err != nil {{");
                let _ = writeln!(body, "\t\treturn nil, err");
                let _ = writeln!(body, "\t}}");
                let _ = writeln!(body, "\treturn items, nil");
            }
            Command::Exec => {
                let _ = writeln!(
                    body,
                    "\t_, err := q.db.ExecContext(ctx, {query_expr}{args_expr})"
                );
                let _ = writeln!(body, "\treturn err");
            }
            Command::ExecResult => {
                let _ = writeln!(
                    body,
                    "\treturn q.db.ExecContext(ctx, {query_expr}{args_expr})"
                );
            }
            Command::Unknown => {}
        }
    }
}

/// Acronyms upper-cased whole in exported Go identifiers.
const ACRONYMS: &[&str] = &["id", "url", "uri", "api", "http", "json", "sql", "uuid", "db"];

/// `user_id` → `UserID`, `created_at` → `CreatedAt`.
pub fn pascal_case(name: &str) -> String {
    let mut out = String::new();
    for part in name.split(|c: char| c == '_' || c == '-' || c.is_whitespace()) {
        if part.is_empty() {
            continue;
        }
        let lower = part.to_lowercase();
        if ACRONYMS.contains(&lower.as_str()) {
            out.push_str(&part.to_uppercase());
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// `GetUser` → `getUser`, `user_id` → `userID`.
pub fn camel_case(name: &str) -> String {
    let pascal = pascal_case(name);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => {
            let mut out: String = first.to_lowercase().collect();
            out.push_str(chars.as_str());
            out
        }
        None => pascal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::diagnostics::{DiagnosticSink, Span};

    fn sample_catalog() -> Catalog {
        let mut sink = DiagnosticSink::new();
        Catalog::builder()
            .table("users", |t| {
                t.column("id", "INTEGER", false)
                    .column("name", "TEXT", false)
                    .column("email", "TEXT", true)
                    .pk(&["id"]);
            })
            .freeze(&mut sink)
    }

    fn sample_query() -> AnalysisResult {
        AnalysisResult {
            name: "GetUser".to_string(),
            command: Command::One,
            sql: "SELECT id, name, email FROM users WHERE id = ?1".to_string(),
            leading_comments: vec![],
            params: vec![ResultParam {
                name: "arg1".to_string(),
                semantic_type: SemanticType::Integer,
                nullable: false,
                is_variadic: false,
                span: Span::point("q.sql", 1, 1, 0),
            }],
            columns: vec![
                ResultColumn {
                    name: "id".to_string(),
                    semantic_type: SemanticType::Integer,
                    nullable: false,
                    origin: crate::analyzer::ColumnOrigin::Expression,
                },
                ResultColumn {
                    name: "email".to_string(),
                    semantic_type: SemanticType::Text,
                    nullable: true,
                    origin: crate::analyzer::ColumnOrigin::Expression,
                },
            ],
            diagnostics: vec![],
            span: Span::point("q.sql", 1, 1, 0),
        }
    }

    #[test]
    fn test_pascal_case_acronyms() {
        assert_eq!(pascal_case("user_id"), "UserID");
        assert_eq!(pascal_case("json_payload"), "JSONPayload");
        assert_eq!(pascal_case("created_at"), "CreatedAt");
        assert_eq!(pascal_case("url"), "URL");
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("GetUser"), "getUser");
        assert_eq!(camel_case("user_id"), "userID");
    }

    #[test]
    fn test_models_emit_null_wrappers() {
        let generator = GoCodegen::new(GenOptions::default());
        let models = generator.render_models(&sample_catalog());
        assert!(models.contains("type Users struct"));
        assert!(models.contains("ID int64"));
        assert!(models.contains("Name string"));
        assert!(models.contains("Email sql.NullString"));
        assert!(models.contains("\"database/sql\""));
    }

    #[test]
    fn test_models_pointer_mode() {
        let generator = GoCodegen::new(GenOptions {
            emit_pointers_for_null: true,
            ..GenOptions::default()
        });
        let models = generator.render_models(&sample_catalog());
        assert!(models.contains("Email *string"));
        assert!(!models.contains("sql.NullString"));
    }

    #[test]
    fn test_json_tags() {
        let generator = GoCodegen::new(GenOptions {
            emit_json_tags: true,
            ..GenOptions::default()
        });
        let models = generator.render_models(&sample_catalog());
        assert!(models.contains("`json:\"email\"`"));
    }

    #[test]
    fn test_query_method_one() {
        let generator = GoCodegen::new(GenOptions::default());
        let out = generator.render_queries("queries.sql", &[sample_query()]);
        assert!(out.contains("const getUser = `-- name: GetUser :one"));
        assert!(out.contains(
            "func (q *Queries) GetUser(ctx context.Context, arg1 int64) (GetUserRow, error)"
        ));
        assert!(out.contains("row.Scan(&i.ID, &i.Email)"));
    }

    #[test]
    fn test_variadic_slice_expansion() {
        let generator = GoCodegen::new(GenOptions::default());
        let mut query = sample_query();
        query.name = "ByIds".to_string();
        query.command = Command::Many;
        query.sql = "SELECT id FROM users WHERE id IN (/*SLICE:ids*/)".to_string();
        query.params = vec![ResultParam {
            name: "ids".to_string(),
            semantic_type: SemanticType::Integer,
            nullable: false,
            is_variadic: true,
            span: Span::point("q.sql", 1, 1, 0),
        }];
        let out = generator.render_queries("queries.sql", &[query]);
        assert!(out.contains("ids []int64"));
        assert!(out.contains("strings.Repeat"));
        assert!(out.contains("\"strings\""));
        assert!(out.contains("\"NULL\""));
    }

    #[test]
    fn test_params_struct_for_multiple() {
        let generator = GoCodegen::new(GenOptions::default());
        let mut query = sample_query();
        query.params.push(ResultParam {
            name: "email".to_string(),
            semantic_type: SemanticType::Text,
            nullable: true,
            is_variadic: false,
            span: Span::point("q.sql", 1, 1, 0),
        });
        let out = generator.render_queries("queries.sql", &[query]);
        assert!(out.contains("type GetUserParams struct"));
        assert!(out.contains("arg GetUserParams"));
        assert!(out.contains("arg.Arg1"));
        assert!(out.contains("arg.Email"));
    }

    #[test]
    fn test_prepared_db_has_stmt_cache() {
        let generator = GoCodegen::new(GenOptions {
            prepared_queries: true,
            ..GenOptions::default()
        });
        let db = generator.render_db();
        assert!(db.contains("stmts map[string]*sql.Stmt"));
        assert!(db.contains("sync.Mutex"));
    }

    #[test]
    fn test_deterministic_output() {
        let generator = GoCodegen::new(GenOptions::default());
        let a = generator.render_models(&sample_catalog());
        let b = generator.render_models(&sample_catalog());
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_slices_option() {
        let generator = GoCodegen::new(GenOptions {
            emit_empty_slices: true,
            ..GenOptions::default()
        });
        let mut query = sample_query();
        query.command = Command::Many;
        let out = generator.render_queries("queries.sql", &[query]);
        assert!(out.contains("items := []GetUserRow{}"));
    }
}
