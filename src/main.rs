//! db-catalyst CLI
//!
//! Entry point for the command-line tool. Exit codes: 0 success, 1 for
//! configuration or diagnostic errors, 2 for write errors.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use db_catalyst::pipeline::{Pipeline, PipelineCaches, PipelineError, RunOptions};
use db_catalyst::{config, diagnostics};

#[derive(Parser, Debug)]
#[command(name = "db-catalyst")]
#[command(about = "Compile SQL schemas and queries into a typed data-access layer", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "db-catalyst.toml")]
    config: PathBuf,

    /// Override the output directory (relative to the config file)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Plan everything but write nothing
    #[arg(long)]
    dry_run: bool,

    /// Stop after analysis and print every query's signature
    #[arg(long)]
    list_queries: bool,

    /// Render --list-queries output as JSON
    #[arg(long, requires = "list_queries")]
    json: bool,

    /// Escalate configuration warnings to errors
    #[arg(long)]
    strict_config: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable JSON tags on generated structs
    #[arg(long)]
    no_json_tags: bool,

    /// Override the parser dialect (sqlite, mysql)
    #[arg(long)]
    sql_dialect: Option<String>,

    /// Never overwrite output files that already exist
    #[arg(long)]
    if_not_exists: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let (mut plan, warnings) = match config::load(&args.config, args.strict_config) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("{}: {err}", args.config.display());
            return ExitCode::from(1);
        }
    };

    // CLI overrides on top of the file.
    if let Some(out) = &args.out {
        if out.is_absolute() {
            eprintln!("--out must be a relative path");
            return ExitCode::from(1);
        }
        plan.out_dir = plan.base_dir.join(out);
    }
    if args.no_json_tags {
        plan.generation.emit_json_tags = false;
    }
    if let Some(dialect) = &args.sql_dialect {
        plan.dialect = match dialect.parse() {
            Ok(d) => d,
            Err(_) => {
                eprintln!("unknown --sql-dialect '{dialect}'. Valid values: sqlite, mysql");
                return ExitCode::from(1);
            }
        };
    }

    let options = RunOptions {
        dry_run: args.dry_run,
        list_queries: args.list_queries,
        if_not_exists: args.if_not_exists,
    };
    let caches = PipelineCaches::in_memory();
    let mut pipeline_warnings = warnings;

    let (summary, error) = Pipeline::new(&plan, options, &caches).run();

    // Config warnings render first, then the run's diagnostics, in order.
    pipeline_warnings.extend(summary.diagnostics.iter().cloned());
    eprint!("{}", diagnostics::render_all(&pipeline_warnings));

    if args.list_queries && error.is_none() {
        if args.json {
            let listing: Vec<&db_catalyst::AnalysisResult> = summary
                .analyses
                .iter()
                .flat_map(|f| f.queries.iter())
                .collect();
            match serde_json::to_string_pretty(&listing) {
                Ok(rendered) => println!("{rendered}"),
                Err(err) => {
                    eprintln!("failed to render listing: {err}");
                    return ExitCode::from(1);
                }
            }
            return ExitCode::SUCCESS;
        }
        for file in &summary.analyses {
            for query in &file.queries {
                let params: Vec<String> = query
                    .params
                    .iter()
                    .map(|p| {
                        let mut s = format!("{}: {}", p.name, p.semantic_type);
                        if p.is_variadic {
                            s.push_str("...");
                        }
                        if p.nullable {
                            s.push('?');
                        }
                        s
                    })
                    .collect();
                let columns: Vec<String> = query
                    .columns
                    .iter()
                    .map(|c| {
                        let mut s = format!("{} {}", c.name, c.semantic_type);
                        if c.nullable {
                            s.push('?');
                        }
                        s
                    })
                    .collect();
                println!(
                    "{} :{} ({}) -> [{}]",
                    query.name,
                    query.command,
                    params.join(", "),
                    columns.join(", ")
                );
            }
        }
    }

    if args.dry_run && error.is_none() {
        for file in &summary.files {
            println!(
                "{} {}",
                match file.action {
                    db_catalyst::pipeline::WriteAction::Write => "write",
                    db_catalyst::pipeline::WriteAction::Skip => "skip ",
                },
                file.path.display()
            );
        }
    }

    match error {
        None => ExitCode::SUCCESS,
        Some(PipelineError::Write { path, source }) => {
            eprintln!("write error: {}: {source}", path.display());
            ExitCode::from(2)
        }
        // Already rendered with the rest of the diagnostics.
        Some(PipelineError::Diagnostics(_)) => ExitCode::from(1),
        Some(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}
