use std::path::{Path, PathBuf};

use bookkeeper::{
    ArchiveExtractor,
    Catalog,
    CommandUnpacker,
    Config,
    DataDir,
    Extractors,
    Scanner,
    ScratchSpace,
    SearchCache,
    Terminator,
    archive,
    catalog::{BadFileRecord, LocationDetails, LocationKind},
    error::{self, Error},
    scanner::ScanSummary,
};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("BOOKKEEPER_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Configuration with command-line overrides applied.
fn load_config(cli: &Cli, data_dir: &DataDir) -> error::Result<Config> {
    let mut config = Config::resolve(cli.config.as_deref(), data_dir)?;
    if let Some(ref catalog) = cli.catalog {
        config.catalog = Some(catalog.clone());
    }
    if let Some(ref scratch_dir) = cli.scratch_dir {
        config.scratch_dir = scratch_dir.clone();
    }
    config.keep_artifacts |= cli.keep_artifacts;
    Ok(config)
}

fn archive_extractor(config: &Config) -> ArchiveExtractor {
    ArchiveExtractor::new(
        Box::new(CommandUnpacker),
        ScratchSpace::new(&config.scratch_dir, config.keep_artifacts),
    )
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(ref args) = cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config = load_config(&cli, &data_dir)?;
    let catalog_path = config.catalog_path(&data_dir);
    let catalog = Catalog::open(&catalog_path)?;

    match cli.command {
        Command::Scan(args) => cmd_scan(&catalog, &config, args.roots)?,
        Command::Search(args) => cmd_search(&catalog, &args)?,
        Command::Open(args) => {
            let extracted = materialize(&catalog, &config, &args.path)?;
            println!("{}", extracted.display());
        }
        Command::Export(args) => {
            cmd_export(&catalog, &config, &args.path, args.to.as_deref())?;
        }
        Command::Rename(args) => {
            let kind = catalog.rename_file(&args.old, &args.new)?;
            let kind = match kind {
                LocationKind::Archive => "archive",
                LocationKind::Document => "document",
            };
            println!("Renamed {kind} '{}' -> '{}'", args.old, args.new);
        }
        Command::Info(args) => cmd_info(&catalog, &args.path, args.json)?,
        Command::Bad(args) => cmd_bad(&catalog, args.json)?,
        Command::Ls(args) => cmd_ls(&catalog, &args.pattern)?,
        Command::Status(args) => {
            cmd_status(&catalog, &catalog_path, &config, args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_scan(
    catalog: &Catalog,
    config: &Config,
    roots: Vec<PathBuf>,
) -> error::Result<()> {
    let roots = if roots.is_empty() {
        config.libraries.clone()
    } else {
        roots
    };
    if roots.is_empty() {
        return Err(Error::Config(
            "no library roots given and none configured".into(),
        ));
    }

    let archives = archive_extractor(config);
    archives.scratch().check_mounted(config.require_tmpfs)?;
    let extractors = Extractors::with_commands(
        &config.language,
        &config.scratch_dir,
        config.keep_artifacts,
        config.limits(),
    );
    let terminator = Terminator::install()?;

    let summary = Scanner::new(catalog, &extractors, &archives)
        .with_cancel(&terminator)
        .scan(&roots)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    println!("Files seen: {}", summary.files);
    println!("  New documents: {}", summary.documents);
    println!("  New archives: {}", summary.archives);
    println!("  Duplicates: {}", summary.duplicates);
    println!("  Unchanged: {}", summary.unchanged);
    println!("  Other files: {}", summary.misc);
    println!("  Failed: {}", summary.failed);
    println!("  Known bad: {}", summary.known_bad);
    match summary.removed {
        Some(removed) => {
            println!(
                "Removed: {} document location(s), {} archive location(s), {} document(s), {} archive(s)",
                removed.document_locations,
                removed.archive_locations,
                removed.documents,
                removed.archives
            );
        }
        None => println!("Scan cancelled; nothing was removed."),
    }
}

fn cmd_search(catalog: &Catalog, args: &cli::SearchArgs) -> error::Result<()> {
    let cache = SearchCache::build(catalog)?;
    tracing::debug!(documents = cache.len(), "search cache built");
    if cache.is_empty() && !args.json {
        println!("The catalog is empty; run `bookkeeper scan` first.");
        return Ok(());
    }
    let terms: Vec<&str> = args.terms.iter().map(String::as_str).collect();
    let mut hits = cache.search(&terms)?;
    if !args.all {
        hits.truncate(args.count);
    }

    if args.json {
        println!("{}", serde_json::to_string(&hits)?);
    } else if hits.is_empty() {
        println!("No matches.");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            let marker = if hit.in_archive { " [archive]" } else { "" };
            println!(
                "{:>3}. {:.6}  {}{marker}",
                i + 1,
                hit.relevance,
                hit.path
            );
            println!("     {}", hit.snippet(40));
        }
    }
    Ok(())
}

/// Resolve a logical path to a real file, unpacking archives as needed.
fn materialize(
    catalog: &Catalog,
    config: &Config,
    logical: &str,
) -> error::Result<PathBuf> {
    if catalog.location(logical)?.is_none() {
        return Err(Error::NotFound {
            kind: "location",
            name: logical.to_string(),
        });
    }
    let archives = archive_extractor(config);
    if archive::split_nested(logical).is_some() {
        archives.scratch().check_mounted(config.require_tmpfs)?;
    }
    archives.unpack_file(logical)
}

fn cmd_export(
    catalog: &Catalog,
    config: &Config,
    logical: &str,
    to: Option<&Path>,
) -> error::Result<()> {
    let dest_dir = to
        .map(Path::to_path_buf)
        .or_else(|| config.export_dir.clone())
        .ok_or_else(|| {
            Error::Config("no --to given and no export_dir configured".into())
        })?;
    std::fs::create_dir_all(&dest_dir)?;

    let extracted = materialize(catalog, config, logical)?;
    let name = extracted.file_name().ok_or_else(|| Error::NotFound {
        kind: "file name",
        name: logical.to_string(),
    })?;
    let dest = dest_dir.join(name);

    if extracted == Path::new(logical) {
        std::fs::copy(&extracted, &dest)?;
    } else if std::fs::rename(&extracted, &dest).is_err() {
        // Scratch and export dirs may be on different filesystems.
        std::fs::copy(&extracted, &dest)?;
        std::fs::remove_file(&extracted)?;
    }

    println!("{}", dest.display());
    Ok(())
}

fn cmd_info(catalog: &Catalog, logical: &str, json: bool) -> error::Result<()> {
    let report = catalog.report(logical)?.ok_or_else(|| Error::NotFound {
        kind: "location",
        name: logical.to_string(),
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Path: {}", report.path);
    println!("Hash: {}", report.hash);
    if let Some(ref parent) = report.parent_archive_hash {
        println!("Inside archive: {parent}");
    }
    match report.details {
        Some(LocationDetails::Document(document)) => {
            println!("Type: {}", document.kind);
            println!("Size: {} bytes", document.size);
            if let Some(pages) = document.page_count {
                println!("Pages: {pages}");
            }
            println!("OCR: {}", if document.ocr { "yes" } else { "no" });
            println!("Text: {} characters", document.text.chars().count());
        }
        Some(LocationDetails::Archive(archive)) => {
            println!("Type: {}", archive.kind);
            println!("Size: {} bytes", archive.size);
        }
        Some(LocationDetails::Bad(bad)) => {
            if let Some(kind) = bad.kind {
                println!("Type: {kind}");
            }
            println!("Error code: {}", bad.code);
            println!("Diagnostics:");
            for line in bad.diagnostics.lines() {
                println!("  {line}");
            }
        }
        None => println!("Content row missing; rescan to repair."),
    }
    Ok(())
}

#[derive(Serialize)]
struct BadEntry<'a> {
    path: &'a str,
    #[serde(flatten)]
    record: &'a BadFileRecord,
}

fn cmd_bad(catalog: &Catalog, json: bool) -> error::Result<()> {
    let bad = catalog.bad_files()?;

    if json {
        let entries: Vec<BadEntry<'_>> = bad
            .iter()
            .map(|(path, record)| BadEntry { path, record })
            .collect();
        println!("{}", serde_json::to_string(&entries)?);
    } else if bad.is_empty() {
        println!("No bad files.");
    } else {
        for (path, record) in &bad {
            println!("{}\t{path}", record.code);
            if let Some(line) = record.diagnostics.lines().next() {
                println!("\t{line}");
            }
        }
    }
    Ok(())
}

fn cmd_ls(catalog: &Catalog, pattern: &str) -> error::Result<()> {
    let glob = globset::Glob::new(pattern)
        .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))?
        .compile_matcher();

    let matches: Vec<String> = catalog
        .locations()?
        .into_iter()
        .map(|(path, _, _)| path)
        .filter(|path| glob.is_match(path))
        .collect();

    if matches.is_empty() {
        println!("No locations match '{pattern}'");
    } else {
        for path in &matches {
            println!("{path}");
        }
        println!("\n{} match(es)", matches.len());
    }
    Ok(())
}

fn cmd_status(
    catalog: &Catalog,
    catalog_path: &Path,
    config: &Config,
    json: bool,
) -> error::Result<()> {
    let stats = catalog.stats()?;

    if json {
        let libraries: Vec<String> = config
            .libraries
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let status = serde_json::json!({
            "catalog": catalog_path.display().to_string(),
            "scratch_dir": config.scratch_dir.display().to_string(),
            "libraries": libraries,
            "stats": stats,
        });
        println!("{status}");
    } else {
        println!("Catalog: {}", catalog_path.display());
        println!("Scratch directory: {}", config.scratch_dir.display());
        println!("Libraries: {}", config.libraries.len());
        for library in &config.libraries {
            println!("  {}", library.display());
        }
        println!(
            "Documents: {} ({} locations)",
            stats.documents, stats.document_locations
        );
        println!(
            "Archives: {} ({} locations)",
            stats.archives, stats.archive_locations
        );
        println!("Other files: {}", stats.misc_files);
        println!("Bad files: {}", stats.bad_files);
    }
    Ok(())
}
