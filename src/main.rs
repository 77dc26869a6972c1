use std::{
    process::ExitCode,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use clap::Parser;
use kdam::{BarExt, tqdm};
use pdfdex::{
    embedding::Embedder,
    error::{Error, Result},
    extraction::PdfExtractor,
    incremental::{WorkUnit, unit_name},
    ingestion::{
        self,
        CancelToken,
        IngestOptions,
        ProgressSink,
        Stage,
        StageReport,
        UnitOutcome,
    },
    search::{self, Query, SearchRequest},
    session::{Session, Status},
    settings::Settings,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, IngestArgs, SearchArgs, StatusArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("PDFDEX_LOG") {
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

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(ExitCode::SUCCESS);
    }

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Search(args) => cmd_search(settings, args),
        Command::Ingest(args) => cmd_ingest(settings, args),
        Command::Status(args) => cmd_status(settings, args),
        Command::Completions(_) => Ok(ExitCode::SUCCESS),
    }
}

fn open_session(settings: &Settings) -> Result<Session> {
    let folders = settings.active_folders();
    if folders.is_empty() {
        return Err(Error::Config(
            "no folders configured; pass --folder or list them in the \
             settings file"
                .into(),
        ));
    }
    Session::open(folders, settings.bm25)
}

fn cmd_search(mut settings: Settings, args: SearchArgs) -> Result<ExitCode> {
    settings.override_folders(args.folders);
    let max_results = args.count.unwrap_or(settings.max_results);
    if max_results == 0 {
        return Err(Error::Config("result count must be at least 1".into()));
    }

    let session = open_session(&settings)?;
    let request = SearchRequest {
        mode: args.mode,
        rerank: args.rerank,
        max_results,
        rerank_options: settings.rerank_options(),
    };
    let embedder = args.embed.embedder();
    let query = Query::new(args.query);

    // Pin one generation so results and rendering see the same corpus.
    let generation = session.current();
    let results = generation.search(
        &request,
        &query,
        embedder.as_ref().map(|e| e as &dyn Embedder),
    )?;

    if args.json {
        search::format_json(generation.corpus(), &results, &query, &request)?;
    } else {
        if generation.is_degraded() {
            eprintln!("Warning: no page-text artifacts could be loaded.");
        }
        search::format_human(generation.corpus(), &results);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_ingest(mut settings: Settings, args: IngestArgs) -> Result<ExitCode> {
    settings.override_folders(args.folders.clone());
    let folders = settings.active_folders();
    if folders.is_empty() {
        return Err(Error::Config(
            "no folders to ingest; pass DIR or list them in the settings file"
                .into(),
        ));
    }

    let (text, embeddings) = args.stages();
    // Checked up front so a missing embedder does not surface only after
    // a long text stage.
    let embedder = match (embeddings, args.embed.embedder()) {
        (true, None) => {
            return Err(Error::Config(
                "the embedding stage needs --embed-cmd".into(),
            ));
        }
        (true, Some(embedder)) => Some(embedder),
        (false, _) => None,
    };

    let workers = args.workers.unwrap_or_else(|| settings.workers());
    if workers == 0 {
        return Err(Error::Config("workers must be at least 1".into()));
    }
    let options = IngestOptions {
        workers,
        cancel: CancelToken::new(),
        unit_timeout: args.timeout.map(Duration::from_secs),
    };

    let progress = BarProgress::default();
    let mut reports = Vec::new();

    if text {
        let report = ingestion::run_text_stage(
            &folders,
            Arc::new(PdfExtractor::new()),
            &options,
            &progress,
        )?;
        progress.finish();
        reports.push(report);
    }
    if let Some(embedder) = embedder {
        let report = ingestion::run_embedding_stage(
            &folders,
            Arc::new(embedder),
            &options,
            &progress,
        )?;
        progress.finish();
        reports.push(report);
    }

    for report in &reports {
        print_stage_report(report);
    }

    Ok(if reports.iter().any(StageReport::has_failures) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_stage_report(report: &StageReport) {
    eprintln!(
        "{} stage: {} written ({} pages), {} already done, {} skipped",
        report.stage,
        report.written,
        report.pages,
        report.up_to_date,
        report.skipped
    );
    if report.stale > 0 {
        eprintln!(
            "  {} artifact(s) are older than their source and were kept",
            report.stale
        );
    }
    if report.aborted > 0 {
        eprintln!("  {} document(s) aborted", report.aborted);
    }
    if report.cancelled {
        eprintln!("  cancelled; {} document(s) not started", report.not_started);
    }
    if report.has_failures() {
        eprintln!("  {} failure(s):", report.failures.len());
        for failure in &report.failures {
            eprintln!("    {}: {}", failure.source.display(), failure.reason);
        }
    }
}

fn cmd_status(mut settings: Settings, args: StatusArgs) -> Result<ExitCode> {
    settings.override_folders(args.folders);
    let session = open_session(&settings)?;
    let status = session.status();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status, &settings);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_status(status: &Status, settings: &Settings) {
    println!("Folders:");
    for folder in &settings.folders {
        let mark = if folder.checked { "x" } else { " " };
        println!("  [{mark}] {}", folder.path.display());
    }
    println!("Documents:      {}", status.documents);
    println!("Pages:          {}", status.pages);
    println!("Embedded pages: {}", status.embedded_pages);
    if let Some(dimension) = status.dimension {
        println!("Dimension:      {dimension}");
    }
    println!("Indexed terms:  {}", status.terms);

    let modes: Vec<String> =
        status.modes.iter().map(ToString::to_string).collect();
    println!("Search modes:   {}", modes.join(", "));

    if status.degraded {
        println!("\nNo page-text artifacts could be loaded.");
    }
    if !status.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &status.warnings {
            println!("  {warning}");
        }
    }
}

/// Terminal progress bar, one per ingestion stage.
#[derive(Default)]
struct BarProgress {
    bar: Mutex<Option<kdam::Bar>>,
}

impl BarProgress {
    fn finish(&self) {
        let mut bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut bar) = bar.take() {
            let _ = bar.refresh();
            eprintln!();
        }
    }
}

impl ProgressSink for BarProgress {
    fn stage_started(&self, stage: Stage, units: usize) {
        let mut bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        *bar = (units > 0).then(|| {
            tqdm!(
                total = units,
                desc = format!("{stage}"),
                unit = format!(" {}", stage.unit_label())
            )
        });
    }

    fn unit_finished(&self, unit: &WorkUnit, outcome: &UnitOutcome) {
        debug!(unit = unit_name(unit), ?outcome, "progress");
        let mut bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = bar.as_mut() {
            let _ = bar.update(1);
        }
    }
}
