// Sheetwright CLI - conversational workbook transformations, headless
//
// Runs the same pipeline a service caller drives (ingest, converse,
// finalize, download) against a local file, in one process.

mod exit_codes;

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sheetwright_config::Settings;
use sheetwright_engine::CancelToken;
use sheetwright_protocol::{Answer, ErrorBody, ErrorKind, Finalized, Question, QuestionKind, Reply, Turn};
use sheetwright_session::{CoreError, Ingested, Service, DEFAULT_TEXT_SHEET};

use exit_codes::{
    error_exit_code, ErrorOutput, EXIT_ABANDONED, EXIT_CONFIG, EXIT_ERROR, EXIT_FALLBACK, EXIT_IO,
    EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "swr")]
#[command(about = "Reshape spreadsheets by answering a few questions")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the per-user settings.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tenant namespace for handles
    #[arg(long, global = true, default_value = "local")]
    tenant: String,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the inferred schema and candidate transformations
    #[command(after_help = "\
Examples:
  swr analyze sales.xlsx
  swr analyze export.csv --sheet Orders --json")]
    Analyze {
        /// Workbook (xlsx, xls, ods) or delimited text file
        file: PathBuf,

        /// Sheet name for delimited text input
        #[arg(long, default_value = DEFAULT_TEXT_SHEET)]
        sheet: String,

        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer the questions from a script and write the result
    #[command(after_help = "\
Answers are used in order, one per question. Once they run out the
conversation is closed and the plan compiled.

Examples:
  swr run sales.xlsx -a 'add a profit margin column' -o out.xlsx
  swr run sales.xlsx -a yes -a Category -o out.xlsx --json")]
    Run {
        file: PathBuf,

        /// Answer to the next question (repeatable)
        #[arg(long = "answer", short = 'a', value_name = "TEXT")]
        answers: Vec<String>,

        /// Output workbook path
        #[arg(long, short = 'o')]
        output: PathBuf,

        #[arg(long, default_value = DEFAULT_TEXT_SHEET)]
        sheet: String,

        /// Fail instead of writing an unchanged copy when nothing was understood
        #[arg(long)]
        strict: bool,

        /// Print the finalize result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Answer the questions interactively on stdin
    #[command(after_help = "\
Type an answer per question. 'done' (or end of input) closes the
conversation and writes the result.")]
    Chat {
        file: PathBuf,

        #[arg(long, short = 'o')]
        output: PathBuf,

        #[arg(long, default_value = DEFAULT_TEXT_SHEET)]
        sheet: String,
    },

    /// Settings file helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the settings file location
    Path,
    /// Write a commented default settings file if none exists
    Init,
    /// Print the effective settings as JSON
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let json_errors = matches!(cli.command, Commands::Analyze { json: true, .. } | Commands::Run { json: true, .. });

    let result = match cli.command {
        Commands::Analyze { file, sheet, json } => {
            load_settings(cli.config.as_deref()).and_then(|s| cmd_analyze(s, &cli.tenant, &file, &sheet, json))
        }
        Commands::Run { file, answers, output, sheet, strict, json } => load_settings(cli.config.as_deref())
            .and_then(|s| cmd_run(s, &cli.tenant, &file, &sheet, answers, &output, strict, json)),
        Commands::Chat { file, output, sheet } => {
            load_settings(cli.config.as_deref()).and_then(|s| cmd_chat(s, &cli.tenant, &file, &sheet, &output))
        }
        Commands::Config(cmd) => cmd_config(cmd, cli.config.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint, body }) => {
            match body {
                Some(body) if json_errors => ErrorOutput::new(body).print(),
                _ => {
                    if !message.is_empty() {
                        eprintln!("error: {}", message);
                    }
                    if let Some(hint) = hint {
                        eprintln!("hint:  {}", hint);
                    }
                }
            }
            ExitCode::from(code)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings, CliError> {
    match path {
        Some(path) => Settings::from_path(path).map_err(|e| {
            CliError::config(e.to_string()).with_hint("run `swr config init` for a commented template")
        }),
        None => Ok(Settings::load()),
    }
}

fn service(settings: Settings) -> Result<Service, CliError> {
    Service::new(settings).map_err(|e| CliError::core(&e))
}

fn read_input(file: &Path) -> Result<Vec<u8>, CliError> {
    fs::read(file).map_err(|e| CliError::args(format!("cannot read {}: {}", file.display(), e)))
}

// ============================================================================
// analyze
// ============================================================================

fn cmd_analyze(settings: Settings, tenant: &str, file: &Path, sheet: &str, json: bool) -> Result<(), CliError> {
    let svc = service(settings)?;
    let ingested = svc
        .ingest_named(tenant, read_input(file)?, sheet)
        .map_err(|e| CliError::core(&e))?;

    if json {
        let out = serde_json::to_string_pretty(&ingested).map_err(|e| CliError::error(e.to_string()))?;
        println!("{}", out);
        return Ok(());
    }

    print_analysis(&ingested);
    Ok(())
}

fn print_analysis(ingested: &Ingested) {
    let analysis = &ingested.analysis;
    for sheet in &analysis.sheets {
        println!("{} ({} rows)", sheet.name, sheet.row_count);
        let width = sheet.columns.iter().map(|c| c.name.len()).max().unwrap_or(0);
        for col in &sheet.columns {
            println!("  {:<width$}  {}", col.name, col.semantic, width = width);
        }
    }
    if analysis.templates.is_empty() {
        println!("\nNo candidate transformations detected.");
    } else {
        println!("\nCandidate transformations:");
        for t in &analysis.templates {
            println!("  - {}", t.summary);
        }
    }
    println!("\nfingerprint {}", analysis.fingerprint);
}

// ============================================================================
// run / chat
// ============================================================================

/// How a conversation ended.
enum Closing {
    Ready,
    Fallback(String),
}

/// Drive the conversation until it is ready to compile. `next` supplies the
/// answer text for each question.
fn converse(
    svc: &Service,
    tenant: &str,
    handle: &str,
    mut next: impl FnMut(u64, &Question, Option<&str>) -> Result<String, CliError>,
) -> Result<Closing, CliError> {
    let mut reply = svc.converse(tenant, handle, None).map_err(|e| CliError::core(&e))?;
    loop {
        match reply {
            Reply::Question { step, question, notice } => {
                let text = next(step, &question, notice.as_deref())?;
                log::info!("step {step}: {} <- '{text}'", question.id);
                let turn = Turn { step, answer: Answer::FreeText(text) };
                reply = svc.converse(tenant, handle, Some(turn)).map_err(|e| CliError::core(&e))?;
            }
            Reply::ReadyToCompile { summary, .. } => {
                log::info!("ready: {} answered, {} intents", summary.answered, summary.intents.len());
                return Ok(Closing::Ready);
            }
            Reply::Fallback { message, .. } => return Ok(Closing::Fallback(message)),
            Reply::Abandoned { handle } => {
                return Err(CliError::new(EXIT_ABANDONED, format!("conversation on {handle} was abandoned")))
            }
        }
    }
}

/// Finalize, download and write the output file.
fn finish(svc: &Service, tenant: &str, handle: &str, output: &Path) -> Result<Finalized, CliError> {
    let done = svc
        .finalize(tenant, handle, &CancelToken::new())
        .map_err(|e| CliError::core(&e))?;
    let bytes = svc
        .download(tenant, &done.artifact.handle)
        .map_err(|e| CliError::core(&e))?;
    fs::write(output, &bytes)
        .map_err(|e| CliError::io(format!("cannot write {}: {}", output.display(), e)))?;
    Ok(done)
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    settings: Settings,
    tenant: &str,
    file: &Path,
    sheet: &str,
    answers: Vec<String>,
    output: &Path,
    strict: bool,
    json: bool,
) -> Result<(), CliError> {
    let svc = service(settings)?;
    let ingested = svc
        .ingest_named(tenant, read_input(file)?, sheet)
        .map_err(|e| CliError::core(&e))?;

    let mut script = answers.into_iter();
    let closing = converse(&svc, tenant, &ingested.handle, |step, question, notice| {
        if !json {
            if let Some(notice) = notice {
                eprintln!("  {}", notice);
            }
            eprintln!("[{}] {}", step, question.prompt);
        }
        Ok(script.next().unwrap_or_else(|| "done".to_string()))
    })?;

    let unused = script.count();
    if unused > 0 {
        log::warn!("{unused} scripted answer(s) left unused");
    }
    if let Closing::Fallback(message) = &closing {
        if strict {
            return Err(CliError::new(EXIT_FALLBACK, message.clone())
                .with_hint("rephrase the answers or name columns exactly"));
        }
        eprintln!("warning: {}", message);
    }

    let done = finish(&svc, tenant, &ingested.handle, output)?;
    if json {
        let out = serde_json::to_string_pretty(&done).map_err(|e| CliError::error(e.to_string()))?;
        println!("{}", out);
    } else {
        print_finalized(&done, output);
    }
    Ok(())
}

fn cmd_chat(settings: Settings, tenant: &str, file: &Path, sheet: &str, output: &Path) -> Result<(), CliError> {
    let svc = service(settings)?;
    let ingested = svc
        .ingest_named(tenant, read_input(file)?, sheet)
        .map_err(|e| CliError::core(&e))?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let closing = converse(&svc, tenant, &ingested.handle, |step, question, notice| {
        let mut out = io::stdout().lock();
        print_question(&mut out, step, question, notice).map_err(|e| CliError::io(e.to_string()))?;
        match lines.next() {
            Some(line) => line.map_err(|e| CliError::io(e.to_string())),
            None => Ok("done".to_string()),
        }
    })?;

    if let Closing::Fallback(message) = closing {
        println!("{}", message);
    }
    let done = finish(&svc, tenant, &ingested.handle, output)?;
    print_finalized(&done, output);
    Ok(())
}

fn print_question(out: &mut impl Write, step: u64, question: &Question, notice: Option<&str>) -> io::Result<()> {
    if let Some(notice) = notice {
        writeln!(out, "  {}", notice)?;
    }
    writeln!(out, "[{}] {}", step, question.prompt)?;
    match &question.kind {
        QuestionKind::MultipleChoice { options } => {
            for opt in options {
                writeln!(out, "    - {}", opt.label)?;
            }
        }
        QuestionKind::YesNo => writeln!(out, "    (yes/no)")?,
        QuestionKind::FreeText => {}
    }
    write!(out, "> ")?;
    out.flush()
}

fn print_finalized(done: &Finalized, output: &Path) {
    if done.plan.is_empty() {
        println!("No changes applied.");
    } else {
        println!("Plan:");
        for (i, op) in done.plan.operations().iter().enumerate() {
            println!("  {}. {}", i + 1, op.describe());
        }
    }
    for note in done.plan.notes() {
        println!("  note: {}", note);
    }
    for line in &done.artifact.log {
        println!("  {}", line);
    }
    for delta in &done.artifact.sheets {
        match delta.before {
            Some(before) if before != delta.after => println!("  {}: {} -> {} rows", delta.sheet, before, delta.after),
            Some(_) => {}
            None => println!("  {}: new, {} rows", delta.sheet, delta.after),
        }
    }
    for merge in &done.artifact.merges {
        println!("  {}: {} unmatched rows", merge.target, merge.unmatched_count);
    }
    if done.artifact.coerced_cells > 0 {
        println!("  {} cells coerced", done.artifact.coerced_cells);
    }
    println!(
        "Wrote {} ({} bytes, blake3 {})",
        output.display(),
        done.artifact.size_bytes,
        &done.artifact.digest[..12.min(done.artifact.digest.len())]
    );
}

// ============================================================================
// config
// ============================================================================

fn cmd_config(cmd: ConfigCommands, path: Option<&Path>) -> Result<(), CliError> {
    match cmd {
        ConfigCommands::Path => {
            let path = path.map(Path::to_path_buf).unwrap_or_else(Settings::config_path);
            println!("{}", path.display());
        }
        ConfigCommands::Init => {
            let written = Settings::write_default_file().map_err(CliError::io)?;
            println!("{}", written.display());
        }
        ConfigCommands::Show => {
            let settings = load_settings(path)?;
            let out = serde_json::to_string_pretty(&settings).map_err(|e| CliError::error(e.to_string()))?;
            println!("{}", out);
        }
    }
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
    /// Structured form, printed instead of the message under --json.
    pub body: Option<ErrorBody>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None, body: None }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(EXIT_IO, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(EXIT_CONFIG, msg)
    }

    /// Create error from a pipeline error with its exit code and a hint.
    pub fn core(err: &CoreError) -> Self {
        let body = err.to_body();
        let hint = match &body.kind {
            ErrorKind::InvalidWorkbook => {
                Some("expected .xlsx, .xls, .ods, or comma/tab separated text".to_string())
            }
            ErrorKind::EmptyDataset => {
                Some("every sheet is blank; check the sheet has a header row".to_string())
            }
            ErrorKind::UnknownColumn => body
                .column
                .as_ref()
                .map(|c| format!("'{c}' is not a column; `swr analyze` lists the columns")),
            ErrorKind::ExecutionAborted => {
                Some("no output was written; run again".to_string())
            }
            _ => None,
        };
        Self { code: error_exit_code(body.kind), message: err.to_string(), hint, body: Some(body) }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
