//! sift entrypoint: an interactive, incremental line filter.

use std::fs::File;
use std::io::{BufRead, BufReader, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Once};

use clap::Parser;
use clap::error::ErrorKind;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use core_config::Layout;
use core_hub::CancelToken;
use core_line::IdGen;
use core_source::Source;
use core_terminal::{CrosstermScreen, Screen};

mod app;
mod error;
mod filter_loop;
mod input_loop;
mod query_exec;
mod sig;

use app::{App, Options};
use error::AppError;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "sift", version, about = "Interactive filtering of a line stream")]
struct Args {
    /// File to filter; stdin when omitted.
    pub file: Option<PathBuf>,
    /// Initial query.
    #[arg(long)]
    pub query: Option<String>,
    /// Matcher selected at startup (IgnoreCase, CaseSensitive, SmartCase,
    /// Regexp, Fuzzy, or a configured custom matcher).
    #[arg(long = "initial-matcher", alias = "initial-filter", value_name = "NAME")]
    pub initial_matcher: Option<String>,
    /// List orientation: top-down or bottom-up.
    #[arg(long)]
    pub layout: Option<Layout>,
    /// Prompt shown in front of the query.
    #[arg(long)]
    pub prompt: Option<String>,
    /// Select automatically when the input has exactly one line.
    #[arg(long = "select-1")]
    pub select_one: bool,
    /// Print the query on its own line before the selection.
    #[arg(long = "print-query")]
    pub print_query: bool,
    /// Retain at most N input lines, discarding the oldest.
    #[arg(long = "buffer-size", value_name = "N")]
    pub buffer_size: Option<usize>,
    /// Line the cursor starts on.
    #[arg(long = "initial-index", value_name = "N")]
    pub initial_index: Option<usize>,
    /// Alternative rc-file path.
    #[arg(long)]
    pub rcfile: Option<PathBuf>,
    /// Split each line at the first NUL: display the left half, output the
    /// right.
    #[arg(long = "null")]
    pub null: bool,
    /// Marker drawn in front of selected lines.
    #[arg(long = "selection-prefix", value_name = "S")]
    pub selection_prefix: Option<String>,
    /// Pipe the result to this command instead of printing it.
    #[arg(long, value_name = "CMD")]
    pub exec: Option<String>,
    /// Exit status when the user cancels.
    #[arg(long = "on-cancel", value_enum, default_value = "success")]
    pub on_cancel: OnCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OnCancel {
    Success,
    Error,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            // Shown and done: the ignorable path.
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    let _log_guard = init_tracing();
    install_panic_hook();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.ignorable() => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("sift: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

/// Traces go to a file (the terminal is busy); enabled only when
/// `SIFT_TRACE` (or, failing that, `RUST_LOG`) holds a filter expression.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = std::env::var("SIFT_TRACE")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()?;
    let appender = tracing_appender::rolling::never(std::env::temp_dir(), "sift.trace.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;
    info!(target: "runtime", "trace_enabled");
    Some(guard)
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

fn run(args: Args) -> Result<(), AppError> {
    let config = core_config::load_from(args.rcfile.clone())?;
    let root = CancelToken::new();

    let (reader, name, is_infinite): (Box<dyn BufRead + Send>, String, bool) = match &args.file {
        Some(path) => {
            let file = File::open(path)
                .map_err(|err| AppError::setup(format!("open {}", path.display()), err.into()))?;
            (
                Box::new(BufReader::new(file)),
                path.display().to_string(),
                false,
            )
        }
        None => {
            let stdin = std::io::stdin();
            if stdin.is_terminal() {
                // Nothing piped in and no file named.
                return Err(AppError::NoInput);
            }
            (Box::new(BufReader::new(stdin)), "stdin".into(), true)
        }
    };

    let source = Arc::new(Source::new(
        name,
        reader,
        is_infinite,
        Arc::new(IdGen::new()),
        args.buffer_size.unwrap_or(0),
        args.null,
        true,
    ));

    let mut options = Options::from_config(&config);
    if let Some(prompt) = args.prompt {
        options.prompt = prompt;
    }
    if let Some(layout) = args.layout {
        options.layout = layout;
    }
    if let Some(prefix) = args.selection_prefix {
        options.selection_prefix = prefix;
    }
    options.initial_query = args.query;
    options.initial_index = args.initial_index;
    options.select_one = args.select_one;
    options.print_query = args.print_query;
    options.cancel_is_error = args.on_cancel == OnCancel::Error;
    options.exec = args.exec;

    let screen: Arc<dyn Screen> = Arc::new(CrosstermScreen::new(root.clone()));
    let app = App::new(
        &config,
        options,
        args.initial_matcher.as_deref(),
        source,
        screen,
        root,
    )?;
    app.run()
}
