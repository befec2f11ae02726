use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use loopgrid_headless::{HeadlessError, HeadlessRunner, KeyScript, RunnerConfig};

const DEFAULT_SCRIPT: &str = "down 1; wait 500; up 1; down 2; wait 300; up 2; render 30";

#[derive(Parser)]
#[command(name = "loopgrid-headless")]
#[command(about = "Run a scripted looper session without a display", long_about = None)]
struct Cli {
    /// JSON config with optional "looper" and "camera" sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Key script file
    #[arg(short, long, conflicts_with = "inline")]
    script: Option<PathBuf>,

    /// Inline key script, steps separated by ';'
    #[arg(short, long, default_value = DEFAULT_SCRIPT)]
    inline: String,

    /// Pretty-print the JSON summary
    #[arg(long)]
    pretty: bool,
}

fn run(cli: Cli) -> Result<String, HeadlessError> {
    let config = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };

    let text = match &cli.script {
        Some(path) => std::fs::read_to_string(path).map_err(|source| HeadlessError::Io {
            path: path.clone(),
            source,
        })?,
        None => cli.inline.clone(),
    };
    let script = KeyScript::parse(&text)?;
    log::info!(
        "Running {} steps ({} ms of waits)",
        script.steps().len(),
        script.total_wait().as_millis()
    );

    let summary = HeadlessRunner::new(config)?.run(&script)?;
    let json = if cli.pretty {
        serde_json::to_string_pretty(&summary)
    } else {
        serde_json::to_string(&summary)
    };
    json.map_err(|e| HeadlessError::Config(format!("failed to encode summary: {}", e)))
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse()) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
