pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use perch_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "perch",
    about = "Perch operator CLI",
    long_about = "Operate the perch chat bot store: migrations, config inspection, log import and memory indexing.",
    after_help = "Examples:\n  perch migrate\n  perch import-log logs/perch.log '#perch'\n  perch index '#perch' --reset\n  perch query '#perch' picnic plans --k 5"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a perch.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Print the effective configuration with secrets redacted")]
    Config,
    #[command(about = "Import a `[time] <nick> text` chat log into a channel")]
    ImportLog {
        file: PathBuf,
        channel: String,
    },
    #[command(about = "Segment a channel's history and rebuild its vector collection")]
    Index {
        channel: String,
        #[arg(long, help = "Only index the first N messages")]
        limit: Option<u32>,
        #[arg(long, help = "Drop the existing collection first")]
        reset: bool,
    },
    #[command(about = "Retrieve related conversation windows for a text")]
    Query {
        channel: String,
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(long, help = "Number of anchors to retrieve")]
        k: Option<usize>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions { config_path: cli.config, ..LoadOptions::default() };

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Config => commands::config::run(&options),
        Command::ImportLog { file, channel } => commands::import_log::run(&options, &file, &channel),
        Command::Index { channel, limit, reset } => {
            commands::index::run(&options, commands::index::IndexArgs { channel, limit, reset })
        }
        Command::Query { channel, text, k } => {
            commands::query::run(&options, &channel, &text.join(" "), k)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
