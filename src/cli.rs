use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pdfdex::{
    embedding::CommandEmbedder,
    reranker::RerankMode,
    search::RetrievalMode,
};

#[derive(Debug, Parser)]
#[command(
    name = "pdfdex",
    version,
    about = "Search a local PDF library by keyword, phrase, or embedding"
)]
pub struct Cli {
    /// Settings file (defaults to $PDFDEX_CONFIG, then the XDG config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search the loaded library
    Search(SearchArgs),
    /// Extract page text and embeddings for new PDFs
    Ingest(IngestArgs),
    /// Show what is loaded and which search modes are available
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

/// External embedding program, shared by `search` and `ingest`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct EmbedArgs {
    /// Program that reads text on stdin and prints a JSON vector
    #[arg(long, value_name = "PROG")]
    pub embed_cmd: Option<PathBuf>,

    /// Argument passed to the embedding program (repeatable)
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    pub embed_arg: Vec<String>,
}

impl EmbedArgs {
    pub fn embedder(&self) -> Option<CommandEmbedder> {
        self.embed_cmd
            .as_ref()
            .map(|program| CommandEmbedder::new(program, self.embed_arg.clone()))
    }
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Retrieval mode
    #[arg(short, long, value_enum, default_value_t = RetrievalMode::Bm25)]
    pub mode: RetrievalMode,

    /// Rerank BM25 candidates
    #[arg(short, long, value_enum, default_value_t = RerankMode::None)]
    pub rerank: RerankMode,

    /// Number of results to return (defaults to max_results)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Folder to search instead of the configured set (repeatable)
    #[arg(long = "folder", value_name = "DIR")]
    pub folders: Vec<PathBuf>,

    #[command(flatten)]
    pub embed: EmbedArgs,
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Folders to ingest (defaults to the configured set)
    #[arg(value_name = "DIR")]
    pub folders: Vec<PathBuf>,

    /// Run the text extraction stage
    #[arg(long)]
    pub text: bool,

    /// Run the embedding stage
    #[arg(long)]
    pub embeddings: bool,

    /// Worker threads (defaults to the configured value)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Abandon a document after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub embed: EmbedArgs,
}

impl IngestArgs {
    /// Which stages to run as (text, embeddings). Without stage flags the
    /// text stage always runs and the embedding stage runs when an embedder
    /// is configured.
    pub fn stages(&self) -> (bool, bool) {
        if self.text || self.embeddings {
            (self.text, self.embeddings)
        } else {
            (true, self.embed.embed_cmd.is_some())
        }
    }
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Folder to inspect instead of the configured set (repeatable)
    #[arg(long = "folder", value_name = "DIR")]
    pub folders: Vec<PathBuf>,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "pdfdex",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["pdfdex", "search", "quick fox"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "quick fox");
                assert_eq!(args.mode, RetrievalMode::Bm25);
                assert_eq!(args.rerank, RerankMode::None);
                assert_eq!(args.count, None);
                assert!(!args.json);
                assert!(args.folders.is_empty());
                assert!(args.embed.embed_cmd.is_none());
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_modes() {
        let cli = Cli::parse_from([
            "pdfdex", "search", "fox", "--mode", "bm25", "--rerank", "exact",
            "--folder", "/a", "--folder", "/b", "-n", "5",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.rerank, RerankMode::ExactBoost);
                assert_eq!(args.folders.len(), 2);
                assert_eq!(args.count, Some(5));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_embed_command_with_arguments() {
        let cli = Cli::parse_from([
            "pdfdex",
            "search",
            "fox",
            "--mode",
            "vector",
            "--embed-cmd",
            "embed.sh",
            "--embed-arg",
            "--model",
            "--embed-arg",
            "small",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.mode, RetrievalMode::Vector);
                assert_eq!(args.embed.embed_arg, ["--model", "small"]);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn ingest_stage_selection() {
        let stages = |argv: &[&str]| match Cli::parse_from(argv).command {
            Command::Ingest(args) => args.stages(),
            _ => panic!("expected ingest command"),
        };
        assert_eq!(stages(&["pdfdex", "ingest"]), (true, false));
        assert_eq!(
            stages(&["pdfdex", "ingest", "--embed-cmd", "e"]),
            (true, true)
        );
        assert_eq!(stages(&["pdfdex", "ingest", "--embeddings"]), (false, true));
        assert_eq!(stages(&["pdfdex", "ingest", "--text"]), (true, false));
    }

    #[test]
    fn global_flags_anywhere() {
        let cli = Cli::parse_from(["pdfdex", "status", "-vv", "--json"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
