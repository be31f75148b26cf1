mod commands;
mod render;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use calstore_core::ModType;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calstore")]
#[command(about = "Query, edit and sync a single-file iCalendar store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which instances of a recurring object an edit applies to.
#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Only the given instance
    This,
    /// The given instance and every later one
    Future,
    /// The given instance and every earlier one
    Prior,
    /// The whole series
    All,
}

impl From<Mode> for ModType {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::This => ModType::ThisInstanceOnly,
            Mode::Future => ModType::ThisAndFuture,
            Mode::Prior => ModType::ThisAndPrior,
            Mode::All => ModType::AllInstances,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List objects, by default the next three days
    List {
        /// Raw query, e.g. '(contains? "summary" "standup")'
        #[arg(short, long, conflicts_with_all = ["from", "to"])]
        query: Option<String>,

        /// Show objects from this date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        from: Option<String>,

        /// Show objects until this date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        to: Option<String>,
    },
    /// Print one object as iCalendar
    Get {
        uid: String,

        /// Recurrence id of a single instance, e.g. 20250320T150000Z
        #[arg(short, long)]
        rid: Option<String>,
    },
    /// Create objects from an iCalendar file, or a quick event from flags
    New {
        /// iCalendar file to import ("-" for stdin)
        #[arg(long, conflicts_with_all = ["title", "start"])]
        file: Option<String>,

        /// Event title
        title: Option<String>,

        /// Start date/time (e.g., "2025-03-20" or "2025-03-20T15:00")
        #[arg(short, long, requires = "title")]
        start: Option<String>,

        /// Duration (e.g., "30m", "1h", "2h 30m")
        #[arg(short, long, default_value = "1h")]
        duration: String,

        /// Event location
        #[arg(short, long)]
        location: Option<String>,
    },
    /// Replace objects with the contents of an iCalendar file
    Modify {
        /// iCalendar file ("-" for stdin)
        file: String,

        #[arg(short, long, value_enum, default_value = "all")]
        mode: Mode,
    },
    /// Remove an object or some of its instances
    Remove {
        uid: String,

        #[arg(short, long)]
        rid: Option<String>,

        #[arg(short, long, value_enum, default_value = "all")]
        mode: Mode,
    },
    /// Apply an incoming iTIP message (PUBLISH, REQUEST, REPLY or CANCEL)
    Receive {
        /// iCalendar file ("-" for stdin)
        file: String,
    },
    /// Show busy periods
    Freebusy {
        /// Calendar user addresses; the first configured account when empty
        users: Vec<String>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },
    /// Follow changes to a query until interrupted
    Watch {
        #[arg(default_value = "#t")]
        query: String,
    },
    /// Apply changes other stores wrote to the sync log
    Sync,
    /// Show the store revision and capabilities
    Info,
    /// Show config and data paths
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        // Target prefixes match both calstore_cli and calstore_core.
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("calstore=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { query, from, to } => commands::list::run(query, from.as_deref(), to.as_deref()),
        Commands::Get { uid, rid } => commands::get::run(&uid, rid.as_deref()),
        Commands::New {
            file,
            title,
            start,
            duration,
            location,
        } => match (file, title, start) {
            (Some(file), _, _) => commands::new::from_file(&file),
            (None, Some(title), Some(start)) => commands::new::quick(&title, &start, &duration, location.as_deref()),
            _ => anyhow::bail!("Pass either --file or a title with --start"),
        },
        Commands::Modify { file, mode } => commands::modify::run(&file, mode.into()),
        Commands::Remove { uid, rid, mode } => commands::remove::run(&uid, rid, mode.into()),
        Commands::Receive { file } => commands::receive::run(&file),
        Commands::Freebusy { users, from, to } => commands::freebusy::run(&users, from.as_deref(), to.as_deref()),
        Commands::Watch { query } => commands::watch::run(&query).await,
        Commands::Sync => commands::sync::run(),
        Commands::Info => commands::info::run(),
        Commands::Config => commands::config::run(),
    }
}
