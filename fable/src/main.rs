//! Terminal client for AI-narrated interactive fiction.
//!
//! Reads player actions line by line from stdin and streams the narrator's
//! replies to stdout:
//!
//! ```bash
//! cargo run -p fable -- --setting "A drowned city" --description "A salvage diver"
//! ```

mod headless;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use fable_core::counter::DEFAULT_EVENT_TIMER;
use fable_core::{ClaudeNarrator, Difficulty, GameSettings, Language, NarratorConfig, SaveStore};

#[derive(Parser, Debug)]
#[command(
    name = "fable",
    about = "AI-narrated interactive fiction in the terminal",
    version
)]
struct Cli {
    /// Where the story takes place
    #[arg(long, default_value = "A forgotten kingdom on the edge of ruin")]
    setting: String,

    /// Who your character is
    #[arg(long, default_value = "A wandering sellsword with a troubled past")]
    description: String,

    /// normal or hardcore
    #[arg(long, default_value = "normal")]
    difficulty: Difficulty,

    /// Narrative style requested from the narrator
    #[arg(long, default_value = "")]
    style: String,

    /// Actions between random events
    #[arg(long, default_value_t = DEFAULT_EVENT_TIMER)]
    event_timer: u32,

    /// Story language (en, ru)
    #[arg(long, default_value = "en")]
    language: Language,

    /// Directory for the save slot and exports
    #[arg(long, default_value = "saves")]
    save_dir: PathBuf,

    /// Claude model to narrate with
    #[arg(long)]
    model: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Continue from the save slot instead of starting a new story
    #[arg(long)]
    resume: bool,
}

impl Cli {
    fn settings(&self) -> GameSettings {
        GameSettings::new(self.setting.clone(), self.description.clone())
            .with_difficulty(self.difficulty)
            .with_narrative_style(self.style.clone())
            .with_event_timer(self.event_timer)
            .with_language(self.language)
    }
}

fn init_tracing(fallback_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let client = match claude::Claude::from_env() {
        Ok(client) => client,
        Err(_) => {
            eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
            eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
            process::exit(1);
        }
    };

    let mut config = NarratorConfig::default();
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    let narrator = Arc::new(ClaudeNarrator::with_config(client, config));
    let store = SaveStore::new(cli.save_dir.clone());

    if let Err(e) = headless::run_headless(narrator, cli.settings(), store, cli.resume).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
