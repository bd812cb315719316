//! Line-oriented play.
//!
//! Protocol:
//! - Lines starting with `#` are commands (save, load, status, ...)
//! - Any other line is sent to the narrator as a player action
//! - Errors are printed as `[ERROR] <message>` and leave the story untouched

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use fable_core::{
    DisabledIllustrator, GameSession, GameSettings, Narrator, SaveStore, SessionError,
};

const HELP: &[(&str, &str)] = &[
    ("#status", "Show the character sheet"),
    ("#refresh", "Ask the narrator for an up-to-date character sheet"),
    ("#journal", "Show the journal"),
    ("#npcs", "List characters you have met"),
    ("#save", "Save to the storage slot"),
    ("#export [path]", "Write a save file"),
    ("#load [path]", "Load the storage slot, or a save file"),
    ("#restart", "Start a new story with the same settings"),
    ("#gm <question>", "Ask the game master out of character"),
    ("#item <name>", "Describe an inventory item"),
    ("#help", "Show this help"),
    ("#quit", "Exit the game"),
];

/// Run the game on stdin/stdout.
pub async fn run_headless(
    narrator: Arc<dyn Narrator>,
    settings: GameSettings,
    store: SaveStore,
    resume: bool,
) -> Result<(), SessionError> {
    let illustrator = Arc::new(DisabledIllustrator);
    tracing::debug!(resume, dir = %store.dir().display(), "starting line session");

    let mut session = if resume && store.has_save().await {
        let saved = store.load().await?;
        GameSession::restore(narrator, illustrator, saved)?
    } else {
        println!("[STARTING] {}", settings.setting);
        GameSession::start(narrator, illustrator, settings).await?
    };

    println!("=== Fable ===");
    print_help();
    println!();
    print_narration(session.last_narration().unwrap_or_default());

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            let (name, arg) = match command.split_once(char::is_whitespace) {
                Some((name, arg)) => (name, arg.trim()),
                None => (command, ""),
            };
            if name == "quit" || name == "exit" {
                println!("Goodbye!");
                break;
            }
            if let Err(e) = run_command(&mut session, &store, name, arg).await {
                tracing::warn!(command = name, error = %e, "command failed");
                println!("[ERROR] {e}");
            }
            stdout.flush().ok();
            continue;
        }

        let mut live = LivePrinter::default();
        let result = session
            .submit_action_streaming(line, |fragment| {
                let visible = live.push(fragment);
                if !visible.is_empty() {
                    print!("{visible}");
                    io::stdout().flush().ok();
                }
            })
            .await;

        match result {
            Ok(outcome) => {
                if live.printed_anything() {
                    println!();
                    println!();
                } else {
                    print_narration(&outcome.narrative);
                }
                if outcome.random_event {
                    println!("[EVENT] A random event was rolled this turn.");
                }
                if let Some(note) = &outcome.journal_entry {
                    println!("[JOURNAL] {note}");
                }
                for name in &outcome.new_npcs {
                    println!("[NPC] You met {name}.");
                }
            }
            Err(e) => {
                if live.printed_anything() {
                    println!();
                }
                println!("[ERROR] {e}");
            }
        }

        session.apply_image_updates();
        stdout.flush().ok();
    }

    Ok(())
}

async fn run_command(
    session: &mut GameSession,
    store: &SaveStore,
    name: &str,
    arg: &str,
) -> Result<(), SessionError> {
    match name {
        "status" => print_status(session),
        "refresh" => {
            session.refresh_status().await?;
            print_status(session);
        }
        "journal" => {
            println!("[JOURNAL]");
            for (i, entry) in session.journal().entries().iter().enumerate() {
                println!("  {}. {entry}", i + 1);
            }
        }
        "npcs" => {
            println!("[NPCS]");
            for npc in session.npcs().iter() {
                match &npc.portrait {
                    Some(portrait) => println!("  {} - {} ({portrait})", npc.name, npc.description),
                    None => println!("  {} - {}", npc.name, npc.description),
                }
            }
        }
        "save" => {
            let path = session.save(store).await?;
            println!("[SAVED] Game saved to {}", path.display());
        }
        "export" => {
            let target = (!arg.is_empty()).then(|| Path::new(arg));
            let path = session.export(store, target).await?;
            println!("[SAVED] Game exported to {}", path.display());
        }
        "load" => {
            if arg.is_empty() {
                session.load(store).await?;
                println!("[LOADED] Game loaded from {}", store.slot_path().display());
            } else {
                session.load_file(arg).await?;
                println!("[LOADED] Game loaded from {arg}");
            }
            print_narration(session.last_narration().unwrap_or_default());
        }
        "restart" => {
            let settings = session.settings().clone();
            session.restart(settings).await?;
            println!("[RESTARTED]");
            print_narration(session.last_narration().unwrap_or_default());
        }
        "gm" => {
            let answer = session.contact_game_master(arg).await?;
            println!("[GM]");
            print_narration(&answer);
        }
        "item" => {
            let description = session.describe_item(arg).await?;
            println!("[ITEM] {arg}");
            print_narration(&description);
        }
        "help" => print_help(),
        _ => println!("[ERROR] Unknown command. Type #help for help."),
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    for (command, description) in HELP {
        println!("  {command:<16} - {description}");
    }
    println!("  (anything else is sent as a player action)");
}

fn print_narration(text: &str) {
    for para in text.split("\n\n") {
        println!("{para}");
    }
    println!();
}

fn print_status(session: &GameSession) {
    let status = session.status();
    println!("[STATUS]");
    for (key, value) in &status.attributes {
        println!("  {key}: {value}");
    }
    if !status.inventory.is_empty() {
        println!("  Inventory:");
        for item in &status.inventory {
            println!("    - {} (x{})", item.name, item.quantity);
        }
    }
    if !status.effects.is_empty() {
        println!("  Effects: {}", status.effects.join(", "));
    }
    println!(
        "  Next random event in: {}",
        session.counter().remaining()
    );
}

/// Filters streamed text so the game data block is never printed.
///
/// Text after `<gamedata` (any case) is swallowed. A trailing `<` that could
/// still grow into the marker is held back until the next fragment.
#[derive(Debug, Default)]
struct LivePrinter {
    buffer: String,
    printed: usize,
    stopped: bool,
}

impl LivePrinter {
    const MARKER: &'static str = "<gamedata";

    fn push(&mut self, fragment: &str) -> String {
        if self.stopped {
            return String::new();
        }
        self.buffer.push_str(fragment);

        let pending = &self.buffer[self.printed..];
        let marker = Self::MARKER.as_bytes();
        let mut end = pending.len();
        for (i, _) in pending.match_indices('<') {
            let rest = &pending.as_bytes()[i..];
            let n = rest.len().min(marker.len());
            if rest[..n].eq_ignore_ascii_case(&marker[..n]) {
                end = i;
                self.stopped = n == marker.len();
                break;
            }
        }

        let visible = pending[..end].to_string();
        self.printed += end;
        visible
    }

    fn printed_anything(&self) -> bool {
        self.printed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_printer_hides_gamedata() {
        let mut live = LivePrinter::default();
        assert_eq!(live.push("The door "), "The door ");
        assert_eq!(live.push("opens.\n<game"), "opens.\n");
        assert_eq!(live.push("data><journal>x</journal>"), "");
        assert_eq!(live.push("</gamedata>"), "");
        assert!(live.printed_anything());
    }

    #[test]
    fn test_live_printer_releases_false_alarm() {
        let mut live = LivePrinter::default();
        assert_eq!(live.push("a <"), "a ");
        assert_eq!(live.push("b> c"), "<b> c");
    }

    #[test]
    fn test_live_printer_marker_is_case_insensitive() {
        let mut live = LivePrinter::default();
        assert_eq!(live.push("Hi <GameData>"), "Hi ");
        assert_eq!(live.push(" more"), "");
    }
}
