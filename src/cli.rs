//! Command-line interface and REPL

use anyhow::{bail, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::SavedItems;
use crate::host::console::ConsoleHost;
use crate::instance::EmberInstance;

/// Feedback instance id used for feedbacks evaluated from the prompt
const REPL_FEEDBACK_ID: &str = "repl";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Action { id: String, options: Value },
    Feedback { id: String, options: Value },
    Vars,
    State,
    Record(bool),
    Saved,
    Run(usize),
    Help,
    Quit,
}

/// Parse one prompt line; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match word {
        "action" | "a" => {
            let (id, options) = id_and_options(rest)?;
            Command::Action { id, options }
        },
        "feedback" | "f" => {
            let (id, options) = id_and_options(rest)?;
            Command::Feedback { id, options }
        },
        "vars" | "v" => Command::Vars,
        "state" | "s" => Command::State,
        "record" => match rest {
            "on" => Command::Record(true),
            "off" => Command::Record(false),
            other => bail!("record expects on|off, got '{}'", other),
        },
        "saved" => Command::Saved,
        "run" => Command::Run(
            rest.parse()
                .with_context(|| format!("run expects an index, got '{}'", rest))?,
        ),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("Unknown command '{}' (try help)", other),
    };
    Ok(Some(command))
}

fn id_and_options(rest: &str) -> Result<(String, Value)> {
    let (id, json) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    if id.is_empty() {
        bail!("Missing id");
    }
    let json = json.trim();
    let options = if json.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(json).with_context(|| format!("Invalid JSON options: {}", json))?
    };
    Ok((id.to_string(), options))
}

/// Read prompt lines on a dedicated thread
///
/// Ctrl-C / Ctrl-D at the prompt arrive as `quit`.
pub fn spawn_reader(prompt: &'static str) -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    warn!("REPL unavailable: {}", e);
                    return;
                },
            };
            loop {
                match editor.readline(prompt) {
                    Ok(line) => {
                        let _ = editor.add_history_entry(line.as_str());
                        if tx.send(line).is_err() {
                            break;
                        }
                    },
                    Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                        let _ = tx.send("quit".to_string());
                        break;
                    },
                    Err(e) => {
                        warn!("REPL read failed: {}", e);
                        break;
                    },
                }
            }
            debug!("REPL reader stopped");
        })
        .context("Failed to start REPL thread")?;
    Ok(rx)
}

pub struct Repl {
    host: Arc<ConsoleHost>,
    saved: SavedItems,
}

impl Repl {
    pub fn new(host: Arc<ConsoleHost>, saved: SavedItems) -> Self {
        Self { host, saved }
    }

    /// Replace the saved items after a config reload
    pub fn set_saved(&mut self, saved: SavedItems) {
        self.saved = saved;
    }

    /// Handle one line; returns `false` once the user asked to quit
    pub async fn handle_line(&self, instance: &EmberInstance, line: &str) -> bool {
        match parse_command(line) {
            Ok(Some(Command::Quit)) => false,
            Ok(Some(command)) => {
                if let Err(e) = self.execute(instance, command).await {
                    println!("{} {:#}", "error:".red().bold(), e);
                }
                true
            },
            Ok(None) => true,
            Err(e) => {
                println!("{} {:#}", "error:".red().bold(), e);
                true
            },
        }
    }

    async fn execute(&self, instance: &EmberInstance, command: Command) -> Result<()> {
        match command {
            Command::Action { id, options } => {
                instance.execute_action(&id, options).await?;
                instance.flush_updates().await;
                println!("{} {}", "✓".green(), id);
            },
            Command::Feedback { id, options } => {
                let result = instance.check_feedback(REPL_FEEDBACK_ID, &id, options);
                let shown = if result {
                    "true".green().bold()
                } else {
                    "false".yellow()
                };
                println!("{} = {}", id, shown);
            },
            Command::Vars => {
                let variables = self.host.variables();
                if variables.is_empty() {
                    println!("{}", "(no variables)".dimmed());
                }
                for (id, value) in variables {
                    println!("  {} = {}", id.cyan(), value);
                }
            },
            Command::State => self.print_state(instance),
            Command::Record(on) => instance.set_recording(on),
            Command::Saved => self.print_saved(),
            Command::Run(index) => {
                let saved = self
                    .saved
                    .actions
                    .get(index)
                    .with_context(|| format!("No saved action #{}", index))?;
                println!("{} {}", "▶".cyan(), saved.action_id);
                instance
                    .execute_action(&saved.action_id, Value::Object(saved.options.clone()))
                    .await?;
                instance.flush_updates().await;
            },
            Command::Help => print_help(),
            Command::Quit => {},
        }
        Ok(())
    }

    fn print_state(&self, instance: &EmberInstance) {
        println!("\n{}", "=== Ember+ Instance ===".bold().cyan());
        println!("  Link:      {:?}", instance.link_state());
        match instance.status() {
            Some(status) => println!("  Status:    {}", status.to_string().green()),
            None => println!("  Status:    {}", "-".dimmed()),
        }
        let selection = instance.selection();
        println!(
            "  Selection: matrix {} target {} source {}",
            selection.matrix, selection.target, selection.source
        );
        println!(
            "  Recording: {}",
            if instance.is_recording() { "on" } else { "off" }
        );

        println!("\n{}", "Monitored parameters:".bold());
        for (path, cached) in instance.monitored_parameters() {
            match cached {
                Some(cached) => println!(
                    "  {} {} = {}",
                    path.yellow(),
                    cached.label(),
                    cached
                        .value()
                        .map(|v| v.to_display_string())
                        .unwrap_or_else(|| "-".to_string())
                        .green()
                ),
                None => println!("  {} {}", path.yellow(), "(not resolved)".dimmed()),
            }
        }
        println!();
    }

    fn print_saved(&self) {
        println!("\n{}", "Saved actions:".bold());
        for (index, action) in self.saved.actions.iter().enumerate() {
            println!(
                "  [{}] {} {}",
                index.to_string().cyan(),
                action.action_id.yellow(),
                Value::Object(action.options.clone())
            );
        }
        println!("\n{}", "Saved feedbacks:".bold());
        for feedback in &self.saved.feedbacks {
            println!(
                "  {} {}",
                feedback.feedback_id.yellow(),
                Value::Object(feedback.options.clone())
            );
        }
        println!();
    }
}

fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (usage, text) in [
        ("action <id> [json]", "execute an action"),
        ("feedback <id> [json]", "evaluate a feedback"),
        ("vars", "show host variables"),
        ("state", "show connection, selection and cache"),
        ("record on|off", "toggle action recording"),
        ("saved", "list saved actions and feedbacks"),
        ("run <n>", "execute saved action n"),
        ("quit", "exit"),
    ] {
        println!("  {:<22} {}", usage.cyan(), text);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_action_with_options() {
        let command = parse_command(r#"action setValueInt {"path": "1.2", "value": 5}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            Command::Action {
                id: "setValueInt".to_string(),
                options: json!({ "path": "1.2", "value": 5 }),
            }
        );
    }

    #[test]
    fn test_parse_defaults_to_empty_options() {
        assert_eq!(
            parse_command("action take").unwrap(),
            Some(Command::Action {
                id: "take".to_string(),
                options: json!({}),
            })
        );
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("vars").unwrap(), Some(Command::Vars));
        assert_eq!(parse_command("record on").unwrap(), Some(Command::Record(true)));
        assert_eq!(parse_command("run 2").unwrap(), Some(Command::Run(2)));
        assert_eq!(parse_command("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("record maybe").is_err());
        assert!(parse_command("run x").is_err());
        assert!(parse_command("action").is_err());
        assert!(parse_command("feedback parameter {broken").is_err());
        assert!(parse_command("dance").is_err());
    }
}
