//! REPL – operator shell for the ATPneumatics CSC.
//!
//! Input lines:
//!   <command> [pressure]  – any pneumatics command, e.g. `m1SetPressure 4.5`
//!   start | enable | disable | standby | exitControl
//!   state                 – print the summary state
//!   help                  – show this list
//!   quit | exit           – close the connections and leave

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use tokio::runtime::Handle;

use atpneumatics_csc::PneumaticsCsc;
use atpneumatics_types::{Command, LifecycleCommand, PneumaticsError, SummaryState};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Empty,
    Command(Command, Option<f64>),
    Lifecycle(LifecycleCommand),
    State,
    Help,
    Quit,
}

/// Parse a REPL line.  Command names are matched exactly; the lifecycle
/// words and shell words are case-insensitive.
pub fn parse_line(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Input::Empty);
    };
    let rest: Vec<&str> = words.collect();

    let shell = match head.to_ascii_lowercase().as_str() {
        "help" | "?" => Some(Input::Help),
        "quit" | "exit" => Some(Input::Quit),
        "state" => Some(Input::State),
        "start" => Some(Input::Lifecycle(LifecycleCommand::Start)),
        "enable" => Some(Input::Lifecycle(LifecycleCommand::Enable)),
        "disable" => Some(Input::Lifecycle(LifecycleCommand::Disable)),
        "standby" => Some(Input::Lifecycle(LifecycleCommand::Standby)),
        "exitcontrol" => Some(Input::Lifecycle(LifecycleCommand::ExitControl)),
        _ => None,
    };
    if let Some(input) = shell {
        if !rest.is_empty() {
            return Err(format!("'{head}' takes no arguments"));
        }
        return Ok(input);
    }

    let command: Command = head.parse().map_err(|e: PneumaticsError| e.to_string())?;
    match (command.takes_pressure(), rest.as_slice()) {
        (true, [value]) => {
            let pressure = value
                .parse::<f64>()
                .ok()
                .filter(|p| p.is_finite())
                .ok_or_else(|| format!("'{value}' is not a pressure"))?;
            Ok(Input::Command(command, Some(pressure)))
        }
        (true, _) => Err(format!("usage: {command} <pressure>")),
        (false, []) => Ok(Input::Command(command, None)),
        (false, _) => Err(format!("'{command}' takes no arguments")),
    }
}

/// Read lines from stdin until EOF, `quit`, or `shutdown` is set.
pub fn run(csc: Arc<PneumaticsCsc>, runtime: Handle, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", format!("atpneumatics[{}]>", csc.summary_state()).bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        match parse_line(&line) {
            Ok(Input::Empty) => {}
            Ok(Input::Help) => cmd_help(),
            Ok(Input::State) => println!("  {}", csc.summary_state().to_string().bold()),
            Ok(Input::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Ok(Input::Lifecycle(command)) => {
                let result = runtime.block_on(csc.lifecycle(command));
                report(command.name(), result);
                if csc.summary_state() == SummaryState::Offline {
                    break;
                }
            }
            Ok(Input::Command(command, pressure)) => {
                let result = runtime.block_on(csc.execute(command, pressure));
                report(command.name(), result);
            }
            Err(msg) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                msg.yellow(),
                "help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn report(name: &str, result: Result<(), PneumaticsError>) {
    match result {
        Ok(()) => println!("  {} {}", "✓".green().bold(), name),
        Err(e) => println!("  {} {}: {}", "✗".red().bold(), name, e),
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Lifecycle".bold().underline());
    println!("  {}  – connect and go to DISABLED", "start".bold().cyan());
    println!("  {} / {}", "enable".bold().cyan(), "disable".bold().cyan());
    println!("  {}  – disconnect and go to STANDBY", "standby".bold().cyan());
    println!("  {}  – go OFFLINE and leave", "exitControl".bold().cyan());
    println!();
    println!("{}", "Pneumatics (ENABLED only)".bold().underline());
    for command in Command::ALL {
        if command.takes_pressure() {
            println!("  {} <pressure>", command.name().bold().cyan());
        } else {
            println!("  {}", command.name().bold().cyan());
        }
    }
    println!();
    println!("  {}  – print the summary state", "state".bold().cyan());
    println!("  {}  – exit the shell", "quit  exit".bold().cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_empty() {
        assert_eq!(parse_line("").unwrap(), Input::Empty);
        assert_eq!(parse_line("   \n").unwrap(), Input::Empty);
    }

    #[test]
    fn every_command_name_parses() {
        for command in Command::ALL {
            let line = if command.takes_pressure() {
                format!("{} 3.5", command.name())
            } else {
                command.name().to_string()
            };
            let expected = Input::Command(command, command.takes_pressure().then_some(3.5));
            assert_eq!(parse_line(&line).unwrap(), expected, "{line}");
        }
    }

    #[test]
    fn wire_tokens_are_accepted_too() {
        assert_eq!(
            parse_line("cmd_openM1Cover").unwrap(),
            Input::Command(Command::OpenM1Cover, None)
        );
    }

    #[test]
    fn pressure_is_required_and_numeric() {
        assert!(parse_line("m1SetPressure").is_err());
        assert!(parse_line("m2SetPressure high").is_err());
        assert!(parse_line("m2SetPressure NaN").is_err());
        assert!(parse_line("m1SetPressure 1 2").is_err());
    }

    #[test]
    fn plain_commands_take_no_arguments() {
        assert!(parse_line("openM1Cover now").is_err());
    }

    #[test]
    fn lifecycle_and_shell_words() {
        assert_eq!(
            parse_line("Enable").unwrap(),
            Input::Lifecycle(LifecycleCommand::Enable)
        );
        assert_eq!(
            parse_line("exitControl").unwrap(),
            Input::Lifecycle(LifecycleCommand::ExitControl)
        );
        assert_eq!(parse_line("state").unwrap(), Input::State);
        assert_eq!(parse_line("quit").unwrap(), Input::Quit);
        assert_eq!(parse_line("?").unwrap(), Input::Help);
        assert!(parse_line("state now").is_err());
    }

    #[test]
    fn unknown_words_are_reported() {
        let err = parse_line("openM3Cover").unwrap_err();
        assert!(err.contains("openM3Cover"), "{err}");
    }
}
