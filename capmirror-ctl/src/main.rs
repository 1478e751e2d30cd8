mod control_client;

use control_client::ControlClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Trigger { reset: bool },
    Help,
}

fn parse_command<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(first) = args.next() else {
        return Ok(Command::Help);
    };
    let command = match first.as_str() {
        "status" => Command::Status,
        "trigger" => {
            let mut reset = false;
            for arg in args.by_ref() {
                match arg.as_str() {
                    "--reset" => reset = true,
                    other => anyhow::bail!("unknown trigger option: {other}"),
                }
            }
            Command::Trigger { reset }
        }
        "--help" | "-h" | "help" => Command::Help,
        other => anyhow::bail!("unknown command: {other}"),
    };
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }
    Ok(command)
}

fn print_help() {
    println!("Usage: capmirror-ctl <command>");
    println!("  status             Show the backup job status");
    println!("  trigger            Start a backup run now");
    println!("  trigger --reset    Clear the upload state, then run a full backup");
}

fn main() -> anyhow::Result<()> {
    match parse_command(std::env::args())? {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Status => {
            let client = ControlClient::connect()?;
            let snapshot = client.status()?;
            println!("{}", snapshot.summary_line());
            if let Some(outcome) = snapshot.last_outcome {
                println!("last outcome: {}", outcome.as_str());
            }
            Ok(())
        }
        Command::Trigger { reset } => {
            let client = ControlClient::connect()?;
            let reply = client.trigger(reset)?;
            println!("{reply}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        std::iter::once("capmirror-ctl")
            .chain(parts.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(parse_command(args(&[])).unwrap(), Command::Help);
    }

    #[test]
    fn parses_status_and_trigger() {
        assert_eq!(parse_command(args(&["status"])).unwrap(), Command::Status);
        assert_eq!(
            parse_command(args(&["trigger"])).unwrap(),
            Command::Trigger { reset: false }
        );
        assert_eq!(
            parse_command(args(&["trigger", "--reset"])).unwrap(),
            Command::Trigger { reset: true }
        );
    }

    #[test]
    fn rejects_unknown_commands_and_options() {
        assert!(parse_command(args(&["bogus"])).is_err());
        assert!(parse_command(args(&["trigger", "--force"])).is_err());
        assert!(parse_command(args(&["status", "extra"])).is_err());
    }
}
