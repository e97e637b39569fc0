use std::path::PathBuf;

use crate::{export::Format, Error};

pub const HELP: &str = "\
Usage: price_monitor [--config PATH] [COMMAND]

Commands:
  run                       Scrape every product once and print alerts (default)
  watch                     Scrape on the configured interval until Ctrl-C
  alerts [--threshold P]    Print price moves of at least P percent
  report                    Print price statistics per product
  export --format csv|json [--out PATH] [--history]
                            Write the catalog; stdout without --out

Options:
  -c, --config PATH         Configuration file (default: price_monitor.yaml,
                            or $PRICE_MONITOR_CONFIG)
  -h, --help                Show this message
";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run,
    Watch,
    Alerts {
        threshold: Option<f64>,
    },
    Report,
    Export {
        format: Format,
        out: Option<PathBuf>,
        history: bool,
    },
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub command: Command,
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, Error> {
    args.next()
        .ok_or_else(|| Error::Usage(format!("Missing value for {flag}")))
}

/// Parses everything after the program name.
pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Args, Error> {
    let mut args = args.into_iter();
    let mut config = None;
    let mut command = None;
    let mut threshold = None;
    let mut format = None;
    let mut out = None;
    let mut history = false;

    while let Some(a) = args.next() {
        match a.as_str() {
            "-c" | "--config" => config = Some(PathBuf::from(value(&mut args, &a)?)),
            "-h" | "--help" => {
                return Ok(Args {
                    config,
                    command: Command::Help,
                })
            }
            "--threshold" => {
                let v = value(&mut args, &a)?;
                threshold = Some(
                    v.parse::<f64>()
                        .map_err(|_| Error::Usage(format!("Invalid threshold: {v}")))?,
                );
            }
            "--format" => format = Some(value(&mut args, &a)?.parse::<Format>()?),
            "-o" | "--out" => out = Some(PathBuf::from(value(&mut args, &a)?)),
            "--history" => history = true,
            "run" | "watch" | "alerts" | "report" | "export" if command.is_none() => {
                command = Some(a);
            }
            _ => return Err(Error::Usage(format!("Unknown arg: {a}"))),
        }
    }

    let command = match command.as_deref() {
        None | Some("run") => Command::Run,
        Some("watch") => Command::Watch,
        Some("alerts") => Command::Alerts { threshold },
        Some("report") => Command::Report,
        Some("export") => Command::Export {
            format: format.ok_or_else(|| Error::Usage("export needs --format".to_owned()))?,
            out,
            history,
        },
        Some(other) => return Err(Error::Usage(format!("Unknown command: {other}"))),
    };
    Ok(Args { config, command })
}
