use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use seam_cli::{execute, CliCommand};
use seam_core::{init_tracing, SeamConfig};

fn cli() -> Command {
    Command::new("seam")
        .version(seam_core::VERSION)
        .about("Build-time seam injection for class-based source trees")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .global(true),
        )
        .subcommand(
            Command::new("instrument")
                .about("Instrument a source file or directory")
                .arg(
                    Arg::new("path")
                        .value_name("PATH")
                        .help("Source file or directory")
                        .required(true),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_name("DIR")
                        .help("Output directory (defaults to the configured output_dir)"),
                )
                .arg(
                    Arg::new("parallel")
                        .long("parallel")
                        .help("Instrument the classes of each unit in parallel")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("sites")
                .about("List the injection sites of a source file")
                .arg(Arg::new("file").value_name("FILE").required(true))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the manifests as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Run a method of a class from a source file")
                .arg(Arg::new("file").value_name("FILE").required(true))
                .arg(
                    Arg::new("class")
                        .long("class")
                        .value_name("CLASS")
                        .required(true),
                )
                .arg(
                    Arg::new("method")
                        .long("method")
                        .value_name("METHOD")
                        .required(true),
                )
                .arg(
                    Arg::new("args")
                        .value_name("ARGS")
                        .help("Arguments: numbers, true/false, null or strings")
                        .num_args(0..)
                        .allow_hyphen_values(true),
                )
                .arg(
                    Arg::new("agent")
                        .long("agent")
                        .help("Instrument at load time instead of through the build pipeline")
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn required(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow!("missing argument <{name}>"))
}

fn to_command(matches: &ArgMatches, config: &SeamConfig) -> Result<CliCommand> {
    match matches.subcommand() {
        Some(("instrument", sub)) => Ok(CliCommand::Instrument {
            source: required(sub, "path")?.into(),
            out: sub
                .get_one::<String>("out")
                .map(PathBuf::from)
                .unwrap_or_else(|| config.output_dir.clone()),
            parallel: sub.get_flag("parallel"),
        }),
        Some(("sites", sub)) => Ok(CliCommand::Sites {
            file: required(sub, "file")?.into(),
            json: sub.get_flag("json"),
        }),
        Some(("run", sub)) => Ok(CliCommand::Run {
            file: required(sub, "file")?.into(),
            class: required(sub, "class")?,
            method: required(sub, "method")?,
            args: sub
                .get_many::<String>("args")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            agent: sub.get_flag("agent"),
        }),
        _ => Err(anyhow!("unknown command")),
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();

    let matches = cli().get_matches();
    let config = match matches.get_one::<String>("config") {
        Some(path) => SeamConfig::from_file(path.as_ref())?,
        None => SeamConfig::default(),
    };

    let command = to_command(&matches, &config)?;
    let output = execute(&command, &config)?;
    print!("{}", output.text);

    Ok(if output.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
