//! CLI command definitions and handlers.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::Result;
use sluice_common::SluiceError;

use crate::exec::timeout::TimeoutPolicy;
use crate::runtime::{Output, RunConfig, StdinSetting, run};
use crate::stdio::{CombineMode, Input, Sink, Source};

/// Sluice - run a command with its stdio fanned in and out
#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// How consecutive `--stdin` sources are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StdinMode {
    /// One source after the other.
    Merge,
    /// One chunk from each in turn.
    Zip,
}

impl From<StdinMode> for CombineMode {
    fn from(mode: StdinMode) -> Self {
        match mode {
            StdinMode::Merge => Self::Merge,
            StdinMode::Zip => Self::Zip,
        }
    }
}

/// Sluice commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a command
    Run {
        /// Stdin source: text:<s>, file:<path>, -, null or inherit. Repeatable
        #[arg(long, value_name = "SOURCE")]
        stdin: Vec<String>,

        /// How to join consecutive stdin sources (default: merge around text, zip otherwise)
        #[arg(long, value_enum)]
        stdin_mode: Option<StdinMode>,

        /// Stdout destination: overwrite:<path>, append:<path>, capture, null or inherit. Repeatable
        #[arg(long, value_name = "SINK")]
        stdout: Vec<String>,

        /// Stderr destination, same forms as --stdout. Repeatable
        #[arg(long, value_name = "SINK")]
        stderr: Vec<String>,

        /// Destination for stdout and stderr interleaved: overwrite:<path>, append:<path> or capture
        #[arg(long, value_name = "SINK")]
        out: Vec<String>,

        /// Milliseconds before the child is sent SIGINT
        #[arg(long, env = "SLUICE_TIMEOUT_GRACE_MS")]
        timeout_grace_ms: Option<f64>,

        /// Milliseconds after SIGINT before SIGKILL (inf to never kill)
        #[arg(long, env = "SLUICE_TIMEOUT_FORCE_MS")]
        timeout_force_ms: Option<f64>,

        /// Working directory of the child
        #[arg(long, env = "SLUICE_CWD")]
        cwd: Option<PathBuf>,

        /// Environment override, KEY=VALUE. Repeatable
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Fail when the child exits unsuccessfully
        #[arg(long)]
        fail_loudly: bool,

        /// Print the outcome record as JSON
        #[arg(long)]
        json: bool,

        /// The program and its arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
}

impl Cli {
    /// Execute the CLI command. Returns the exit code to leave with.
    pub async fn execute(self) -> Result<i32> {
        match self.command {
            Commands::Run {
                stdin,
                stdin_mode,
                stdout,
                stderr,
                out,
                timeout_grace_ms,
                timeout_force_ms,
                cwd,
                env,
                fail_loudly,
                json,
                command,
            } => {
                let mut config = RunConfig::new(command)
                    .with_stdin(parse_stdin(&stdin, stdin_mode.map(Into::into))?)
                    .with_stdout(parse_output(&stdout)?)
                    .with_stderr(parse_output(&stderr)?)
                    .with_fail_loudly(fail_loudly);
                for spec in &out {
                    config = config.with_combined(Sink::parse(spec)?);
                }
                if let Some(policy) =
                    TimeoutPolicy::from_millis(&config.command, timeout_grace_ms, timeout_force_ms)?
                {
                    config = config.with_timeout(policy);
                }
                if let Some(cwd) = cwd {
                    config = config.with_cwd(cwd);
                }
                for (key, value) in env {
                    config = config.with_env(key, value);
                }

                let invocation = run(config).await?;
                tracing::debug!(pid = invocation.pid(), "Waiting for child");

                let outcome = match invocation.await {
                    Ok(outcome) => outcome,
                    Err(SluiceError::NonZeroExit { outcome }) => {
                        report(&outcome, json)?;
                        tracing::error!(
                            command = ?outcome.command,
                            code = outcome.exit.code,
                            "Command failed"
                        );
                        return Ok(outcome.exit.code);
                    }
                    Err(e) => return Err(e.into()),
                };
                report(&outcome, json)?;
                Ok(outcome.exit.code)
            }
        }
    }
}

fn report(outcome: &sluice_common::Outcome, json: bool) -> Result<()> {
    for failure in &outcome.sink_failures {
        tracing::warn!(%failure, "Sink failed");
    }
    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, outcome)?;
        writeln!(stdout)?;
    } else if let Some(text) = outcome.captured_text() {
        write!(stdout, "{text}")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Turn `--stdin` values into a stdin setting.
pub fn parse_stdin(specs: &[String], mode: Option<CombineMode>) -> Result<StdinSetting, SluiceError> {
    match specs {
        [] => return Ok(StdinSetting::Inherit),
        [only] if only == "inherit" => return Ok(StdinSetting::Inherit),
        _ => {}
    }

    let mut input = Input::new();
    for (i, spec) in specs.iter().enumerate() {
        let source = if spec == "null" {
            Source::Null
        } else if spec == "-" {
            Source::handle(tokio::io::stdin())
        } else if let Some(text) = spec.strip_prefix("text:") {
            Source::literal(text.to_owned())
        } else if let Some(path) = spec.strip_prefix("file:") {
            Source::file(path)
        } else if spec == "inherit" {
            return Err(SluiceError::Source {
                message: "inherit cannot be combined with other stdin sources".to_string(),
            });
        } else {
            return Err(SluiceError::Source {
                message: format!("unrecognised stdin source {spec:?}; use text:<s>, file:<path>, -, null or inherit"),
            });
        };
        input = input.push(if i == 0 { None } else { mode }, source);
    }
    Ok(StdinSetting::Feed(input))
}

/// Turn `--stdout`/`--stderr` values into a channel routing.
pub fn parse_output(specs: &[String]) -> Result<Output, SluiceError> {
    match specs {
        [] => Ok(Output::Inherit),
        [only] if only == "inherit" => Ok(Output::Inherit),
        [only] if only == "null" => Ok(Output::Null),
        _ => specs
            .iter()
            .map(|spec| match spec.as_str() {
                "inherit" | "null" => Err(SluiceError::Sink {
                    message: format!("{spec} cannot be combined with other destinations"),
                }),
                _ => Sink::parse(spec),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Output::To),
    }
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        return Err("environment variable name is empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "sluice",
            "run",
            "--stdin",
            "text:hi",
            "--stdout",
            "capture",
            "--env",
            "A=b=c",
            "--timeout-grace-ms",
            "100",
            "--timeout-force-ms",
            "inf",
            "--",
            "cat",
            "-n",
        ])
        .unwrap();

        let Commands::Run {
            stdin,
            stdout,
            env,
            timeout_force_ms,
            command,
            ..
        } = cli.command;
        assert_eq!(stdin, ["text:hi"]);
        assert_eq!(stdout, ["capture"]);
        assert_eq!(env, [("A".to_string(), "b=c".to_string())]);
        assert_eq!(timeout_force_ms, Some(f64::INFINITY));
        assert_eq!(command, ["cat", "-n"]);
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["sluice", "run"]).is_err());
    }

    #[test]
    fn stdin_specs() {
        assert!(matches!(parse_stdin(&[], None).unwrap(), StdinSetting::Inherit));
        assert!(matches!(
            parse_stdin(&strings(&["inherit"]), None).unwrap(),
            StdinSetting::Inherit
        ));
        let StdinSetting::Feed(input) =
            parse_stdin(&strings(&["text:a", "file:b.txt", "null"]), Some(CombineMode::Zip)).unwrap()
        else {
            panic!("expected a feed");
        };
        assert_eq!(input.len(), 3);
        assert!(parse_stdin(&strings(&["text:a", "inherit"]), None).is_err());
        assert!(parse_stdin(&strings(&["a.txt"]), None).is_err());
    }

    #[test]
    fn output_specs() {
        assert!(matches!(parse_output(&[]).unwrap(), Output::Inherit));
        assert!(matches!(parse_output(&strings(&["null"])).unwrap(), Output::Null));
        let Output::To(sinks) = parse_output(&strings(&["capture", "append:log"])).unwrap() else {
            panic!("expected sinks");
        };
        assert_eq!(sinks.len(), 2);

        let err = parse_output(&strings(&["out.txt"])).unwrap_err();
        assert!(matches!(err, SluiceError::BarePathSink { .. }));
        assert!(parse_output(&strings(&["null", "capture"])).is_err());
    }

    #[test]
    fn env_pairs() {
        assert_eq!(parse_env("K=V").unwrap(), ("K".to_string(), "V".to_string()));
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=x").is_err());
    }
}
