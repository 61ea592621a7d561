use std::path::PathBuf;
use std::time::Duration;

use artconfig::{MAX_FPS, MIN_FPS};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "artbox",
    author,
    version,
    about = "Interactive exhibition host",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct RunArgs {
    /// Exhibition config (TOML). Defaults to `artbox.toml` in the config directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// How long to run before tearing everything down (`30s`, `1m`, or seconds).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Frame rate of the event loop.
    #[arg(long, value_name = "FPS", value_parser = parse_fps)]
    pub fps: Option<f32>,

    /// Start the page-load, memory and FPS samplers.
    #[arg(long)]
    pub development: bool,

    /// Print the final metrics snapshot as JSON on stdout.
    #[arg(long)]
    pub metrics_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount the configured sketches and run the exhibition (the default).
    Run(RunArgs),
    /// Compile and link a shader pair with the headless backend.
    Compile(CompileArgs),
    /// Inspect the exhibition configuration.
    Config(ConfigCommand),
}

#[derive(Parser, Debug)]
pub struct CompileArgs {
    /// Vertex stage source; the built-in full-screen triangle when omitted.
    #[arg(long, value_name = "FILE")]
    pub vertex: Option<PathBuf>,

    /// Fragment stage source.
    #[arg(long, value_name = "FILE")]
    pub fragment: PathBuf,

    /// Treat the fragment as a sketch fragment (`u_time`, `gl_FragColor`, ...)
    /// and wrap it before compiling.
    #[arg(long)]
    pub sketch: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the resolved config directory and file.
    Where,
    /// Print the effective configuration as TOML.
    Show {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let duration = match trimmed.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Duration::from_secs_f64(seconds),
        Ok(_) => return Err(format!("invalid duration '{trimmed}'; must be non-negative")),
        Err(_) => humantime::parse_duration(trimmed)
            .map_err(|err| format!("invalid duration '{trimmed}': {err}"))?,
    };

    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

pub fn parse_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame rate '{}'", value.trim()))?;
    if !(MIN_FPS..=MAX_FPS).contains(&fps) {
        return Err(format!("frame rate must be between {MIN_FPS} and {MAX_FPS}"));
    }
    Ok(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_variants() {
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("0.25").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("-3").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn parses_fps() {
        assert_eq!(parse_fps("60").unwrap(), 60.0);
        assert_eq!(parse_fps("0.5").unwrap(), 0.5);
        assert!(parse_fps("0").is_err());
        assert!(parse_fps("fast").is_err());
        assert!(parse_fps("1e-30").is_err());
        assert!(parse_fps("inf").is_err());
        assert!(parse_fps("1e9").is_err());
    }

    #[test]
    fn bare_invocation_runs_with_flags() {
        let cli = Cli::try_parse_from(["artbox", "--duration", "1s", "--development"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.duration, Some(Duration::from_secs(1)));
        assert!(cli.run.development);
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["artbox", "compile", "--fragment", "a.frag", "--sketch"]).unwrap();
        match cli.command {
            Some(Command::Compile(args)) => {
                assert_eq!(args.fragment, PathBuf::from("a.frag"));
                assert!(args.vertex.is_none());
                assert!(args.sketch);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["artbox", "config", "where"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand {
                action: ConfigAction::Where
            }))
        ));
    }
}
