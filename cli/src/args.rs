//! Command-line flags.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

pub const USAGE: &str = "\
usage: marionette [--dir <path>] [--ticks <n>] [--config <path>] [--json]

  --dir <path>     directory of *.rhai avatars (default: [avatars] dir)
  --ticks <n>      frames to drive after loading (default: 1)
  --config <path>  config file to load instead of ~/.marionette/config.toml
  --json           print the summary as JSON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub dir: Option<PathBuf>,
    pub ticks: u64,
    pub config: Option<PathBuf>,
    pub json: bool,
    pub help: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            dir: None,
            ticks: 1,
            config: None,
            json: false,
            help: false,
        }
    }
}

impl Args {
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--dir" => parsed.dir = Some(value(&mut args, &arg)?.into()),
                "--config" => parsed.config = Some(value(&mut args, &arg)?.into()),
                "--ticks" => {
                    let raw = value(&mut args, &arg)?;
                    parsed.ticks = raw
                        .parse()
                        .with_context(|| format!("--ticks expects a count, got {raw:?}"))?;
                }
                "--json" => parsed.json = true,
                "-h" | "--help" => parsed.help = true,
                other => bail!("unknown argument {other:?}\n\n{USAGE}"),
            }
        }

        Ok(parsed)
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("{flag} expects a value\n\n{USAGE}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        Args::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn defaults() {
        assert_eq!(parse(&[]).unwrap(), Args::default());
    }

    #[test]
    fn all_flags() {
        let args = parse(&["--dir", "avatars", "--ticks", "30", "--config", "m.toml", "--json"]).unwrap();
        assert_eq!(args.dir, Some(PathBuf::from("avatars")));
        assert_eq!(args.ticks, 30);
        assert_eq!(args.config, Some(PathBuf::from("m.toml")));
        assert!(args.json);
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = parse(&["--dir"]).unwrap_err();
        assert!(err.to_string().contains("--dir expects a value"));
    }

    #[test]
    fn bad_tick_count_is_an_error() {
        assert!(parse(&["--ticks", "-1"]).is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let err = parse(&["--verbose"]).unwrap_err();
        assert!(err.to_string().contains("unknown argument"));
    }
}
