use crate::config::PanelConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    config: Option<PathBuf>,
    participants: Option<usize>,
    steps: Option<u32>,
    seed: Option<u64>,
    items_per_page: Option<usize>,
    log_level: Option<log::LevelFilter>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => {
                    overrides.config = Some(PathBuf::from(value));
                }
                "participants" => {
                    let count =
                        value.parse::<usize>().with_context(|| format!("Invalid participant count '{value}'"))?;
                    if count == 0 {
                        bail!("At least one participant is required.");
                    }
                    overrides.participants = Some(count);
                }
                "steps" => {
                    overrides.steps =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid step count '{value}'"))?);
                }
                "seed" => {
                    overrides.seed = Some(value.parse::<u64>().with_context(|| format!("Invalid seed '{value}'"))?);
                }
                "items-per-page" => {
                    overrides.items_per_page =
                        Some(value.parse::<usize>().with_context(|| format!("Invalid items per page '{value}'"))?);
                }
                "log-level" => {
                    overrides.log_level = Some(parse_level(&value)?);
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --participants, --steps, --seed, \
                     --items-per-page, --log-level."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    pub fn participants(&self) -> Option<usize> {
        self.participants
    }

    pub fn steps(&self) -> Option<u32> {
        self.steps
    }

    pub fn log_level(&self) -> Option<log::LevelFilter> {
        self.log_level
    }

    pub fn config_overrides(&self) -> PanelConfigOverrides {
        PanelConfigOverrides { items_per_page: self.items_per_page, seed: self.seed }
    }
}

fn parse_level(value: &str) -> Result<log::LevelFilter> {
    match value.to_ascii_lowercase().as_str() {
        "off" => Ok(log::LevelFilter::Off),
        "error" => Ok(log::LevelFilter::Error),
        "warn" | "warning" => Ok(log::LevelFilter::Warn),
        "info" => Ok(log::LevelFilter::Info),
        "debug" => Ok(log::LevelFilter::Debug),
        "trace" => Ok(log::LevelFilter::Trace),
        other => bail!("Invalid log level '{other}'. Use off/error/warn/info/debug/trace."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_flags() {
        let args = ["panel", "--config", "panel.json", "--participants", "3", "--steps", "40", "--seed", "7"];
        let overrides = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.config_path(), Some(&PathBuf::from("panel.json")));
        assert_eq!(overrides.participants(), Some(3));
        assert_eq!(overrides.steps(), Some(40));
        assert_eq!(overrides.config_overrides().seed, Some(7));
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["panel", "--steps", "5", "--steps", "9", "--log-level", "info", "--log-level", "DEBUG"];
        let overrides = CliOverrides::parse(args).expect("parse overrides");
        assert_eq!(overrides.steps(), Some(9));
        assert_eq!(overrides.log_level(), Some(log::LevelFilter::Debug));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOverrides::parse(["panel", "--seed"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_zero_participants() {
        let err = CliOverrides::parse(["panel", "--width", "800"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
        let err = CliOverrides::parse(["panel", "--participants", "0"]).unwrap_err();
        assert!(err.to_string().contains("At least one"), "zero participants should error");
    }
}
