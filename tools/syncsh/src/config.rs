use crate::errors::SyncshError;
use crate::types::{Invocation, Selector};
use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_VERBOSE_PREFIX: &str = "+ ";

/// Settings read from the environment. `syncsh` never sees its own flags on
/// the command line (make passes only `-c <recipe>`), so every field is
/// env-backed and parsed from an otherwise empty argument list.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "syncsh")]
#[command(about = "Shell wrapper that keeps parallel make recipe output together")]
pub struct EnvOverrides {
    #[arg(long, env = "SYNCSH_CONFIG")]
    pub config: Option<OsString>,
    #[arg(long, env = "SYNCSH_SHELL")]
    pub shell: Option<OsString>,
    #[arg(long, env = "SYNCSH_LOCKFILE")]
    pub lockfile: Option<OsString>,
    #[arg(long, env = "SYNCSH_TEE")]
    pub tee: Option<OsString>,
    #[arg(long, env = "SYNCSH_VERBOSE")]
    pub verbose: Option<OsString>,
    #[arg(long, env = "SYNCSH_HEADLINE")]
    pub headline: Option<OsString>,
    #[arg(long, env = "SYNCSH_SERIALIZE")]
    pub serialize: Option<OsString>,
    #[arg(long, env = "SYNCSH_TEE_SEPARATOR")]
    pub tee_separator: Option<OsString>,
    #[arg(long, env = "SYNCSH_INTERACTIVE")]
    pub interactive: Option<OsString>,
    #[arg(long, env = "SYNCSH_LOG")]
    pub log: Option<OsString>,
    #[arg(long, env = "MAKELEVEL")]
    pub makelevel: Option<OsString>,
    #[arg(long, env = "MAKEFILE_LIST")]
    pub makefile_list: Option<OsString>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self, SyncshError> {
        Self::try_parse_from(["syncsh"]).map_err(|e| SyncshError::ConfigParse(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub shell: PathBuf,
    pub lock_file: Option<PathBuf>,
    pub tee: Option<PathBuf>,
    pub verbose: Option<String>,
    pub headline: Option<String>,
    pub serialize: Option<String>,
    pub tee_separator: Option<String>,
    pub interactive: bool,
    pub event_log: Option<PathBuf>,
    pub nesting_level: Option<String>,
    pub makefile_list: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            lock_file: None,
            tee: None,
            verbose: None,
            headline: None,
            serialize: None,
            tee_separator: None,
            interactive: false,
            event_log: None,
            nesting_level: None,
            makefile_list: None,
        }
    }
}

/// Shape of the optional `SYNCSH_CONFIG` TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialSettings {
    shell: Option<PathBuf>,
    lockfile: Option<PathBuf>,
    tee: Option<PathBuf>,
    verbose: Option<String>,
    headline: Option<String>,
    serialize: Option<String>,
    tee_separator: Option<String>,
    interactive: Option<bool>,
    log: Option<PathBuf>,
}

pub fn load_settings(overrides: &EnvOverrides) -> Result<Settings, SyncshError> {
    let mut settings = Settings::default();

    if let Some(path) = non_empty_path(&overrides.config) {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SyncshError::io(format!("read {}", path.display()), e))?;
        let partial: PartialSettings = toml::from_str(&contents)
            .map_err(|e| SyncshError::ConfigParse(format!("{}: {e}", path.display())))?;
        merge_partial_settings(&mut settings, partial);
    }

    apply_env_overrides(&mut settings, overrides)?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn merge_partial_settings(settings: &mut Settings, partial: PartialSettings) {
    if let Some(shell) = partial.shell {
        settings.shell = shell;
    }
    if partial.lockfile.is_some() {
        settings.lock_file = partial.lockfile;
    }
    if partial.tee.is_some() {
        settings.tee = partial.tee;
    }
    if let Some(verbose) = partial.verbose {
        settings.verbose = verbose_prefix(&verbose);
    }
    if partial.headline.is_some() {
        settings.headline = partial.headline;
    }
    if partial.serialize.is_some() {
        settings.serialize = partial.serialize;
    }
    if partial.tee_separator.is_some() {
        settings.tee_separator = partial.tee_separator;
    }
    if let Some(interactive) = partial.interactive {
        settings.interactive = interactive;
    }
    if partial.log.is_some() {
        settings.event_log = partial.log;
    }
}

fn apply_env_overrides(settings: &mut Settings, env: &EnvOverrides) -> Result<(), SyncshError> {
    if let Some(shell) = non_empty_path(&env.shell) {
        settings.shell = shell.to_path_buf();
    }
    if let Some(path) = non_empty_path(&env.lockfile) {
        settings.lock_file = Some(path.to_path_buf());
    }
    if let Some(path) = non_empty_path(&env.tee) {
        settings.tee = Some(path.to_path_buf());
    }
    if let Some(verbose) = non_empty(&env.verbose) {
        settings.verbose = verbose_prefix(&verbose);
    }
    if let Some(headline) = non_empty(&env.headline) {
        settings.headline = Some(headline.into_owned());
    }
    if let Some(pattern) = non_empty(&env.serialize) {
        settings.serialize = Some(pattern.into_owned());
    }
    if let Some(separator) = non_empty(&env.tee_separator) {
        settings.tee_separator = Some(separator.into_owned());
    }
    if let Some(value) = non_empty(&env.interactive) {
        settings.interactive = parse_flag(&value).ok_or_else(|| {
            SyncshError::InvalidConfig(format!(
                "SYNCSH_INTERACTIVE must be a boolean, got {value:?}"
            ))
        })?;
    }
    if let Some(path) = non_empty_path(&env.log) {
        settings.event_log = Some(path.to_path_buf());
    }
    settings.nesting_level = non_empty(&env.makelevel).map(Cow::into_owned);
    settings.makefile_list = non_empty(&env.makefile_list).map(Cow::into_owned);
    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<(), SyncshError> {
    if settings.shell.as_os_str().is_empty() {
        return Err(SyncshError::InvalidConfig(
            "shell must not be empty".to_string(),
        ));
    }
    if let Some(log) = &settings.event_log {
        if !log.is_absolute() {
            return Err(SyncshError::RelativePath {
                what: "SYNCSH_LOG",
                path: log.clone(),
            });
        }
    }
    Ok(())
}

/// `0`/`false`/`no` disable verbosity, `1`/`true`/`yes` select the default
/// prefix, anything else is used as the prefix itself.
pub fn verbose_prefix(value: &str) -> Option<String> {
    match parse_flag(value) {
        Some(false) => None,
        Some(true) => Some(DEFAULT_VERBOSE_PREFIX.to_string()),
        None => Some(value.to_string()),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Some(false),
        "1" | "true" | "yes" | "on" => Some(true),
        _ => None,
    }
}

// Environment text is read lossily; a stray non-UTF-8 byte must not stop
// pass-through shells from running.
fn non_empty(value: &Option<OsString>) -> Option<Cow<'_, str>> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(OsStr::to_string_lossy)
}

fn non_empty_path(value: &Option<OsString>) -> Option<&Path> {
    value.as_deref().filter(|v| !v.is_empty()).map(Path::new)
}

/// Combines settings with the recipe arguments make handed us.
pub fn build_invocation(
    settings: &Settings,
    flags: OsString,
    command: OsString,
) -> Result<Invocation, SyncshError> {
    let selector = settings
        .serialize
        .as_ref()
        .map(|pattern| {
            Regex::new(pattern)
                .map(|regex| Selector {
                    pattern: pattern.clone(),
                    regex,
                })
                .map_err(|source| SyncshError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .transpose()?;

    Ok(Invocation {
        shell: settings.shell.clone(),
        recipe: command.to_string_lossy().into_owned(),
        shell_args: vec![flags, command],
        verbose: settings.verbose.clone(),
        headline: settings.headline.clone(),
        tee: settings.tee.clone(),
        tee_separator: settings.tee_separator.clone(),
        lock_file: settings.lock_file.clone(),
        selector,
        makefile_list: settings.makefile_list.clone(),
        interactive: settings.interactive,
    })
}
