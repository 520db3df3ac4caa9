use std::ffi::{OsStr, OsString};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThroughReason {
    ArgumentCount,
    NoCommandFlag,
    CommandLooksLikeFlag,
    NotARecipe,
}

impl PassThroughReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ArgumentCount => "argument_count",
            Self::NoCommandFlag => "no_command_flag",
            Self::CommandLooksLikeFlag => "command_looks_like_flag",
            Self::NotARecipe => "not_a_recipe",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    PassThrough(PassThroughReason),
    Synchronized { flags: OsString, command: OsString },
}

/// Decides whether `argv` is a make recipe we must synchronize or something
/// to hand straight to the real shell.
///
/// `nesting_level` is the build tool's depth marker (`MAKELEVEL`); it is only
/// exported to recipe shells, not to `$(shell ...)` expansions.
pub fn classify(argv: &[OsString], nesting_level: Option<&str>) -> Classification {
    let [_, flags, command] = argv else {
        return Classification::PassThrough(PassThroughReason::ArgumentCount);
    };

    if !requests_command_string(flags) {
        return Classification::PassThrough(PassThroughReason::NoCommandFlag);
    }
    if command.as_encoded_bytes().starts_with(b"-") {
        return Classification::PassThrough(PassThroughReason::CommandLooksLikeFlag);
    }
    if nesting_level.map_or(true, str::is_empty) {
        return Classification::PassThrough(PassThroughReason::NotARecipe);
    }

    Classification::Synchronized {
        flags: flags.clone(),
        command: command.clone(),
    }
}

fn requests_command_string(flags: &OsStr) -> bool {
    match flags.as_encoded_bytes() {
        [b'-', rest @ ..] => rest.contains(&b'c'),
        _ => false,
    }
}
