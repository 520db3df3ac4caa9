pub mod capture;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod lock;
pub mod logging;
pub mod replay;
pub mod runtime;
pub mod target;
pub mod types;

use classifier::{classify, Classification, PassThroughReason};
use config::{build_invocation, load_settings, EnvOverrides, Settings};
use errors::{Diagnostics, SyncshError};
use logging::EventLog;
use replay::{execute, ReplayContext};
use runtime::ProductionRuntime;
use serde_json::json;
use std::ffi::OsString;
use target::resolve_target;
use types::{Invocation, ShellRequest};

/// Entry point for the binary: runs and reports, returning the exit code.
pub fn run() -> i32 {
    let args = std::env::args_os().collect::<Vec<_>>();
    let runtime = ProductionRuntime::new();
    let diag = Diagnostics::from_argv0(args.first().map(OsString::as_os_str));
    let result = EnvOverrides::from_env()
        .and_then(|overrides| run_with_runtime(&args, &overrides, &diag, &runtime));
    match result {
        Ok(code) => code,
        Err(error) => diag
            .report(runtime.terminal.as_ref(), &error)
            .unwrap_or(errors::EXIT_INTERNAL),
    }
}

pub fn run_with_runtime(
    args: &[OsString],
    overrides: &EnvOverrides,
    diag: &Diagnostics,
    runtime: &ProductionRuntime,
) -> Result<i32, SyncshError> {
    let settings = load_settings(overrides)?;
    let events = EventLog::new(settings.event_log.as_deref());

    let (flags, command) = match classify(args, settings.nesting_level.as_deref()) {
        Classification::PassThrough(reason) => {
            return pass_through(args, &settings, reason, &events, runtime);
        }
        Classification::Synchronized { flags, command } => (flags, command),
    };

    let invocation = build_invocation(&settings, flags, command)?;
    let target = resolve_target(&invocation)?;

    if invocation.interactive {
        let status = run_interactive_prestep(&invocation, runtime)?;
        if !status.success() {
            return Ok(status.exit_code());
        }
    }

    let ctx = ReplayContext {
        diag,
        events: &events,
        process_runner: runtime.process_runner.as_ref(),
        terminal: runtime.terminal.as_ref(),
    };
    let status = execute(&invocation, &target, &ctx)?;
    Ok(status.exit_code())
}

fn pass_through(
    args: &[OsString],
    settings: &Settings,
    reason: PassThroughReason,
    events: &EventLog,
    runtime: &ProductionRuntime,
) -> Result<i32, SyncshError> {
    let request = ShellRequest::new(
        settings.shell.clone(),
        args.iter().skip(1).cloned().collect(),
    );
    if let Some(prefix) = &settings.verbose {
        runtime
            .terminal
            .write_stderr(format!("{prefix}{}\n", request.command_line()).as_bytes())?;
    }
    events.info(
        "passthrough",
        json!({ "reason": reason.as_str(), "command": request.command_line() }),
    );
    let status = runtime.process_runner.replace(&request)?;
    Ok(status.exit_code())
}

/// Drops the user into an interactive shell before the recipe runs; leaving
/// it with a non-zero status abandons the recipe.
fn run_interactive_prestep(
    invocation: &Invocation,
    runtime: &ProductionRuntime,
) -> Result<types::ChildStatus, SyncshError> {
    let mut request = ShellRequest::new(invocation.shell.clone(), vec![OsString::from("-i")]);
    request.env.push((
        OsString::from("SYNCSH_RECIPE"),
        OsString::from(&invocation.recipe),
    ));
    runtime.process_runner.run_foreground(&request)
}
