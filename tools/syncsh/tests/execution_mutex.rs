#![cfg(unix)]

use std::path::Path;
use std::process::{Child, Command, Stdio};

const JOBS: usize = 4;

fn spawn_recipe(dir: &Path, lock: &Path, script: &str, serialize: &str) -> Child {
    Command::new(env!("CARGO_BIN_EXE_syncsh"))
        .current_dir(dir)
        .env_remove("SYNCSH_TEE")
        .env_remove("SYNCSH_CONFIG")
        .env("MAKELEVEL", "1")
        .env("SYNCSH_LOCKFILE", lock)
        .env("SYNCSH_SERIALIZE", serialize)
        .arg("-c")
        .arg(script)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn syncsh")
}

fn critical_section(tag: &str) -> String {
    format!(
        "mkdir busy 2>/dev/null || echo overlap >> violations; \
         sleep 0.2; rmdir busy 2>/dev/null; echo {tag}"
    )
}

fn run_jobs(dir: &Path, scripts: &[String], serialize: &str) {
    let lock = dir.join("build.lock");
    let children = scripts
        .iter()
        .map(|script| spawn_recipe(dir, &lock, script, serialize))
        .collect::<Vec<_>>();
    for mut child in children {
        assert!(child.wait().expect("wait").success());
    }
}

#[test]
fn matching_recipes_never_overlap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scripts = (0..JOBS)
        .map(|job| critical_section(&format!("link{job}")))
        .collect::<Vec<_>>();

    run_jobs(dir.path(), &scripts, "^mkdir busy");

    assert!(
        !dir.path().join("violations").exists(),
        "serialized recipes ran concurrently"
    );
}

#[test]
fn non_matching_recipes_still_run_and_finish() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scripts = (0..JOBS)
        .map(|job| format!("sleep 0.1; echo compile{job} > out{job}"))
        .collect::<Vec<_>>();

    run_jobs(dir.path(), &scripts, "^mkdir busy");

    for job in 0..JOBS {
        assert_eq!(
            std::fs::read_to_string(dir.path().join(format!("out{job}"))).expect("output"),
            format!("compile{job}\n")
        );
    }
}
