use crate::errors::SyncshError;
use crate::lock::FLUSH_OFFSET;
use crate::types::{Discipline, Invocation, SyncTarget, TargetSource};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

// Kept within 31 bits: positive in a 32-bit off_t and inside the offset range
// NFSv3 lock managers accept.
const SELECTOR_OFFSET_MASK: u32 = 0x7fff_ffff;

pub fn resolve_target(invocation: &Invocation) -> Result<SyncTarget, SyncshError> {
    if let Some(tee) = &invocation.tee {
        require_absolute("SYNCSH_TEE", tee)?;
    }

    let (path, source) = resolve_lock_path(invocation)?;
    let discipline = match &invocation.selector {
        Some(selector) if selector.matches(&invocation.recipe) => Discipline::ExecutionMutex {
            offset: selector_offset(&selector.pattern),
        },
        _ => Discipline::OutputFlush,
    };

    Ok(SyncTarget {
        path,
        source,
        discipline,
    })
}

pub fn resolve_lock_path(invocation: &Invocation) -> Result<(PathBuf, TargetSource), SyncshError> {
    if let Some(path) = &invocation.lock_file {
        require_absolute("SYNCSH_LOCKFILE", path)?;
        return Ok((path.clone(), TargetSource::LockFile));
    }

    if let Some(path) = &invocation.tee {
        require_absolute("SYNCSH_TEE", path)?;
        return Ok((path.clone(), TargetSource::Tee));
    }

    if let Some(first) = invocation
        .makefile_list
        .as_deref()
        .and_then(first_makefile)
    {
        let canonical = std::fs::canonicalize(first).map_err(|source| SyncshError::Makefile {
            path: PathBuf::from(first),
            source,
        })?;
        require_absolute("MAKEFILE_LIST", &canonical)?;
        return Ok((canonical, TargetSource::Makefile));
    }

    Err(SyncshError::NoLockTarget)
}

pub fn first_makefile(makefile_list: &str) -> Option<&str> {
    makefile_list.split_whitespace().next()
}

/// Maps a selector to a stable, non-zero lock offset shared by every instance.
pub fn selector_offset(selector: &str) -> u64 {
    let digest = Sha256::digest(selector.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    match head & SELECTOR_OFFSET_MASK {
        0 => FLUSH_OFFSET + 1,
        offset => u64::from(offset),
    }
}

fn require_absolute(what: &'static str, path: &Path) -> Result<(), SyncshError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(SyncshError::RelativePath {
            what,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{first_makefile, resolve_lock_path, resolve_target, selector_offset};
    use crate::errors::SyncshError;
    use crate::types::{Discipline, Invocation, Selector, TargetSource};
    use regex::Regex;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn invocation(recipe: &str) -> Invocation {
        Invocation {
            shell: PathBuf::from("/bin/sh"),
            shell_args: vec![OsString::from("-c"), OsString::from(recipe)],
            recipe: recipe.to_string(),
            verbose: None,
            headline: None,
            tee: None,
            tee_separator: None,
            lock_file: None,
            selector: None,
            makefile_list: None,
            interactive: false,
        }
    }

    fn selector(pattern: &str) -> Selector {
        Selector {
            pattern: pattern.to_string(),
            regex: Regex::new(pattern).expect("regex"),
        }
    }

    #[test]
    fn explicit_lock_file_beats_tee_and_makefile() {
        let mut inv = invocation("true");
        inv.lock_file = Some(PathBuf::from("/var/lock/build.lock"));
        inv.tee = Some(PathBuf::from("/var/log/build.log"));
        inv.makefile_list = Some("/build/Makefile".to_string());

        let (path, source) = resolve_lock_path(&inv).expect("resolve");
        assert_eq!(path, PathBuf::from("/var/lock/build.lock"));
        assert_eq!(source, TargetSource::LockFile);
    }

    #[test]
    fn tee_beats_makefile() {
        let mut inv = invocation("true");
        inv.tee = Some(PathBuf::from("/var/log/build.log"));
        inv.makefile_list = Some("/build/Makefile".to_string());

        let (path, source) = resolve_lock_path(&inv).expect("resolve");
        assert_eq!(path, PathBuf::from("/var/log/build.log"));
        assert_eq!(source, TargetSource::Tee);
    }

    #[test]
    fn makefile_list_uses_first_token_canonicalized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let makefile = dir.path().join("Makefile");
        std::fs::write(&makefile, "all:\n").expect("makefile");
        let mut inv = invocation("true");
        inv.makefile_list = Some(format!("  {} extra.mk", makefile.display()));

        let (path, source) = resolve_lock_path(&inv).expect("resolve");
        assert_eq!(path, std::fs::canonicalize(&makefile).expect("canonical"));
        assert_eq!(source, TargetSource::Makefile);
    }

    #[test]
    fn first_makefile_skips_leading_whitespace() {
        assert_eq!(
            first_makefile("  /build/Makefile extra.mk"),
            Some("/build/Makefile")
        );
        assert_eq!(first_makefile("   "), None);
    }

    #[test]
    fn missing_makefile_is_fatal() {
        let mut inv = invocation("true");
        inv.makefile_list = Some("/nonexistent/dir/Makefile".to_string());
        assert!(matches!(
            resolve_lock_path(&inv),
            Err(SyncshError::Makefile { .. })
        ));
    }

    #[test]
    fn nothing_to_lock_is_a_config_error() {
        let mut inv = invocation("true");
        inv.makefile_list = Some("   ".to_string());
        assert!(matches!(
            resolve_lock_path(&inv),
            Err(SyncshError::NoLockTarget)
        ));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut inv = invocation("true");
        inv.lock_file = Some(PathBuf::from("build.lock"));
        assert!(matches!(
            resolve_target(&inv),
            Err(SyncshError::RelativePath {
                what: "SYNCSH_LOCKFILE",
                ..
            })
        ));

        let mut inv = invocation("true");
        inv.lock_file = Some(PathBuf::from("/var/lock/build.lock"));
        inv.tee = Some(PathBuf::from("logs/build.log"));
        assert!(matches!(
            resolve_target(&inv),
            Err(SyncshError::RelativePath {
                what: "SYNCSH_TEE",
                ..
            })
        ));
    }

    #[test]
    fn matching_selector_switches_to_execution_mutex() {
        let mut inv = invocation("cargo build --release");
        inv.lock_file = Some(PathBuf::from("/var/lock/build.lock"));
        inv.selector = Some(selector("^cargo "));

        let target = resolve_target(&inv).expect("resolve");
        assert_eq!(
            target.discipline,
            Discipline::ExecutionMutex {
                offset: selector_offset("^cargo ")
            }
        );

        inv.recipe = "cc -c main.c".to_string();
        let target = resolve_target(&inv).expect("resolve");
        assert_eq!(target.discipline, Discipline::OutputFlush);
    }

    #[test]
    fn selector_offsets_are_stable_non_zero_and_spread() {
        let selectors = ["^cargo ", "npm install", "docker", "", "x", "y"];
        let offsets = selectors.iter().map(|s| selector_offset(s)).collect::<Vec<_>>();

        assert!(offsets.iter().all(|offset| *offset > 0 && *offset <= 0x7fff_ffff));
        assert_eq!(offsets[0], selector_offset("^cargo "));
        let mut unique = offsets.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), offsets.len());
    }
}
