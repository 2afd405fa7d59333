/// Java binary resolution and version probing
use crate::error::LaunchError;
use crate::utils::process::CommandExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Matches both modern (`17.0.9`) and legacy (`1.8.0_392`) version strings
/// as printed by `java -version`.
static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"version "(\d+)(?:\.(\d+))?"#).unwrap());

#[derive(Debug, Clone)]
pub struct JavaRuntime {
    pub binary: PathBuf,
    /// Major version as reported by the binary, if it could be probed.
    pub major: Option<u32>,
}

/// Resolve the java binary: explicit setting first, then `JAVA_HOME`, then
/// whatever `java` the PATH offers.
pub fn resolve_java(explicit: Option<&Path>) -> Result<PathBuf, LaunchError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        log::warn!(
            "Configured java binary does not exist: {}",
            path.display()
        );
        return Err(LaunchError::JavaNotFound);
    }

    if let Ok(home) = std::env::var("JAVA_HOME") {
        let candidate = Path::new(&home)
            .join("bin")
            .join(if cfg!(windows) { "java.exe" } else { "java" });
        if candidate.exists() {
            return Ok(candidate);
        }
        log::warn!("JAVA_HOME is set but {} does not exist", candidate.display());
    }

    which::which("java").map_err(|_| LaunchError::JavaNotFound)
}

/// Resolve and probe in one step. A binary that cannot be probed is still
/// usable; the major version just stays unknown.
pub fn resolve_runtime(explicit: Option<&Path>) -> Result<JavaRuntime, LaunchError> {
    let binary = resolve_java(explicit)?;
    let major = probe_major(&binary);
    Ok(JavaRuntime { binary, major })
}

/// Run `<java> -version` and parse the major version out of its output.
/// The version banner goes to stderr on every JVM that matters.
pub fn probe_major(binary: &Path) -> Option<u32> {
    let output = std::process::Command::new(binary)
        .arg("-version")
        .suppress_console()
        .output()
        .ok()?;

    let banner = String::from_utf8_lossy(&output.stderr);
    parse_major(&banner)
}

fn parse_major(banner: &str) -> Option<u32> {
    let caps = VERSION_RE.captures(banner)?;
    let first: u32 = caps.get(1)?.as_str().parse().ok()?;
    if first == 1 {
        // "1.8.0_392" style: the interesting digit is the second one.
        caps.get(2)?.as_str().parse().ok()
    } else {
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modern_version_banner() {
        let banner = r#"openjdk version "17.0.9" 2023-10-17
OpenJDK Runtime Environment (build 17.0.9+9)"#;
        assert_eq!(parse_major(banner), Some(17));
    }

    #[test]
    fn parses_legacy_version_banner() {
        let banner = r#"java version "1.8.0_392"
Java(TM) SE Runtime Environment (build 1.8.0_392-b08)"#;
        assert_eq!(parse_major(banner), Some(8));
    }

    #[test]
    fn garbage_banner_yields_none() {
        assert_eq!(parse_major("not a java banner"), None);
    }

    #[test]
    fn explicit_missing_binary_fails() {
        let err = resolve_java(Some(Path::new("/nonexistent/java"))).unwrap_err();
        assert!(matches!(err, LaunchError::JavaNotFound));
    }

    #[test]
    fn probe_real_java_if_available() {
        // Only meaningful on hosts that have a JVM; skip quietly otherwise.
        if let Ok(binary) = which::which("java") {
            let major = probe_major(&binary);
            assert!(major.is_some(), "installed java should report a version");
        }
    }
}
