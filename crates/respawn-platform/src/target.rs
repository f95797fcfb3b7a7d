use std::fmt;

use serde::Serialize;

/// `uname -s` patterns mapped to canonical OS tokens.
///
/// Keys may contain `*`/`?` wildcards and are also valid shell `case`
/// patterns, so install scripts can reuse the same table.
pub const UNAME_OS_MATCH: &[(&str, &str)] = &[
    ("Linux", "linux"),
    ("CYGWIN_*", "windows"),
    ("MINGW*", "windows"),
    ("WIN32", "windows"),
    ("WINNT", "windows"),
    ("Windows", "windows"),
    ("Darwin*", "darwin"),
    ("FreeBSD", "freebsd"),
];

/// `uname -m` patterns mapped to canonical architecture tokens.
pub const UNAME_ARCH_MATCH: &[(&str, &str)] = &[
    ("x86_64", "amd64"),
    ("amd64", "amd64"),
    ("i686", "386"),
    ("powerpc", "ppc"),
    ("ppc", "ppc"),
    ("ppc64", "ppc64"),
    ("armv7l", "arm"),
    ("armv6l", "arm"),
    ("armv7b", "armbe"),
    ("armv6b", "armbe"),
    ("aarch64", "arm64"),
    ("aarch64_be", "arm64be"),
    ("armv8b", "arm64be"),
    ("armv8l", "arm64"),
    ("mips", "mips"),
];

/// The platform a build runs on, as published in the release index.
/// Serializes as `{"os": .., "arch": ..}` in the daemon status report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Target {
    pub os: String,
    pub arch: String,
}

impl Target {
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Target of the currently running build.
    #[must_use]
    pub fn current() -> Self {
        Self::new(
            canonical_os(std::env::consts::OS),
            canonical_arch(std::env::consts::ARCH),
        )
    }

    /// Normalize `uname -s` / `uname -m` output. Returns `None` when either
    /// value has no entry in the tables.
    #[must_use]
    pub fn from_uname(sysname: &str, machine: &str) -> Option<Self> {
        let os = lookup(UNAME_OS_MATCH, sysname.trim())?;
        let arch = lookup(UNAME_ARCH_MATCH, machine.trim())?;
        Some(Self::new(os, arch))
    }

    /// `<os>_<arch>`, the token used in `.arch` lists and artifact names.
    #[must_use]
    pub fn token(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

fn lookup(table: &[(&str, &'static str)], value: &str) -> Option<&'static str> {
    table.iter().find_map(|(pattern, canonical)| {
        let matches = if pattern.contains(['*', '?']) {
            glob::Pattern::new(pattern).is_ok_and(|p| p.matches(value))
        } else {
            *pattern == value
        };
        matches.then_some(*canonical)
    })
}

fn canonical_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn canonical_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc" => "ppc",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}
