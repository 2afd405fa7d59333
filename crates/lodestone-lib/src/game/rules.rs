/// Conditional-inclusion rule evaluation over platform features
use crate::game::descriptor::{Rule, RuleAction};
use std::collections::HashMap;

/// Operating system names as they appear in descriptor rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsName {
    Windows,
    Osx,
    Linux,
}

impl OsName {
    pub fn current() -> Self {
        #[cfg(target_os = "windows")]
        return OsName::Windows;

        #[cfg(target_os = "macos")]
        return OsName::Osx;

        #[cfg(target_os = "linux")]
        return OsName::Linux;

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        compile_error!("Unsupported operating system");
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsName::Windows => "windows",
            OsName::Osx => "osx",
            OsName::Linux => "linux",
        }
    }

    pub fn classpath_separator(&self) -> &'static str {
        match self {
            OsName::Windows => ";",
            _ => ":",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    X86_64,
    Arm64,
}

impl Arch {
    pub fn current() -> Self {
        #[cfg(target_arch = "x86")]
        return Arch::X86;

        #[cfg(target_arch = "x86_64")]
        return Arch::X86_64;

        #[cfg(target_arch = "aarch64")]
        return Arch::Arm64;

        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        compile_error!("Unsupported architecture");
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Pointer-width string used by `${arch}` templates in native classifiers.
    pub fn bits(&self) -> &'static str {
        match self {
            Arch::X86 => "32",
            _ => "64",
        }
    }
}

/// The host-side facts rules are evaluated against.
#[derive(Debug, Clone)]
pub struct PlatformContext {
    pub os_name: OsName,
    pub os_version: String,
    pub arch: Arch,
    pub features: HashMap<String, bool>,
}

impl PlatformContext {
    /// Detect the current host. Feature flags start out all-absent (false).
    pub fn current() -> Self {
        let os_version = sysinfo::System::long_os_version().unwrap_or_default();
        Self {
            os_name: OsName::current(),
            os_version,
            arch: Arch::current(),
            features: HashMap::new(),
        }
    }

    pub fn with_feature(mut self, name: &str, value: bool) -> Self {
        self.features.insert(name.to_string(), value);
        self
    }

    fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

/// Evaluate an ordered rule list. Start disallowed-by-default is wrong for
/// the empty list (no rules = unconditionally included); callers handle that
/// by only calling this when rules exist, or use `allows`.
///
/// Semantics: `matched = false`; each rule whose conditions hold overwrites
/// `matched` with `action == allow`. Pure: same inputs, same result.
pub fn evaluate_rules(rules: &[Rule], ctx: &PlatformContext) -> bool {
    let mut matched = false;

    for rule in rules {
        if rule_conditions_hold(rule, ctx) {
            matched = rule.action == RuleAction::Allow;
        }
    }

    matched
}

/// Rule gate for an optional rule list: absent or empty means included.
pub fn allows(rules: Option<&Vec<Rule>>, ctx: &PlatformContext) -> bool {
    match rules {
        None => true,
        Some(rules) if rules.is_empty() => true,
        Some(rules) => evaluate_rules(rules, ctx),
    }
}

fn rule_conditions_hold(rule: &Rule, ctx: &PlatformContext) -> bool {
    if let Some(ref os_rule) = rule.os {
        if let Some(ref name) = os_rule.name {
            if name != ctx.os_name.as_str() {
                return false;
            }
        }

        if let Some(ref arch) = os_rule.arch {
            if arch != ctx.arch.as_str() {
                return false;
            }
        }

        if let Some(ref version_expr) = os_rule.version {
            // An uncompilable pattern never matches.
            match regex::Regex::new(version_expr) {
                Ok(re) => {
                    if !re.is_match(&ctx.os_version) {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    if let Some(ref features) = rule.features {
        for (name, required) in features {
            if ctx.feature(name) != *required {
                return false;
            }
        }
    }

    true
}
