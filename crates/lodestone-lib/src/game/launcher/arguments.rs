/// Argument flattening and strict placeholder substitution
use crate::error::PlanError;
use crate::game::descriptor::Argument;
use crate::game::rules::{evaluate_rules, PlatformContext};
use std::collections::HashMap;

/// Flatten an argument list: literals pass through, rule-guarded groups are
/// included whole or dropped whole. Order is the descriptor's, left to
/// right, which keeps assembly deterministic.
pub fn flatten_arguments(args: &[Argument], ctx: &PlatformContext) -> Vec<String> {
    let mut out = Vec::new();

    for arg in args {
        match arg {
            Argument::Literal(s) => out.push(s.clone()),
            Argument::Group { rules, value } => {
                if evaluate_rules(rules, ctx) {
                    out.extend(value.as_slice().iter().map(|s| s.to_string()));
                }
            }
        }
    }

    out
}

/// Substitute every `${name}` occurrence in `text`. Unknown names are hard
/// errors, never silent empty strings; an argument with a placeholder we
/// cannot resolve would otherwise smuggle garbage into the child argv.
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> Result<String, PlanError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            return Err(PlanError::BadDescriptor(format!(
                "unterminated placeholder in argument {:?}",
                text
            )));
        };

        let name = &after[..end];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => {
                return Err(PlanError::UnknownPlaceholder {
                    name: name.to_string(),
                    argument: text.to_string(),
                })
            }
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Substitute a whole token vector, preserving order.
pub fn substitute_all(
    tokens: &[String],
    vars: &HashMap<String, String>,
) -> Result<Vec<String>, PlanError> {
    tokens.iter().map(|t| substitute(t, vars)).collect()
}

/// Split a legacy `minecraftArguments` string into tokens, respecting
/// single and double quotes. Quotes are removed from the returned tokens.
pub fn tokenize_legacy(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_double = false;
    let mut in_single = false;

    for c in s.chars() {
        match c {
            '"' if !in_single => in_double = !in_double,
            '\'' if !in_double => in_single = !in_single,
            c if c.is_whitespace() && !in_double && !in_single => {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
            }
            c => buf.push(c),
        }
    }

    if !buf.is_empty() {
        out.push(buf);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::descriptor::{ArgumentValue, OsRule, Rule, RuleAction};
    use crate::game::rules::{Arch, OsName};

    fn ctx(os: OsName) -> PlatformContext {
        PlatformContext {
            os_name: os,
            os_version: "test".into(),
            arch: Arch::X86_64,
            features: HashMap::new(),
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_placeholders() {
        let vars = vars(&[("auth_player_name", "Tester"), ("version_name", "1.20.4")]);
        assert_eq!(
            substitute("--username ${auth_player_name} v=${version_name}", &vars).unwrap(),
            "--username Tester v=1.20.4"
        );
    }

    #[test]
    fn unknown_placeholder_is_a_hard_error() {
        let err = substitute("--clientId ${clientid}", &vars(&[])).unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnknownPlaceholder { ref name, .. } if name == "clientid"
        ));
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        let err = substitute("--x ${oops", &vars(&[("oops", "v")])).unwrap_err();
        assert!(matches!(err, PlanError::BadDescriptor(_)));
    }

    #[test]
    fn no_unresolved_placeholder_survives() {
        let vars = vars(&[("a", "1"), ("b", "2")]);
        let out = substitute("${a}${b} ${a} end", &vars).unwrap();
        assert!(!out.contains("${"));
        assert_eq!(out, "12 1 end");
    }

    #[test]
    fn literal_text_passes_through() {
        assert_eq!(
            substitute("-Xss1M", &vars(&[])).unwrap(),
            "-Xss1M".to_string()
        );
    }

    #[test]
    fn group_is_kept_or_dropped_whole() {
        let args = vec![
            Argument::Literal("--gameDir".into()),
            Argument::Group {
                rules: vec![Rule {
                    action: RuleAction::Allow,
                    os: Some(OsRule {
                        name: Some("windows".into()),
                        version: None,
                        arch: None,
                    }),
                    features: None,
                }],
                value: ArgumentValue::Single(
                    "-XX:HeapDumpPath=MojangTricksIntelDriversForPerformance_javaw.exe_minecraft.exe.heapdump".into(),
                ),
            },
            Argument::Literal("--end".into()),
        ];

        let on_windows = flatten_arguments(&args, &ctx(OsName::Windows));
        assert_eq!(on_windows.len(), 3);
        assert!(on_windows[1].starts_with("-XX:HeapDumpPath"));

        let on_linux = flatten_arguments(&args, &ctx(OsName::Linux));
        assert_eq!(on_linux, vec!["--gameDir".to_string(), "--end".to_string()]);
    }

    #[test]
    fn multi_value_groups_expand_in_order() {
        let args = vec![Argument::Group {
            rules: vec![Rule {
                action: RuleAction::Allow,
                os: None,
                features: None,
            }],
            value: ArgumentValue::Multiple(vec!["--width".into(), "${resolution_width}".into()]),
        }];

        let flat = flatten_arguments(&args, &ctx(OsName::Linux));
        assert_eq!(flat, vec!["--width".to_string(), "${resolution_width}".to_string()]);

        let substituted = substitute_all(&flat, &vars(&[("resolution_width", "1280")])).unwrap();
        assert_eq!(substituted, vec!["--width".to_string(), "1280".to_string()]);
    }

    #[test]
    fn legacy_tokenizer_respects_quotes() {
        assert_eq!(
            tokenize_legacy(r#"--username ${auth_player_name} --title "My Game""#),
            vec!["--username", "${auth_player_name}", "--title", "My Game"]
        );
        assert_eq!(tokenize_legacy("   "), Vec::<String>::new());
    }
}
