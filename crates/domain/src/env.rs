//! Startup environment validation.
//!
//! A fixed set of variables is checked once at boot.  Missing `Required`
//! variables abort startup (exit code 2); missing `Recommended` variables
//! disable the feature they gate with a logged warning.

use std::collections::HashMap;

use serde::Serialize;

/// Severity levels for missing or invalid variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvSeverity {
    /// App won't start without it.
    Required,
    /// Feature disabled without it.
    Recommended,
    /// Nice to have.
    Optional,
}

/// Expected value shape, validated when the variable is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    String,
    Integer,
    Path,
    /// Comma-separated list of IDs.
    IdList,
}

/// Specification of one environment variable.
#[derive(Debug, Clone)]
pub struct EnvSpec {
    pub name: &'static str,
    pub severity: EnvSeverity,
    pub kind: EnvKind,
    /// Feature gated by this variable (for Recommended/Optional).
    pub feature: Option<&'static str>,
    pub description: &'static str,
}

/// One validation finding.
#[derive(Debug, Clone)]
pub struct EnvIssue {
    pub name: String,
    pub severity: EnvSeverity,
    pub message: String,
}

impl std::fmt::Display for EnvIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({:?})", self.name, self.message, self.severity)
    }
}

/// Result of a full environment validation pass.
#[derive(Debug, Default)]
pub struct EnvReport {
    pub issues: Vec<EnvIssue>,
    /// Features whose Recommended variables are all present.
    pub available_features: Vec<&'static str>,
    /// Features disabled by a missing Recommended variable.
    pub disabled_features: Vec<&'static str>,
}

impl EnvReport {
    /// True when no `Required` variable is missing or invalid.
    pub fn startable(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == EnvSeverity::Required)
    }
}

/// The variables CursorBot knows about.
pub fn default_specs() -> Vec<EnvSpec> {
    use EnvKind::*;
    use EnvSeverity::*;
    vec![
        EnvSpec {
            name: "CB_DATA_DIR",
            severity: Optional,
            kind: Path,
            feature: None,
            description: "state directory (defaults to ./data)",
        },
        EnvSpec {
            name: "TELEGRAM_BOT_TOKEN",
            severity: Recommended,
            kind: String,
            feature: Some("telegram"),
            description: "Telegram bot token",
        },
        EnvSpec {
            name: "TELEGRAM_ALLOWED_USERS",
            severity: Optional,
            kind: IdList,
            feature: Some("telegram"),
            description: "comma-separated allowed Telegram user IDs",
        },
        EnvSpec {
            name: "DISCORD_BOT_TOKEN",
            severity: Recommended,
            kind: String,
            feature: Some("discord"),
            description: "Discord bot token",
        },
        EnvSpec {
            name: "SIGNAL_PHONE_NUMBER",
            severity: Optional,
            kind: String,
            feature: Some("signal"),
            description: "Signal account phone number",
        },
        EnvSpec {
            name: "GOOGLE_CHAT_CREDENTIALS",
            severity: Optional,
            kind: Path,
            feature: Some("google_chat"),
            description: "Google Chat service-account credentials path",
        },
        EnvSpec {
            name: "CURSOR_API_KEY",
            severity: Recommended,
            kind: String,
            feature: Some("executor"),
            description: "executor API key, passed to the subprocess environment",
        },
        EnvSpec {
            name: "CB_PORT",
            severity: Optional,
            kind: Integer,
            feature: None,
            description: "control-surface port override",
        },
    ]
}

/// Validate `vars` (typically `std::env::vars()`) against the specs.
pub fn validate(specs: &[EnvSpec], vars: &HashMap<String, String>) -> EnvReport {
    let mut report = EnvReport::default();
    let mut feature_ok: HashMap<&'static str, bool> = HashMap::new();

    for spec in specs {
        let value = vars.get(spec.name).filter(|v| !v.is_empty());
        if let Some(feature) = spec.feature {
            feature_ok.entry(feature).or_insert(true);
        }

        match value {
            None => {
                if spec.severity == EnvSeverity::Required
                    || spec.severity == EnvSeverity::Recommended
                {
                    report.issues.push(EnvIssue {
                        name: spec.name.into(),
                        severity: spec.severity,
                        message: format!("missing: {}", spec.description),
                    });
                }
                // Only Recommended gates a feature off; Optional extras don't.
                if spec.severity == EnvSeverity::Recommended {
                    if let Some(feature) = spec.feature {
                        feature_ok.insert(feature, false);
                    }
                }
            }
            Some(v) => {
                if let Err(msg) = check_kind(spec.kind, v) {
                    report.issues.push(EnvIssue {
                        name: spec.name.into(),
                        severity: spec.severity,
                        message: msg,
                    });
                    if let Some(feature) = spec.feature {
                        feature_ok.insert(feature, false);
                    }
                }
            }
        }
    }

    for (feature, ok) in feature_ok {
        if ok {
            report.available_features.push(feature);
        } else {
            report.disabled_features.push(feature);
        }
    }
    report.available_features.sort_unstable();
    report.disabled_features.sort_unstable();
    report
}

fn check_kind(kind: EnvKind, value: &str) -> Result<(), String> {
    match kind {
        EnvKind::String | EnvKind::Path => Ok(()),
        EnvKind::Integer => value
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| format!("expected an integer, got {value:?}")),
        EnvKind::IdList => {
            for part in value.split(',') {
                if part.trim().is_empty() {
                    return Err("empty entry in ID list".into());
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_recommended_disables_feature() {
        let report = validate(&default_specs(), &vars(&[]));
        assert!(report.startable());
        assert!(report.disabled_features.contains(&"telegram"));
    }

    #[test]
    fn present_token_enables_feature() {
        let report = validate(
            &default_specs(),
            &vars(&[("TELEGRAM_BOT_TOKEN", "123:abc")]),
        );
        assert!(report.available_features.contains(&"telegram"));
    }

    #[test]
    fn invalid_integer_reported() {
        let report = validate(&default_specs(), &vars(&[("CB_PORT", "not-a-port")]));
        assert!(report
            .issues
            .iter()
            .any(|i| i.name == "CB_PORT" && i.message.contains("integer")));
    }

    #[test]
    fn missing_required_blocks_startup() {
        let specs = vec![EnvSpec {
            name: "MUST_HAVE",
            severity: EnvSeverity::Required,
            kind: EnvKind::String,
            feature: None,
            description: "required for the test",
        }];
        let report = validate(&specs, &vars(&[]));
        assert!(!report.startable());
    }
}
