//! Glob-rule path resolver.

use crate::config::{Location, LocationItem, TargetSpec, WatchRule, DEFAULT_SERVER};
use crate::error::CliError;
use burnsync_engine::{PathResolver, PushTarget};
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Target {
    filename: Option<String>,
    server: String,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: Pattern,
    targets: Vec<Target>,
}

/// Maps source paths to push targets using the first matching watch rule.
#[derive(Debug, Clone)]
pub struct GlobResolver {
    rules: Vec<CompiledRule>,
}

impl GlobResolver {
    /// Compiles watch rules.
    pub fn new(rules: &[WatchRule]) -> Result<Self, CliError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = Pattern::new(&rule.pattern).map_err(|source| CliError::Pattern {
                    pattern: rule.pattern.clone(),
                    source,
                })?;
                Ok(CompiledRule {
                    pattern,
                    targets: targets(rule.location.as_ref()),
                })
            })
            .collect::<Result<Vec<_>, CliError>>()?;
        Ok(Self { rules })
    }

    /// Returns true if some rule matches `source_path`.
    pub fn matches(&self, source_path: &str) -> bool {
        self.rule(source_path).is_some()
    }

    fn rule(&self, source_path: &str) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches_with(source_path, MATCH_OPTIONS))
    }
}

impl PathResolver for GlobResolver {
    fn resolve(&self, source_path: &str) -> Vec<PushTarget> {
        let Some(rule) = self.rule(source_path) else {
            return Vec::new();
        };
        let derived = default_filename(source_path);
        rule.targets
            .iter()
            .map(|target| {
                let filename = match &target.filename {
                    Some(template) => {
                        normalize(&template.replace("{file}", derived.trim_start_matches('/')))
                    }
                    None => derived.clone(),
                };
                PushTarget::new(filename, target.server.clone())
            })
            .collect()
    }
}

fn targets(location: Option<&Location>) -> Vec<Target> {
    match location {
        None => vec![server_target(DEFAULT_SERVER)],
        Some(Location::Server(server)) => vec![server_target(server)],
        Some(Location::Target(spec)) => vec![spec_target(spec)],
        Some(Location::Many(items)) => items
            .iter()
            .map(|item| match item {
                LocationItem::Server(server) => server_target(server),
                LocationItem::Target(spec) => spec_target(spec),
            })
            .collect(),
    }
}

fn server_target(server: &str) -> Target {
    Target {
        filename: None,
        server: server.to_string(),
    }
}

fn spec_target(spec: &TargetSpec) -> Target {
    Target {
        filename: spec.filename.clone(),
        server: spec.server.clone().unwrap_or_else(|| DEFAULT_SERVER.into()),
    }
}

/// Derives the remote filename for a source path.
///
/// A leading `src/` is stripped and nested paths get a leading `/`. The
/// extension is kept, since files are pushed exactly as read.
pub fn default_filename(source_path: &str) -> String {
    let path = source_path.strip_prefix("src/").unwrap_or(source_path);
    normalize(path)
}

fn normalize(filename: &str) -> String {
    let trimmed = filename.trim_start_matches('/');
    if trimmed.contains('/') {
        format!("/{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filenames() {
        assert_eq!(default_filename("src/a.js"), "a.js");
        assert_eq!(default_filename("src/a.ts"), "a.ts");
        assert_eq!(default_filename("src/lib/util.ts"), "/lib/util.ts");
        assert_eq!(default_filename("src/data.txt"), "data.txt");
        assert_eq!(default_filename("scripts/a.js"), "/scripts/a.js");
    }

    #[test]
    fn default_location_is_home() {
        let resolver = GlobResolver::new(&[WatchRule::new("src/**/*.js")]).unwrap();
        assert_eq!(
            resolver.resolve("src/a.js"),
            vec![PushTarget::new("a.js", "home")]
        );
        assert_eq!(
            resolver.resolve("src/lib/deep/b.js"),
            vec![PushTarget::new("/lib/deep/b.js", "home")]
        );
        assert!(resolver.resolve("src/a.js.map").is_empty());
        assert!(resolver.resolve("README.md").is_empty());
        assert!(!resolver.matches("dist/a.js"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            WatchRule {
                pattern: "src/remote/*.js".into(),
                location: Some(Location::Server("n00dles".into())),
            },
            WatchRule::new("src/**/*.js"),
        ];
        let resolver = GlobResolver::new(&rules).unwrap();
        assert_eq!(
            resolver.resolve("src/remote/hack.js"),
            vec![PushTarget::new("/remote/hack.js", "n00dles")]
        );
        assert_eq!(
            resolver.resolve("src/local.js"),
            vec![PushTarget::new("local.js", "home")]
        );
    }

    #[test]
    fn templates_and_multiple_targets() {
        let rules = vec![WatchRule {
            pattern: "src/*.js".into(),
            location: Some(Location::Many(vec![
                LocationItem::Server("home".into()),
                LocationItem::Target(TargetSpec {
                    filename: Some("bin/{file}".into()),
                    server: Some("pserv-0".into()),
                }),
            ])),
        }];
        let resolver = GlobResolver::new(&rules).unwrap();
        assert_eq!(
            resolver.resolve("src/grow.js"),
            vec![
                PushTarget::new("grow.js", "home"),
                PushTarget::new("/bin/grow.js", "pserv-0"),
            ]
        );
    }

    #[test]
    fn no_rules_match_nothing() {
        let resolver = GlobResolver::new(&[]).unwrap();
        assert!(!resolver.matches("src/a.js"));
        assert!(resolver.resolve("src/a.js").is_empty());
    }

    #[test]
    fn invalid_pattern() {
        let err = GlobResolver::new(&[WatchRule::new("src/[*.js")]).unwrap_err();
        assert!(matches!(err, CliError::Pattern { .. }));
    }
}
