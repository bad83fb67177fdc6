use crate::error::PipelineError;
use crate::pipeline::config::RoutingRuleConfig;
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub project: String,
    pub subdir: String,
}

#[derive(Debug, Clone)]
struct RoutingRule {
    pattern: Regex,
    target: RouteTarget,
}

/// Ordered, immutable rule table. First match wins.
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<RoutingRule>,
}

impl Router {
    pub fn new(rules: &[RoutingRuleConfig]) -> Result<Self, PipelineError> {
        Self::with_case_sensitivity(rules, false)
    }

    fn with_case_sensitivity(
        rules: &[RoutingRuleConfig],
        case_sensitive: bool,
    ) -> Result<Self, PipelineError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            let pattern = RegexBuilder::new(&rule.pattern)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|err| {
                    PipelineError::ConfigInvalid(format!(
                        "routing[{index}] pattern does not compile: {err}"
                    ))
                })?;
            compiled.push(RoutingRule {
                pattern,
                target: RouteTarget {
                    project: rule.project.clone(),
                    subdir: rule.subdir.clone(),
                },
            });
        }
        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Match on the file name only. Patterns are searched, not anchored, so a
    /// rule must carry its own `^`/`$` to pin the whole name.
    pub fn route(&self, file_name: &str) -> Option<&RouteTarget> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(file_name))
            .map(|rule| &rule.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, project: &str, subdir: &str) -> RoutingRuleConfig {
        RoutingRuleConfig {
            pattern: pattern.into(),
            project: project.into(),
            subdir: subdir.into(),
        }
    }

    fn target(project: &str, subdir: &str) -> RouteTarget {
        RouteTarget {
            project: project.into(),
            subdir: subdir.into(),
        }
    }

    #[test]
    fn first_match_wins_with_catch_all_last() {
        let router = Router::new(&[
            rule(r"^acs_.*\.csv$", "census", "data/raw"),
            rule(".*", "misc", "data/raw"),
        ])
        .expect("router");

        assert_eq!(router.route("acs_2020.csv"), Some(&target("census", "data/raw")));
        assert_eq!(router.route("notes.txt"), Some(&target("misc", "data/raw")));
    }

    #[test]
    fn matching_is_case_insensitive_by_default() {
        let router = Router::new(&[rule(r"^acs_.*\.csv$", "census", "data/raw")]).expect("router");
        assert_eq!(router.route("ACS_2020.CSV"), Some(&target("census", "data/raw")));

        let strict = Router::with_case_sensitivity(&[rule(r"^acs_.*\.csv$", "census", "data/raw")], true)
            .expect("router");
        assert_eq!(strict.route("ACS_2020.CSV"), None);
    }

    #[test]
    fn no_match_without_catch_all() {
        let router = Router::new(&[rule(r"\.parquet$", "lake", "data/raw")]).expect("router");
        assert_eq!(router.route("notes.txt"), None);
        assert!(Router::new(&[]).expect("empty").route("anything").is_none());
    }

    #[test]
    fn earlier_rule_shadows_later_overlapping_rule() {
        let router = Router::new(&[
            rule("survey", "surveys", "data/raw"),
            rule(r"\.csv$", "tables", "data/raw"),
        ])
        .expect("router");
        assert_eq!(router.route("survey_2021.csv"), Some(&target("surveys", "data/raw")));
        assert_eq!(router.route("prices.csv"), Some(&target("tables", "data/raw")));
    }

    #[test]
    fn invalid_pattern_is_config_invalid() {
        let err = Router::new(&[rule("(", "x", "data/raw")]).expect_err("bad pattern");
        assert!(matches!(err, PipelineError::ConfigInvalid(_)));
    }
}
