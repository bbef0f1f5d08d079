use crate::config::EngineConfig;
use crate::matcher::{attributes, MatchTable};
use crate::parser::PathParser;
use crate::segment::ElementPath;
use serde::Serialize;

/// Roles that usually appear many times under one parent.
const GENERIC_ROLES: [&str; 6] = [
    "AXGroup",
    "AXScrollArea",
    "AXSplitGroup",
    "AXLayoutArea",
    "AXUnknown",
    "AXList",
];

const MAX_NAME_DISTANCE: usize = 3;

/// Result of a static, tree-free check of path text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathValidation {
    pub is_valid: bool,
    pub warnings: Vec<String>,
}

/// Check `text` with the default configuration. With `strict`, any warning
/// makes the path invalid.
pub fn validate(text: &str, strict: bool) -> PathValidation {
    let config = EngineConfig::default();
    validate_with(
        &PathParser::new(config.prefix.clone()),
        &MatchTable::default(),
        &config,
        text,
        strict,
    )
}

pub(crate) fn validate_with(
    parser: &PathParser,
    matcher: &MatchTable,
    config: &EngineConfig,
    text: &str,
    strict: bool,
) -> PathValidation {
    match parser.parse(text) {
        Err(error) => PathValidation {
            is_valid: false,
            warnings: vec![error.to_string()],
        },
        Ok(path) => {
            let warnings = lint(&path, matcher, config);
            PathValidation {
                is_valid: !(strict && !warnings.is_empty()),
                warnings,
            }
        }
    }
}

fn lint(path: &ElementPath, matcher: &MatchTable, config: &EngineConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let first = path.first();

    if first.role != config.application_role {
        warnings.push(format!(
            "path starts at {} rather than {}; every application will be searched",
            first.role, config.application_role
        ));
    } else {
        let has = |canonical: &str| {
            first
                .predicate_value(|name| matcher.normalize(name) == canonical)
                .is_some()
        };
        if has(attributes::BUNDLE_IDENTIFIER) {
            // fast path, nothing to say
        } else if has(attributes::TITLE) {
            warnings.push(
                "application is located by title only; add bundleIdentifier for a direct lookup"
                    .to_string(),
            );
        } else {
            warnings.push(format!(
                "{} segment has neither bundleIdentifier nor title",
                config.application_role
            ));
        }
    }

    for (index, segment) in path.segments().iter().enumerate() {
        for predicate in &segment.predicates {
            let name = predicate.name.as_str();
            if !matcher.is_known(name) && !name.starts_with("AX") {
                let mut warning = format!("segment {index}: unrecognised attribute '{name}'");
                if let Some(close) = closest_name(name, matcher) {
                    warning.push_str(&format!(", did you mean '{close}'?"));
                }
                warnings.push(warning);
            }
            if predicate.value.is_empty() {
                warnings.push(format!("segment {index}: empty value for '{name}'"));
            }
        }

        let has_predicates = !segment.predicates.is_empty();
        if GENERIC_ROLES.contains(&segment.role.as_str())
            && !has_predicates
            && segment.index.is_none()
        {
            warnings.push(format!(
                "segment {index}: {} without predicates or index is likely to be ambiguous",
                segment.role
            ));
        }
        if let Some(position) = segment.index {
            if !has_predicates {
                warnings.push(format!(
                    "segment {index}: index #{position} without predicates breaks when siblings are added or reordered"
                ));
            }
        }
    }

    if path.len() > config.max_path_depth {
        warnings.push(format!(
            "path has {} segments, more than the recommended {}",
            path.len(),
            config.max_path_depth
        ));
    }

    warnings
}

fn closest_name<'a>(name: &str, matcher: &'a MatchTable) -> Option<&'a str> {
    matcher
        .known_names()
        .into_iter()
        .map(|known| (strsim::levenshtein(name, known), known))
        .filter(|(distance, _)| *distance <= MAX_NAME_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, known)| known)
}
