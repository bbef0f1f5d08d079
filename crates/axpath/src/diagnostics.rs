//! Per-segment record of a resolution attempt.
//!
//! A [`ResolutionTrace`] explains where and why a path stopped matching: how
//! many candidates each segment saw, which one was picked, whether the pick
//! was ambiguous, and on failure what was actually present at that level.

use crate::errors::{ProviderErrorKind, ResolutionError};
use crate::matcher::attributes;
use crate::segment::{Predicate, Segment};
use serde::Serialize;
use std::fmt::Write;

/// Suggestions kept per failed segment.
const MAX_SUGGESTIONS: usize = 5;
/// Role names and values further apart than this are not offered as
/// corrections.
const MAX_EDIT_DISTANCE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    NoMatch,
    IndexOutOfRange { requested: usize, available: usize },
    Ambiguous { count: usize },
    Provider { error: ProviderErrorKind, message: String },
    Cancelled,
}

impl FailureReason {
    pub(crate) fn from_error(error: &ResolutionError) -> Self {
        match error {
            ResolutionError::NotFound { .. } => FailureReason::NoMatch,
            ResolutionError::IndexOutOfRange {
                requested,
                available,
                ..
            } => FailureReason::IndexOutOfRange {
                requested: *requested,
                available: *available,
            },
            ResolutionError::Ambiguous { count, .. } => FailureReason::Ambiguous { count: *count },
            ResolutionError::Provider { source, .. } => FailureReason::Provider {
                error: source.kind(),
                message: source.to_string(),
            },
            ResolutionError::Cancelled { .. } => FailureReason::Cancelled,
        }
    }
}

/// Advisory: several candidates matched and the first one was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AmbiguityNotice {
    pub match_count: usize,
    pub chosen: usize,
}

/// What one enumerated candidate looked like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateSummary {
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
}

impl CandidateSummary {
    pub(crate) const ATTRIBUTES: [&'static str; 4] = [
        attributes::IDENTIFIER,
        attributes::DESCRIPTION,
        attributes::TITLE,
        attributes::BUNDLE_IDENTIFIER,
    ];

    pub(crate) fn from_values(values: Vec<Option<String>>) -> Self {
        let mut values = values.into_iter().map(|v| v.filter(|s| !s.is_empty()));
        Self {
            role: values.next().flatten(),
            identifier: values.next().flatten(),
            description: values.next().flatten(),
            title: values.next().flatten(),
            bundle_id: values.next().flatten(),
        }
    }

    /// Attribute values in the order [`as_segment`](Self::as_segment) prefers
    /// them.
    fn values(&self) -> [(&'static str, Option<&str>); 4] {
        [
            (attributes::BUNDLE_IDENTIFIER, self.bundle_id.as_deref()),
            (attributes::IDENTIFIER, self.identifier.as_deref()),
            (attributes::DESCRIPTION, self.description.as_deref()),
            (attributes::TITLE, self.title.as_deref()),
        ]
    }

    /// A segment that would select this candidate by its most specific
    /// attribute.
    pub fn as_segment(&self) -> Option<Segment> {
        let role = self.role.clone()?;
        let mut segment = Segment::new(role);
        let best = self
            .values()
            .into_iter()
            .find_map(|(name, value)| value.map(|v| Predicate::new(name, v)));
        segment.predicates.extend(best);
        Some(segment)
    }

    /// Smallest edit distance between any predicate value and any of this
    /// candidate's attribute values.
    fn distance(&self, predicates: &[Predicate]) -> usize {
        predicates
            .iter()
            .flat_map(|p| {
                self.values()
                    .into_iter()
                    .filter_map(|(_, value)| value)
                    .map(move |value| strsim::levenshtein(&p.value, value))
            })
            .min()
            .unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentTrace {
    pub segment_index: usize,
    pub segment: Segment,
    /// Candidates enumerated before filtering.
    pub candidate_count: usize,
    /// Candidates left after role and predicate filtering.
    pub matched_count: usize,
    /// Candidates that went stale between enumeration and filtering.
    #[serde(skip_serializing_if = "is_zero")]
    pub vanished_count: usize,
    /// Zero-based position of the chosen element among the matches.
    pub selected_index: Option<usize>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguity: Option<AmbiguityNotice>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<CandidateSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl SegmentTrace {
    pub(crate) fn new(segment_index: usize, segment: Segment) -> Self {
        Self {
            segment_index,
            segment,
            candidate_count: 0,
            matched_count: 0,
            vanished_count: 0,
            selected_index: None,
            success: false,
            failure_reason: None,
            ambiguity: None,
            available: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Fill `suggestions` from `available`.
    pub(crate) fn suggest(&mut self) {
        let mut suggestions = Vec::new();

        if let Some(FailureReason::IndexOutOfRange { available, .. }) = &self.failure_reason {
            if *available > 0 {
                suggestions.push(format!("use an index between 1 and {available}"));
            } else {
                suggestions.push("no element matched the role and predicates; drop the index to see why".to_string());
            }
        }

        let role = &self.segment.role;
        let same_role: Vec<&CandidateSummary> = self
            .available
            .iter()
            .filter(|c| c.role.as_deref() == Some(role.as_str()))
            .collect();

        if same_role.is_empty() {
            let mut roles: Vec<&str> = self
                .available
                .iter()
                .filter_map(|c| c.role.as_deref())
                .collect();
            roles.sort_unstable();
            roles.dedup();
            roles.sort_by_key(|r| strsim::levenshtein(role, r));
            suggestions.extend(
                roles
                    .into_iter()
                    .filter(|r| strsim::levenshtein(role, r) <= MAX_EDIT_DISTANCE)
                    .map(|r| format!("did you mean role '{r}'?")),
            );
        } else if !self.segment.predicates.is_empty() {
            let predicates = &self.segment.predicates;
            let mut ranked: Vec<(usize, &CandidateSummary)> = same_role
                .into_iter()
                .map(|c| (c.distance(predicates), c))
                .collect();
            ranked.sort_by_key(|(distance, _)| *distance);

            // a single near miss is most likely a typo
            if let [(best, closest), rest @ ..] = ranked.as_slice() {
                let unique = rest.first().map_or(true, |(next, _)| next > best);
                if *best <= MAX_EDIT_DISTANCE && unique {
                    if let Some(segment) = closest.as_segment() {
                        suggestions.push(format!("did you mean {segment}?"));
                    }
                }
            }
            suggestions.extend(
                ranked
                    .into_iter()
                    .filter_map(|(_, c)| c.as_segment())
                    .map(|s| s.to_string()),
            );
        }

        suggestions.dedup();
        suggestions.truncate(MAX_SUGGESTIONS);
        self.suggestions = suggestions;
    }
}

/// Segment-by-segment record of one resolution attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionTrace {
    pub path: String,
    pub segments: Vec<SegmentTrace>,
}

impl ResolutionTrace {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            segments: Vec::new(),
        }
    }

    /// The deepest segment that resolved, if any.
    pub fn deepest_resolved(&self) -> Option<&SegmentTrace> {
        self.segments.iter().take_while(|s| s.success).last()
    }

    pub fn first_failure(&self) -> Option<&SegmentTrace> {
        self.segments.iter().find(|s| !s.success)
    }

    pub fn ambiguities(&self) -> impl Iterator<Item = &SegmentTrace> {
        self.segments.iter().filter(|s| s.ambiguity.is_some())
    }

    pub fn is_success(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| s.success)
    }

    /// Multi-line report for humans and language models.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let resolved = self.segments.iter().filter(|s| s.success).count();
        let _ = writeln!(out, "path: {}", self.path);
        let _ = writeln!(out, "resolved {resolved} segment(s)");

        for trace in &self.segments {
            let status = if trace.success { "ok" } else { "FAILED" };
            let _ = write!(
                out,
                "  [{}] {} {status} ({} candidate(s), {} matched",
                trace.segment_index, trace.segment, trace.candidate_count, trace.matched_count
            );
            if trace.vanished_count > 0 {
                let _ = write!(out, ", {} vanished", trace.vanished_count);
            }
            out.push(')');
            if let Some(notice) = &trace.ambiguity {
                let _ = write!(
                    out,
                    " ambiguous: took #{} of {} matches",
                    notice.chosen + 1,
                    notice.match_count
                );
            }
            out.push('\n');

            if let Some(reason) = &trace.failure_reason {
                let _ = writeln!(out, "      reason: {}", describe(reason));
            }
            if !trace.available.is_empty() {
                let listed: Vec<String> = trace
                    .available
                    .iter()
                    .filter_map(|c| c.as_segment().map(|s| s.to_string()))
                    .collect();
                let _ = writeln!(out, "      available: {}", listed.join(", "));
            }
            for suggestion in &trace.suggestions {
                let _ = writeln!(out, "      hint: {suggestion}");
            }
        }
        out
    }
}

fn describe(reason: &FailureReason) -> String {
    match reason {
        FailureReason::NoMatch => "no element matched the role and predicates".to_string(),
        FailureReason::IndexOutOfRange {
            requested,
            available,
        } => format!("index {requested} requested but only {available} matched"),
        FailureReason::Ambiguous { count } => {
            format!("{count} elements matched and no index was given")
        }
        FailureReason::Provider { message, .. } => message.clone(),
        FailureReason::Cancelled => "cancelled".to_string(),
    }
}
