//! Segment-by-segment traversal of the live tree.
//!
//! Each segment narrows a candidate set: enumerate, filter by role and
//! predicates, select. The selected element's children are the candidates for
//! the next segment. Resolution stops at the first segment that cannot select
//! an element.

use crate::cache::{AppLookup, ApplicationCache};
use crate::config::{AmbiguityPolicy, EngineConfig};
use crate::diagnostics::{
    AmbiguityNotice, CandidateSummary, FailureReason, ResolutionTrace, SegmentTrace,
};
use crate::errors::{CallError, ProviderError, ResolutionError};
use crate::matcher::{attributes, MatchTable};
use crate::provider::{ElementHandle, ProviderLane};
use crate::segment::{ElementPath, Segment};
use serde::Serialize;
use tracing::{debug, warn};

/// Where resolution of the first segment starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "element")]
pub enum Scope {
    /// The running applications.
    #[default]
    Desktop,
    /// The children of a known element.
    Element(ElementHandle),
}

pub(crate) struct Resolver<'a> {
    pub lane: &'a ProviderLane,
    pub cache: &'a ApplicationCache,
    pub matcher: &'a MatchTable,
    pub config: &'a EngineConfig,
}

impl Resolver<'_> {
    /// Resolve `path`, appending one record per attempted segment to `trace`
    /// when one is given.
    pub async fn resolve(
        &self,
        path: &ElementPath,
        scope: Scope,
        mut trace: Option<&mut ResolutionTrace>,
    ) -> Result<ElementHandle, ResolutionError> {
        let mut root_lookup: Option<AppLookup> = None;
        let mut current: Option<ElementHandle> = None;

        for (index, segment) in path.segments().iter().enumerate() {
            let mut entry = SegmentTrace::new(index, segment.clone());
            let mut enumerated = Vec::new();

            let outcome = self
                .step(
                    index,
                    segment,
                    current,
                    scope,
                    &mut root_lookup,
                    &mut enumerated,
                    &mut entry,
                )
                .await;

            match outcome {
                Ok(selected) => {
                    entry.success = true;
                    if let Some(trace) = trace.as_deref_mut() {
                        trace.segments.push(entry);
                    }
                    current = Some(selected);
                }
                Err(error) => {
                    debug!(segment_index = index, %error, "resolution failed");
                    entry.failure_reason = Some(FailureReason::from_error(&error));
                    let stale_root = Self::implicates_root(&error, &entry);
                    if let Some(trace) = trace.as_deref_mut() {
                        if !matches!(error, ResolutionError::Cancelled { .. }) {
                            let listed = self
                                .listed_candidates(index, segment, scope, &error, enumerated)
                                .await;
                            self.summarize(&listed, &mut entry).await;
                        }
                        trace.segments.push(entry);
                    }
                    if let Some(lookup) = root_lookup.as_ref().filter(|_| stale_root) {
                        self.cache.invalidate(lookup).await;
                    }
                    return Err(error);
                }
            }
        }

        current.ok_or_else(|| ResolutionError::NotFound {
            segment_index: 0,
            segment: path.first().to_string(),
        })
    }

    /// Whether `error` suggests the cached application root went stale.
    /// Misses that leave the root intact keep the cache entry.
    fn implicates_root(error: &ResolutionError, entry: &SegmentTrace) -> bool {
        match error {
            ResolutionError::Provider {
                source: ProviderError::StaleHandle(_),
                ..
            } => true,
            ResolutionError::NotFound { segment_index: 0, .. }
            | ResolutionError::IndexOutOfRange { segment_index: 0, .. } => entry.vanished_count > 0,
            _ => false,
        }
    }

    /// Candidates to describe for a failed segment. An application segment
    /// that matched nothing lists every running application, since the
    /// root lookup only enumerates roots that already match.
    async fn listed_candidates(
        &self,
        index: usize,
        segment: &Segment,
        scope: Scope,
        error: &ResolutionError,
        enumerated: Vec<ElementHandle>,
    ) -> Vec<ElementHandle> {
        let root_miss = index == 0
            && scope == Scope::Desktop
            && segment.role == self.config.application_role
            && matches!(error, ResolutionError::NotFound { .. });
        if !root_miss {
            return enumerated;
        }
        match self.cache.applications(self.lane).await {
            Ok(applications) => applications.into_iter().map(|app| app.handle).collect(),
            Err(error) => {
                debug!(%error, "could not list applications for the trace");
                enumerated
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn step(
        &self,
        index: usize,
        segment: &Segment,
        parent: Option<ElementHandle>,
        scope: Scope,
        root_lookup: &mut Option<AppLookup>,
        enumerated: &mut Vec<ElementHandle>,
        entry: &mut SegmentTrace,
    ) -> Result<ElementHandle, ResolutionError> {
        *enumerated = match parent {
            Some(parent) => self.lane.children(parent).await,
            None => self.initial_candidates(segment, scope, root_lookup).await,
        }
        .map_err(|e| e.at(index))?;
        entry.candidate_count = enumerated.len();

        let matched = self
            .filter(segment, enumerated, entry)
            .await
            .map_err(|e| e.at(index))?;
        entry.matched_count = matched.len();

        let position = self.select(index, segment, matched.len(), entry)?;
        entry.selected_index = Some(position);
        Ok(matched[position])
    }

    /// Candidates for segment 0.
    async fn initial_candidates(
        &self,
        segment: &Segment,
        scope: Scope,
        root_lookup: &mut Option<AppLookup>,
    ) -> Result<Vec<ElementHandle>, CallError> {
        if let Scope::Element(root) = scope {
            return self.lane.children(root).await;
        }

        if segment.role != self.config.application_role {
            // not anchored at an application: search every application's children
            *root_lookup = Some(AppLookup::All);
            let applications = self.cache.applications(self.lane).await?;
            let mut candidates = Vec::new();
            for app in applications {
                match self.lane.children(app.handle).await {
                    Ok(children) => candidates.extend(children),
                    Err(CallError::Provider(ProviderError::StaleHandle(reason))) => {
                        debug!(application = %app.handle, %reason, "application exited, skipping");
                    }
                    Err(e) => return Err(e),
                }
            }
            return Ok(candidates);
        }

        let lookup = if let Some(id) = self.predicate_value(segment, attributes::BUNDLE_IDENTIFIER) {
            AppLookup::BundleId(id.to_string())
        } else if let Some(title) = self.predicate_value(segment, attributes::TITLE) {
            AppLookup::Title(title.to_string())
        } else {
            AppLookup::All
        };
        debug!(?lookup, "locating application root");
        let roots = self.cache.lookup(self.lane, &lookup, self.matcher).await;
        *root_lookup = Some(lookup);
        roots
    }

    fn predicate_value<'s>(&self, segment: &'s Segment, canonical: &str) -> Option<&'s str> {
        segment.predicate_value(|name| self.matcher.normalize(name) == canonical)
    }

    async fn filter(
        &self,
        segment: &Segment,
        candidates: &[ElementHandle],
        entry: &mut SegmentTrace,
    ) -> Result<Vec<ElementHandle>, CallError> {
        let names: Vec<String> = std::iter::once(self.config.role_attribute.clone())
            .chain(
                segment
                    .predicates
                    .iter()
                    .map(|p| self.matcher.normalize(&p.name).to_string()),
            )
            .collect();

        let mut matched = Vec::new();
        for &candidate in candidates {
            let values = match self.lane.attributes(candidate, names.clone()).await {
                Ok(values) => values,
                Err(CallError::Provider(ProviderError::StaleHandle(reason))) => {
                    debug!(%candidate, %reason, "candidate vanished during filtering");
                    entry.vanished_count += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self.accepts(segment, &values) {
                matched.push(candidate);
            }
        }
        Ok(matched)
    }

    fn accepts(&self, segment: &Segment, values: &[Option<String>]) -> bool {
        if values.first().and_then(Option::as_deref) != Some(segment.role.as_str()) {
            return false;
        }
        segment
            .predicates
            .iter()
            .zip(values.iter().skip(1))
            .all(|(predicate, actual)| {
                actual.as_deref().is_some_and(|actual| {
                    self.matcher
                        .matches(&predicate.name, &predicate.value, actual)
                })
            })
    }

    fn select(
        &self,
        index: usize,
        segment: &Segment,
        available: usize,
        entry: &mut SegmentTrace,
    ) -> Result<usize, ResolutionError> {
        if let Some(requested) = segment.index {
            let requested = requested.get();
            if requested > available {
                return Err(ResolutionError::IndexOutOfRange {
                    segment_index: index,
                    segment: segment.to_string(),
                    requested,
                    available,
                });
            }
            return Ok(requested - 1);
        }

        match available {
            0 => Err(ResolutionError::NotFound {
                segment_index: index,
                segment: segment.to_string(),
            }),
            1 => Ok(0),
            count => match self.config.ambiguity {
                AmbiguityPolicy::FirstMatch => {
                    warn!(
                        segment_index = index,
                        segment = %segment,
                        match_count = count,
                        "ambiguous segment, taking the first match"
                    );
                    entry.ambiguity = Some(AmbiguityNotice {
                        match_count: count,
                        chosen: 0,
                    });
                    Ok(0)
                }
                AmbiguityPolicy::Strict => Err(ResolutionError::Ambiguous {
                    segment_index: index,
                    segment: segment.to_string(),
                    count,
                }),
            },
        }
    }

    /// Describe what was present at a failed segment. Provider errors here
    /// only shorten the summary; they never replace the original failure.
    async fn summarize(&self, enumerated: &[ElementHandle], entry: &mut SegmentTrace) {
        let names: Vec<String> = std::iter::once(self.config.role_attribute.as_str())
            .chain(CandidateSummary::ATTRIBUTES)
            .map(str::to_string)
            .collect();

        for &candidate in enumerated.iter().take(self.config.max_trace_candidates) {
            match self.lane.attributes(candidate, names.clone()).await {
                Ok(values) => {
                    let summary = CandidateSummary::from_values(values);
                    if !entry.available.contains(&summary) {
                        entry.available.push(summary);
                    }
                }
                Err(CallError::Cancelled) => break,
                Err(CallError::Provider(error)) => {
                    debug!(%candidate, %error, "could not summarize candidate");
                }
            }
        }
        entry.suggest();
    }
}
