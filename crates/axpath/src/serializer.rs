//! Live element to path text.
//!
//! For every level of the ancestor chain the serializer emits the role plus
//! the smallest predicate set it can verify, at generation time, picks that
//! element out among its siblings. When attributes alone cannot, a 1-based
//! index is appended. The tree may change before the path is used, so a
//! generated path is expected, not proven, to resolve back to its element.

use crate::config::EngineConfig;
use crate::errors::SerializeError;
use crate::matcher::{attributes, MatchTable};
use crate::provider::{ElementHandle, ProviderLane};
use crate::segment::{is_valid_role, ElementPath, Predicate, Segment};
use std::num::NonZeroUsize;
use tracing::debug;

/// Escape `value` for use between the quotes of a predicate.
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn check_role(level: usize, role: &str) -> Result<(), SerializeError> {
    if is_valid_role(role) {
        Ok(())
    } else {
        Err(SerializeError::InvalidRole {
            level,
            role: role.to_string(),
        })
    }
}

/// Attributes consulted for non-root levels, most specific first.
const IDENTIFYING_ATTRIBUTES: [&str; 3] = [
    attributes::IDENTIFIER,
    attributes::DESCRIPTION,
    attributes::TITLE,
];

/// Role followed by the identifying attributes, as read in one batch.
#[derive(Debug, Clone)]
struct Profile {
    role: Option<String>,
    identifying: [Option<String>; 3],
}

impl Profile {
    fn names(role_attribute: &str) -> Vec<String> {
        std::iter::once(role_attribute)
            .chain(IDENTIFYING_ATTRIBUTES)
            .map(str::to_string)
            .collect()
    }

    fn from_values(values: Vec<Option<String>>) -> Self {
        let mut values = values.into_iter().map(|v| v.filter(|s| !s.is_empty()));
        Self {
            role: values.next().flatten(),
            identifying: [
                values.next().flatten(),
                values.next().flatten(),
                values.next().flatten(),
            ],
        }
    }

    fn satisfies(&self, role: &str, predicates: &[Predicate], matcher: &MatchTable) -> bool {
        if self.role.as_deref() != Some(role) {
            return false;
        }
        predicates.iter().all(|p| {
            IDENTIFYING_ATTRIBUTES
                .iter()
                .position(|name| *name == p.name)
                .and_then(|i| self.identifying[i].as_deref())
                .is_some_and(|actual| matcher.matches(&p.name, &p.value, actual))
        })
    }
}

pub(crate) struct PathSerializer<'a> {
    pub lane: &'a ProviderLane,
    pub matcher: &'a MatchTable,
    pub config: &'a EngineConfig,
}

impl PathSerializer<'_> {
    /// Build a path for `element`, whose ancestors are given outermost first.
    pub async fn serialize(
        &self,
        element: ElementHandle,
        ancestors: &[ElementHandle],
    ) -> Result<ElementPath, SerializeError> {
        let chain: Vec<ElementHandle> = ancestors
            .iter()
            .copied()
            .chain(std::iter::once(element))
            .collect();

        let mut segments = Vec::with_capacity(chain.len());
        for (level, handle) in chain.iter().enumerate() {
            let segment = if level == 0 {
                self.root_segment(*handle).await?
            } else {
                self.child_segment(level, chain[level - 1], *handle).await?
            };
            segments.push(segment);
        }

        let path = ElementPath::new(self.config.prefix.clone(), segments)
            .map_err(|_| SerializeError::MissingRole { level: 0 })?;
        debug!(%path, "generated element path");
        Ok(path)
    }

    /// Path of `element` given the already generated path of its `parent`.
    pub async fn extend(
        &self,
        base: &ElementPath,
        parent: ElementHandle,
        element: ElementHandle,
    ) -> Result<ElementPath, SerializeError> {
        let level = base.len();
        let mut segments = base.segments().to_vec();
        segments.push(self.child_segment(level, parent, element).await?);
        ElementPath::new(base.prefix(), segments).map_err(|_| SerializeError::MissingRole { level })
    }

    async fn root_segment(&self, handle: ElementHandle) -> Result<Segment, SerializeError> {
        let names = vec![
            self.config.role_attribute.clone(),
            attributes::BUNDLE_IDENTIFIER.to_string(),
            attributes::TITLE.to_string(),
            attributes::IDENTIFIER.to_string(),
            attributes::DESCRIPTION.to_string(),
        ];
        let values = self
            .lane
            .attributes(handle, names)
            .await
            .map_err(|e| SerializeError::from_call(e, 0))?;
        let mut values = values.into_iter().map(|v| v.filter(|s| !s.is_empty()));
        let role = values
            .next()
            .flatten()
            .ok_or(SerializeError::MissingRole { level: 0 })?;
        check_role(0, &role)?;
        let bundle_id = values.next().flatten();
        let title = values.next().flatten();
        let identifier = values.next().flatten();
        let description = values.next().flatten();

        let mut segment = Segment::new(role.clone());
        if role == self.config.application_role {
            if let Some(bundle_id) = bundle_id {
                segment.predicates.push(Predicate::new(attributes::BUNDLE_IDENTIFIER, bundle_id));
            } else if let Some(title) = title {
                segment.predicates.push(Predicate::new(attributes::TITLE, title));
            }
        } else if let Some((name, value)) = [
            (attributes::IDENTIFIER, identifier),
            (attributes::DESCRIPTION, description),
            (attributes::TITLE, title),
        ]
        .into_iter()
        .find_map(|(name, value)| value.map(|v| (name, v)))
        {
            segment.predicates.push(Predicate::new(name, value));
        }
        Ok(segment)
    }

    async fn child_segment(
        &self,
        level: usize,
        parent: ElementHandle,
        handle: ElementHandle,
    ) -> Result<Segment, SerializeError> {
        let siblings = self
            .lane
            .children(parent)
            .await
            .map_err(|e| SerializeError::from_call(e, level))?;
        if !siblings.contains(&handle) {
            return Err(SerializeError::NotAChild { level });
        }

        let names = Profile::names(&self.config.role_attribute);
        let mut profiles = Vec::with_capacity(siblings.len());
        for sibling in &siblings {
            let values = self
                .lane
                .attributes(*sibling, names.clone())
                .await
                .map_err(|e| SerializeError::from_call(e, level))?;
            profiles.push((*sibling, Profile::from_values(values)));
        }

        let own = profiles
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, p)| p.clone())
            .ok_or(SerializeError::NotAChild { level })?;
        let role = own
            .role
            .clone()
            .ok_or(SerializeError::MissingRole { level })?;
        check_role(level, &role)?;

        let matching = |predicates: &[Predicate]| -> Vec<ElementHandle> {
            profiles
                .iter()
                .filter(|(_, p)| p.satisfies(&role, predicates, self.matcher))
                .map(|(h, _)| *h)
                .collect()
        };

        let mut predicates = Vec::new();
        let mut survivors = matching(&predicates);
        for (name, value) in IDENTIFYING_ATTRIBUTES.iter().zip(own.identifying.iter()) {
            let Some(value) = value else { continue };
            if !predicates.is_empty() && survivors.len() <= 1 {
                break;
            }
            predicates.push(Predicate::new(*name, value.clone()));
            survivors = matching(&predicates);
        }

        let mut segment = Segment::new(role);
        segment.predicates = predicates;
        if survivors.len() > 1 {
            let position = survivors
                .iter()
                .position(|h| *h == handle)
                .ok_or(SerializeError::NotAChild { level })?;
            segment.index = NonZeroUsize::new(position + 1);
        }
        Ok(segment)
    }
}
