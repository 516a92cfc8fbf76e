pub mod dispatch;

use std::borrow::Cow;
use std::sync::Arc;

use crate::config::{MatchType, ModelMappingConfig};

#[derive(Debug, Clone)]
struct MappingRule {
    pattern: Box<str>,
    match_type: MatchType,
    target: Arc<str>,
}

impl MappingRule {
    #[inline]
    fn matches(&self, model: &str) -> bool {
        let pattern = self.pattern.as_ref();
        match self.match_type {
            MatchType::Exact => model == pattern,
            MatchType::Prefix => model.starts_with(pattern),
            MatchType::Suffix => model.ends_with(pattern),
            MatchType::Contains => model.contains(pattern),
        }
    }
}

/// Ordered requested-model -> backend-model table.
///
/// Built once from configuration and shared read-only by all requests.
/// Resolution always terminates and never fails: first matching rule, else
/// the configured default, else the requested name unchanged.
#[derive(Debug, Clone, Default)]
pub struct ModelMapper {
    rules: Vec<MappingRule>,
    default_target: Option<Arc<str>>,
}

impl ModelMapper {
    #[must_use]
    pub fn new(config: &ModelMappingConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| MappingRule {
                pattern: rule.pattern.trim().into(),
                match_type: rule.match_type,
                target: Arc::from(rule.target.trim()),
            })
            .collect();
        let default_target = config
            .default
            .as_deref()
            .map(str::trim)
            .filter(|target| !target.is_empty())
            .map(Arc::from);
        Self {
            rules,
            default_target,
        }
    }

    /// Resolve the backend model name for a requested model.
    #[must_use]
    pub fn resolve<'a>(&'a self, requested: &'a str) -> Cow<'a, str> {
        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(requested)) {
            tracing::debug!(
                requested,
                pattern = %rule.pattern,
                match_type = %rule.match_type,
                target = %rule.target,
                "model mapping rule matched"
            );
            return Cow::Borrowed(rule.target.as_ref());
        }
        match &self.default_target {
            Some(target) => Cow::Borrowed(target.as_ref()),
            None => Cow::Borrowed(requested),
        }
    }

    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
