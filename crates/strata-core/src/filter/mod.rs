pub mod marker;
pub mod options;
pub mod pattern;

use tracing::debug;

use strata_types::error::Result;

use self::marker::MarkerPredicate;
use self::pattern::PatternList;
use crate::repo::Repository;
use crate::tree::Node;

pub use self::options::{ExcludeOptions, IncludeOptions};

/// Outcome of selecting one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Reject,
    Keep,
    /// Kept because an inclusion pattern named it; survives even when empty.
    KeepExplicit,
}

impl Decision {
    pub fn is_kept(self) -> bool {
        self != Decision::Reject
    }
}

/// One independent rejection rule. Each variant owns its own state.
#[derive(Debug)]
pub enum Predicate {
    Pattern(PatternList),
    InsensitivePattern(PatternList),
    /// Literal paths, compared exactly.
    Verbatim(Vec<String>),
    Marker(MarkerPredicate),
}

impl Predicate {
    pub fn kind(&self) -> &'static str {
        match self {
            Predicate::Pattern(_) => "pattern",
            Predicate::InsensitivePattern(_) => "insensitive-pattern",
            Predicate::Verbatim(_) => "verbatim",
            Predicate::Marker(_) => "marker",
        }
    }

    fn rejects(&self, path: &str, node: &Node, repo: &Repository) -> Result<bool> {
        match self {
            Predicate::Pattern(list) | Predicate::InsensitivePattern(list) => {
                Ok(list.first_match(path).is_some())
            }
            Predicate::Verbatim(paths) => Ok(paths.iter().any(|p| p == path)),
            Predicate::Marker(marker) => marker.rejects(path, node, repo),
        }
    }
}

/// Inclusion patterns; anything they do not reach is rejected.
#[derive(Debug, Default)]
pub struct IncludeSet {
    pub sensitive: PatternList,
    pub insensitive: PatternList,
}

impl IncludeSet {
    fn decide(&self, path: &str, node: &Node) -> Decision {
        if self.sensitive.first_match(path).is_some()
            || self.insensitive.first_match(path).is_some()
        {
            return Decision::KeepExplicit;
        }
        if node.is_dir()
            && (self.sensitive.any_child_may_match(path)
                || self.insensitive.any_child_may_match(path))
        {
            return Decision::Keep;
        }
        Decision::Reject
    }
}

/// Decides per path whether a node survives a rewrite.
#[derive(Debug, Default)]
pub struct Selector {
    predicates: Vec<Predicate>,
    include: Option<IncludeSet>,
}

impl Selector {
    pub fn new(predicates: Vec<Predicate>, include: Option<IncludeSet>) -> Self {
        Self {
            predicates,
            include,
        }
    }

    /// Keeps everything.
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn from_options(exclude: &ExcludeOptions, include: &IncludeOptions) -> Result<Self> {
        Ok(Self::new(exclude.collect()?, include.collect()?))
    }

    /// Whether this selector can reject anything at all.
    pub fn is_filtering(&self) -> bool {
        !self.predicates.is_empty() || self.include.is_some()
    }

    pub fn has_includes(&self) -> bool {
        self.include.is_some()
    }

    /// A node is rejected if any predicate rejects it; otherwise inclusion
    /// patterns (if any) decide.
    pub fn select(&self, path: &str, node: &Node, repo: &Repository) -> Result<Decision> {
        for predicate in &self.predicates {
            if predicate.rejects(path, node, repo)? {
                debug!(path, predicate = predicate.kind(), "excluding");
                return Ok(Decision::Reject);
            }
        }
        let decision = match &self.include {
            Some(include) => include.decide(path, node),
            None => Decision::Keep,
        };
        if decision == Decision::Reject {
            debug!(path, "not included");
        }
        Ok(decision)
    }
}
