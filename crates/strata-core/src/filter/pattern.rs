use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

#[derive(Debug, Clone)]
enum Part {
    /// `**`: zero or more whole components.
    AnyDepth,
    Glob(GlobMatcher),
}

/// One compiled path pattern.
///
/// Patterns are matched component by component against `/`-separated
/// paths. A pattern that does not start with `/` may match at any depth.
/// A path matches when the pattern matches it or one of its parents.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    parts: Vec<Part>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, globset::Error> {
        let mut parts = Vec::new();
        if !raw.starts_with('/') {
            parts.push(Part::AnyDepth);
        }
        for component in raw.split('/').filter(|c| !c.is_empty()) {
            if component == "**" {
                // Collapse runs of `**`; they match the same set.
                if !matches!(parts.last(), Some(Part::AnyDepth)) {
                    parts.push(Part::AnyDepth);
                }
                continue;
            }
            let glob = GlobBuilder::new(component)
                .literal_separator(true)
                .backslash_escape(true)
                .build()?;
            parts.push(Part::Glob(glob.compile_matcher()));
        }
        Ok(Self {
            source: raw.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `path` or one of its parent directories matches.
    pub fn matches(&self, path: &str) -> bool {
        let components = split_path(path);
        // An empty pattern (e.g. "/") would otherwise match everything.
        if self.parts.iter().all(|p| matches!(p, Part::AnyDepth)) {
            return false;
        }
        match_prefix(&self.parts, &components)
    }

    /// Whether some path below `path` could still match. Errs toward `true`.
    pub fn child_may_match(&self, path: &str) -> bool {
        child_may_match(&self.parts, &split_path(path))
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// True when `parts` is fully consumed by a leading run of `path`.
fn match_prefix(parts: &[Part], path: &[&str]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return true;
    };
    match first {
        Part::AnyDepth => (0..=path.len()).any(|skip| match_prefix(rest, &path[skip..])),
        Part::Glob(glob) => match path.split_first() {
            Some((head, tail)) => glob.is_match(head) && match_prefix(rest, tail),
            None => false,
        },
    }
}

fn child_may_match(parts: &[Part], path: &[&str]) -> bool {
    let (Some((first, rest)), Some((head, tail))) = (parts.split_first(), path.split_first())
    else {
        // Either the pattern already matched a parent, or the path ran out
        // and children may still supply the remaining components.
        return true;
    };
    match first {
        Part::AnyDepth => true,
        Part::Glob(glob) => glob.is_match(head) && child_may_match(rest, tail),
    }
}

/// A set of patterns with optional case folding.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Pattern>,
    case_insensitive: bool,
}

impl PatternList {
    /// Compile `raw` patterns, dropping (with a warning) any that fail.
    pub fn compile<S: AsRef<str>>(raw: &[S], case_insensitive: bool) -> Self {
        let mut patterns = Vec::with_capacity(raw.len());
        for pattern in raw {
            let text = if case_insensitive {
                pattern.as_ref().to_lowercase()
            } else {
                pattern.as_ref().to_string()
            };
            match Pattern::parse(&text) {
                Ok(p) => patterns.push(p),
                Err(e) => {
                    warn!(pattern = %pattern.as_ref(), error = %e, "ignoring invalid pattern");
                }
            }
        }
        Self {
            patterns,
            case_insensitive,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    fn fold<'p>(&self, path: &'p str) -> std::borrow::Cow<'p, str> {
        if self.case_insensitive {
            std::borrow::Cow::Owned(path.to_lowercase())
        } else {
            std::borrow::Cow::Borrowed(path)
        }
    }

    /// The first pattern matching `path` or one of its parents.
    pub fn first_match(&self, path: &str) -> Option<&Pattern> {
        let path = self.fold(path);
        self.patterns.iter().find(|p| p.matches(&path))
    }

    pub fn any_child_may_match(&self, path: &str) -> bool {
        let path = self.fold(path);
        self.patterns.iter().any(|p| p.child_may_match(&path))
    }
}
