use std::path::Path;

use strata_types::error::{Result, StrataError};

use super::marker::MarkerPredicate;
use super::pattern::PatternList;
use super::{IncludeSet, Predicate};

/// Rejection flags as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ExcludeOptions {
    pub excludes: Vec<String>,
    pub insensitive_excludes: Vec<String>,
    pub excludes_verbatim: Vec<String>,
    pub exclude_files: Vec<String>,
    pub insensitive_exclude_files: Vec<String>,
    pub exclude_files_verbatim: Vec<String>,
    /// `name[:signature]` marker specs.
    pub exclude_if_present: Vec<String>,
}

/// Inclusion flags as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct IncludeOptions {
    pub includes: Vec<String>,
    pub insensitive_includes: Vec<String>,
    pub include_files: Vec<String>,
    pub insensitive_include_files: Vec<String>,
}

impl ExcludeOptions {
    pub fn is_empty(&self) -> bool {
        self.excludes.is_empty()
            && self.insensitive_excludes.is_empty()
            && self.excludes_verbatim.is_empty()
            && self.exclude_files.is_empty()
            && self.insensitive_exclude_files.is_empty()
            && self.exclude_files_verbatim.is_empty()
            && self.exclude_if_present.is_empty()
    }

    /// Read pattern files and build the rejection predicates.
    ///
    /// Unreadable files and malformed marker specs are usage errors;
    /// patterns that fail to compile are dropped with a warning.
    pub fn collect(&self) -> Result<Vec<Predicate>> {
        let mut excludes = self.excludes.clone();
        excludes.extend(read_pattern_files(&self.exclude_files)?);

        let mut insensitive = self.insensitive_excludes.clone();
        insensitive.extend(read_pattern_files(&self.insensitive_exclude_files)?);

        let mut verbatim = self.excludes_verbatim.clone();
        for file in &self.exclude_files_verbatim {
            verbatim.extend(read_verbatim_lines(file)?);
        }

        let mut predicates = Vec::new();
        if !insensitive.is_empty() {
            predicates.push(Predicate::InsensitivePattern(PatternList::compile(
                &insensitive,
                true,
            )));
        }
        if !excludes.is_empty() {
            predicates.push(Predicate::Pattern(PatternList::compile(&excludes, false)));
        }
        if !verbatim.is_empty() {
            predicates.push(Predicate::Verbatim(verbatim));
        }
        for spec in &self.exclude_if_present {
            predicates.push(Predicate::Marker(MarkerPredicate::parse(spec)?));
        }
        Ok(predicates)
    }
}

impl IncludeOptions {
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty()
            && self.insensitive_includes.is_empty()
            && self.include_files.is_empty()
            && self.insensitive_include_files.is_empty()
    }

    /// Build the inclusion set, or `None` when no inclusion flag was given.
    pub fn collect(&self) -> Result<Option<IncludeSet>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut includes = self.includes.clone();
        includes.extend(read_pattern_files(&self.include_files)?);

        let mut insensitive = self.insensitive_includes.clone();
        insensitive.extend(read_pattern_files(&self.insensitive_include_files)?);

        Ok(Some(IncludeSet {
            sensitive: PatternList::compile(&includes, false),
            insensitive: PatternList::compile(&insensitive, true),
        }))
    }
}

fn read_file(filename: &str) -> Result<String> {
    let data = std::fs::read(Path::new(filename)).map_err(|e| {
        StrataError::Usage(format!("failed to read patterns from file {filename:?}: {e}"))
    })?;
    // Tolerate a UTF-8 byte order mark written by some editors.
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&data);
    Ok(String::from_utf8_lossy(data).into_owned())
}

/// One pattern per line: trimmed, blank and `#` lines skipped, `$VAR`
/// expanded from the environment.
pub fn read_pattern_files(files: &[String]) -> Result<Vec<String>> {
    let mut patterns = Vec::new();
    for filename in files {
        for line in read_file(filename)?.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            patterns.push(expand_env(line));
        }
    }
    Ok(patterns)
}

/// Every line taken literally, apart from the line terminator.
pub fn read_verbatim_lines(filename: &str) -> Result<Vec<String>> {
    Ok(read_file(filename)?
        .lines()
        .map(str::to_string)
        .collect())
}

/// Expand `$VAR` and `${VAR}`; `$$` yields a literal `$`. Unset variables
/// expand to nothing.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    out.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    // Unterminated: keep the text as written.
                    out.push_str(&rest[pos..]);
                    rest = "";
                }
            }
        } else {
            let len = after
                .find(|c: char| !(c == '_' || c.is_ascii_alphanumeric()))
                .unwrap_or(after.len());
            if len == 0 {
                out.push('$');
            } else {
                out.push_str(&std::env::var(&after[..len]).unwrap_or_default());
            }
            rest = &after[len..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn pattern_file_skips_comments_and_trims() {
        std::env::set_var("STRATA_TEST_PATTERN_DIR", "cache");
        let f = temp_file("# comment\n\n  *.tmp  \n/home/$STRATA_TEST_PATTERN_DIR\nprice$$\n");
        let patterns = read_pattern_files(&[f.path().to_str().unwrap().to_string()]).unwrap();
        assert_eq!(patterns, ["*.tmp", "/home/cache", "price$"]);
    }

    #[test]
    fn verbatim_file_keeps_lines_as_written() {
        let f = temp_file("/a b/ \n#not a comment\n/$HOME\n");
        let lines = read_verbatim_lines(f.path().to_str().unwrap()).unwrap();
        assert_eq!(lines, ["/a b/ ", "#not a comment", "/$HOME"]);
    }

    #[test]
    fn missing_pattern_file_is_usage_error() {
        let opts = ExcludeOptions {
            exclude_files: vec!["/nonexistent/strata/patterns.txt".into()],
            ..Default::default()
        };
        match opts.collect() {
            Err(StrataError::Usage(msg)) => assert!(msg.contains("failed to read patterns")),
            other => panic!("unexpected: {:?}", other.map(|p| p.len())),
        }
    }

    #[test]
    fn expand_env_forms() {
        std::env::set_var("STRATA_TEST_EXPAND", "x");
        std::env::remove_var("STRATA_TEST_EXPAND_UNSET");
        assert_eq!(expand_env("a$STRATA_TEST_EXPAND/b"), "ax/b");
        assert_eq!(expand_env("${STRATA_TEST_EXPAND}y"), "xy");
        assert_eq!(expand_env("$STRATA_TEST_EXPAND_UNSET."), ".");
        assert_eq!(expand_env("$$ and $"), "$ and $");
        assert_eq!(expand_env("${open"), "${open");
    }

    #[test]
    fn collect_orders_predicates_and_counts_markers() {
        let opts = ExcludeOptions {
            excludes: vec!["*.o".into()],
            insensitive_excludes: vec!["*.TMP".into()],
            excludes_verbatim: vec!["/exact".into()],
            exclude_if_present: vec![".nobackup".into(), "CACHEDIR.TAG:Signature".into()],
            ..Default::default()
        };
        assert!(!opts.is_empty());
        let kinds: Vec<_> = opts.collect().unwrap().iter().map(Predicate::kind).collect();
        assert_eq!(
            kinds,
            ["insensitive-pattern", "pattern", "verbatim", "marker", "marker"]
        );
    }
}
