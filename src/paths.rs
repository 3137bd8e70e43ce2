//! Glob expansion and destination mapping
//!
//! Patterns are evaluated relative to the project root with `/` separators.
//! `*` never crosses a directory boundary, `**` does, braces work
//! (`app.{sass,scss}`) and a leading `!` excludes.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{Result, StagehandError};

/// A file matched by a source pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Literal directory prefix of the pattern that matched it
    pub base: PathBuf,
}

impl SourceFile {
    /// Path below the pattern base, used to mirror the tree into the output
    pub fn relative(&self) -> &Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }
}

fn compile(pattern: &str) -> Result<globset::Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| StagehandError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn normalize(pattern: &str) -> &str {
    pattern.strip_prefix("./").unwrap_or(pattern)
}

/// Build a GlobSet from simple string patterns
pub fn build_globset<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(normalize(pattern.as_ref()))?);
    }
    builder.build().map_err(|e| StagehandError::InvalidPattern {
        pattern: patterns
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(", "),
        reason: e.to_string(),
    })
}

/// The literal directory prefix of a glob pattern
pub fn glob_base(pattern: &str) -> PathBuf {
    let pattern = normalize(pattern);
    let mut base = PathBuf::new();
    let mut parts = pattern.split('/').peekable();

    while let Some(part) = parts.next() {
        let is_glob = part.contains(['*', '?', '[', '{']);
        // The last component is a file name, never part of the base
        if is_glob || parts.peek().is_none() {
            break;
        }
        base.push(part);
    }

    base
}

/// Convert a path into a string relative to `root`, with forward slashes
///
/// Relative paths are taken as already relative to the root.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    let s = rel.to_string_lossy().replace('\\', "/");
    Some(s.strip_prefix("./").unwrap_or(&s).to_string())
}

/// Partials (`_header.pug`, `_vars.scss`) are only ever included by other files
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('_'))
        .unwrap_or(false)
}

/// Expand patterns to files, in pattern order, each pattern's matches sorted
pub fn expand<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Vec<SourceFile>> {
    let mut includes: Vec<(&str, GlobMatcher)> = Vec::new();
    let mut excludes = Vec::new();

    for pattern in patterns {
        let pattern = normalize(pattern.as_ref().trim());
        if pattern.is_empty() {
            continue;
        }
        match pattern.strip_prefix('!') {
            Some(negated) => excludes.push(normalize(negated).to_string()),
            None => includes.push((pattern, compile(pattern)?.compile_matcher())),
        }
    }

    let exclude_set = build_globset(&excludes)?;
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for (pattern, matcher) in includes {
        let base = root.join(glob_base(pattern));
        let mut matched = Vec::new();

        for entry in WalkDir::new(&base)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(rel) = relative_str(root, path) else {
                continue;
            };
            if matcher.is_match(&rel) && !exclude_set.is_match(&rel) {
                matched.push(path.to_path_buf());
            }
        }

        matched.sort();
        for path in matched {
            if seen.insert(path.clone()) {
                files.push(SourceFile {
                    path,
                    base: base.clone(),
                });
            }
        }
    }

    Ok(files)
}

/// Where a source lands in the output tree, optionally with a new extension
pub fn destination(source: &SourceFile, dest_dir: &Path, extension: Option<&str>) -> PathBuf {
    let target = dest_dir.join(source.relative());
    match extension {
        Some(ext) => target.with_extension(ext.trim_start_matches('.')),
        None => target,
    }
}

/// Join a URL-ish path onto `root`, refusing anything that escapes it
pub fn join_within(root: &Path, rel: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for component in Path::new(rel.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    #[test]
    fn test_glob_base() {
        assert_eq!(glob_base("src/pug/*.pug"), PathBuf::from("src/pug"));
        assert_eq!(glob_base("./src/img/**/*"), PathBuf::from("src/img"));
        assert_eq!(glob_base("src/sass/app.{sass,scss}"), PathBuf::from("src/sass"));
        assert_eq!(glob_base("src/js/app.js"), PathBuf::from("src/js"));
        assert_eq!(glob_base("*.html"), PathBuf::new());
    }

    #[test]
    fn test_expand_star_does_not_cross_directories() {
        let temp = tempfile::tempdir().unwrap();
        touch(temp.path(), "src/pug/index.pug");
        touch(temp.path(), "src/pug/_layout.pug");
        touch(temp.path(), "src/pug/blocks/card.pug");

        let files = expand(temp.path(), &["src/pug/*.pug"]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.relative().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["_layout.pug", "index.pug"]);

        let deep = expand(temp.path(), &["src/pug/**/*.pug"]).unwrap();
        assert_eq!(deep.len(), 3);
    }

    #[test]
    fn test_expand_keeps_pattern_order_and_excludes() {
        let temp = tempfile::tempdir().unwrap();
        touch(temp.path(), "src/js/app.js");
        touch(temp.path(), "src/js/modules/a.js");
        touch(temp.path(), "src/js/modules/b.js");
        touch(temp.path(), "src/js/modules/skip.js");

        let files = expand(
            temp.path(),
            &["src/js/app.js", "src/js/modules/*.js", "src/js/**/*.js", "!src/js/modules/skip.js"],
        )
        .unwrap();
        let rels: Vec<_> = files
            .iter()
            .map(|f| relative_str(temp.path(), &f.path).unwrap())
            .collect();
        assert_eq!(
            rels,
            vec!["src/js/app.js", "src/js/modules/a.js", "src/js/modules/b.js"]
        );
    }

    #[test]
    fn test_destination_mirrors_tree() {
        let source = SourceFile {
            path: PathBuf::from("/p/src/img/icons/a.png"),
            base: PathBuf::from("/p/src/img"),
        };
        assert_eq!(
            destination(&source, Path::new("/p/dist/img"), None),
            PathBuf::from("/p/dist/img/icons/a.png")
        );

        let page = SourceFile {
            path: PathBuf::from("/p/src/pug/about.pug"),
            base: PathBuf::from("/p/src/pug"),
        };
        assert_eq!(
            destination(&page, Path::new("/p/dist"), Some("html")),
            PathBuf::from("/p/dist/about.html")
        );
    }

    #[test]
    fn test_join_within_rejects_parent() {
        let root = Path::new("/srv/dist");
        assert_eq!(join_within(root, "/css/app.css"), Some(PathBuf::from("/srv/dist/css/app.css")));
        assert_eq!(join_within(root, "../secret"), None);
        assert!(is_partial(Path::new("src/pug/_head.pug")));
        assert!(!is_partial(Path::new("src/pug/index.pug")));
    }
}
