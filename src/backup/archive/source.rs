//! Expansion of configured source patterns into concrete paths.

use crate::backup::result_error::result::Result;
use dyn_iter::{DynIter, IntoDynIterator};
use globset::{GlobBuilder, GlobMatcher};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

static GLOB_META: [char; 4] = ['*', '?', '[', '{'];

fn has_glob_meta(s: &str) -> bool {
    s.contains(GLOB_META)
}

/// Existing, readable paths matching `pattern`, in file-name order.
///
/// A pattern without glob characters names a single path. Otherwise the
/// literal leading components are walked to exactly the depth of the
/// remaining components, and each candidate is matched against the whole
/// pattern with `*` never crossing a `/`. Paths that are missing or cannot be
/// read are dropped without complaint.
pub fn expand_pattern<'a>(pattern: &str) -> Result<DynIter<'a, PathBuf>> {
    if !has_glob_meta(pattern) {
        let path = PathBuf::from(pattern);
        return Ok(std::iter::once(path)
            .filter(|p| is_readable(p))
            .into_dyn_iter());
    }

    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();
    let (base, depth) = split_literal_base(Path::new(pattern));
    tracing::debug!("Expanding {:?} from {:?} at depth {}", pattern, base, depth);

    let paths = WalkDir::new(base)
        .min_depth(depth)
        .max_depth(depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .map(walkdir::DirEntry::into_path)
        .filter(move |p| is_match(&matcher, p))
        .filter(|p| is_readable(p));
    Ok(paths.into_dyn_iter())
}

/// Leading components free of glob characters, and how many components follow.
fn split_literal_base(pattern: &Path) -> (PathBuf, usize) {
    let mut base = PathBuf::new();
    let mut components = pattern.components().peekable();
    while let Some(component) = components.peek() {
        let literal = match component {
            Component::Normal(s) => !has_glob_meta(&s.to_string_lossy()),
            _ => true,
        };
        if !literal {
            break;
        }
        base.push(component.as_os_str());
        components.next();
    }
    if base.as_os_str().is_empty() {
        base.push(".");
    }
    (base, components.count())
}

fn is_match(matcher: &GlobMatcher, path: &Path) -> bool {
    matcher.is_match(path) || path.strip_prefix("./").is_ok_and(|p| matcher.is_match(p))
}

fn is_readable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        tracing::debug!("Skipping missing source {:?}", path);
        return false;
    };
    let readable = if metadata.is_dir() {
        std::fs::read_dir(path).is_ok()
    } else {
        std::fs::File::open(path).is_ok()
    };
    if !readable {
        tracing::debug!("Skipping unreadable source {:?}", path);
    }
    readable
}
