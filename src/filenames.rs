//! Filename index: resolves bare basenames to full server paths, and picks
//! a short, unambiguous display name for a full path (spec.md §3,
//! "Filename index" and §4.9 "Filename resolution").

use std::collections::HashMap;

#[derive(Default)]
pub struct FilenameIndex {
    /// `(basename | full_path) -> full_path`. A basename shared by two or
    /// more full paths is deliberately absent here; only an unambiguous
    /// basename is a valid shortcut.
    forward: HashMap<String, String>,
    /// `full_path -> shortest unique display name`.
    reverse: HashMap<String, String>,
}

impl FilenameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from the server's full file list. Called once after
    /// connect.
    pub fn build(files: &[String]) -> Self {
        let mut by_basename: HashMap<String, Vec<&String>> = HashMap::new();
        for full in files {
            let base = basename(full);
            by_basename.entry(base.to_string()).or_default().push(full);
        }

        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        for full in files {
            forward.insert(full.clone(), full.clone());

            let base = basename(full);
            let is_ambiguous = by_basename
                .get(base)
                .map(|owners| owners.len() > 1)
                .unwrap_or(false);
            if !is_ambiguous {
                forward.insert(base.to_string(), full.clone());
                reverse.insert(full.clone(), base.to_string());
            } else {
                reverse.insert(full.clone(), full.clone());
            }
        }

        Self { forward, reverse }
    }

    /// Resolve a basename or full path to the server's full path.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.forward.get(name).map(String::as_str)
    }

    /// Shortest unambiguous display name for a full path, falling back to
    /// the full path itself if it was never indexed (e.g. a path the
    /// server reported after the initial file list was built).
    pub fn display_name<'a>(&'a self, full_path: &'a str) -> &'a str {
        self.reverse
            .get(full_path)
            .map(String::as_str)
            .unwrap_or(full_path)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unique_basename_is_a_valid_shortcut() {
        let idx = FilenameIndex::build(&["/a/foo.sv".to_string(), "/b/bar.sv".to_string()]);
        assert_eq!(idx.resolve("foo.sv"), Some("/a/foo.sv"));
        assert_eq!(idx.display_name("/a/foo.sv"), "foo.sv");
    }

    #[test]
    fn shared_basename_is_not_a_shortcut() {
        let idx = FilenameIndex::build(&["/a/foo.sv".to_string(), "/b/foo.sv".to_string()]);
        assert_eq!(idx.resolve("foo.sv"), None);
        assert_eq!(idx.resolve("/a/foo.sv"), Some("/a/foo.sv"));
        assert_eq!(idx.display_name("/a/foo.sv"), "/a/foo.sv");
        assert_eq!(idx.display_name("/b/foo.sv"), "/b/foo.sv");
    }
}
