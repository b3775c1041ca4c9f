//! Reads and syntax-highlights source from disk around the current break,
//! for the console's `l` command (spec.md §4.9).
//!
//! Grounded in the teacher's `ui/console/file.rs` `FileView` (line cache +
//! `syntect` highlighting); narrowed to hgdb's source languages (SystemVerilog
//! reads close enough to C for `syntect`'s bundled C syntax, so we highlight
//! with that rather than carrying a custom grammar).

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::{fs, io};
use syntect::easy::HighlightLines;
use syntect::highlighting::ThemeSet;
use syntect::parsing::SyntaxSet;
use syntect::util::as_24_bit_terminal_escaped;

const CONTEXT_LINES: u64 = 5;

pub struct SourceView {
    cache: RefCell<HashMap<PathBuf, Box<[String]>>>,
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
}

impl Default for SourceView {
    fn default() -> Self {
        Self {
            cache: RefCell::new(HashMap::new()),
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
        }
    }
}

impl SourceView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `[center - CONTEXT_LINES, center + CONTEXT_LINES]` (1-based,
    /// clamped) of `path`, or `count` lines starting at `center` if given.
    pub fn render(&self, path: &Path, center: u64, count: Option<u64>) -> io::Result<String> {
        let mut cache = self.cache.borrow_mut();
        if !cache.contains_key(path) {
            let file = fs::File::open(path)?;
            let lines: Vec<String> = io::BufReader::new(file).lines().map_while(Result::ok).collect();
            cache.insert(path.to_path_buf(), lines.into_boxed_slice());
        }
        let lines = cache.get(path).expect("just inserted");

        let (start, len) = match count {
            Some(n) => (center.saturating_sub(1), n),
            None => (center.saturating_sub(1 + CONTEXT_LINES), 2 * CONTEXT_LINES + 1),
        };

        let theme = &self.theme_set.themes["base16-ocean.dark"];
        let syntax = self
            .syntax_set
            .find_syntax_by_extension("c")
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());
        let mut highlighter = HighlightLines::new(syntax, theme);

        let mut out = String::new();
        for (i, line) in lines.iter().enumerate().skip(start as usize).take(len as usize) {
            let line_number = start + 1 + (i as u64 - start);
            let marker = if line_number == center { '>' } else { ' ' };
            match highlighter.highlight_line(line, &self.syntax_set) {
                Ok(segments) => {
                    let escaped = as_24_bit_terminal_escaped(&segments, false);
                    out.push_str(&format!("{marker}{line_number:>4} {escaped}\x1b[0m\n"));
                }
                Err(_) => out.push_str(&format!("{marker}{line_number:>4} {line}\n")),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn renders_requested_window_with_markers() {
        let mut tmp = tempfile_like();
        writeln!(tmp.1, "a\nb\nc\nd\ne").unwrap();
        let view = SourceView::new();
        let out = view.render(&tmp.0, 3, Some(2)).unwrap();
        assert!(out.contains(">   3"));
        assert!(out.lines().count() == 2);
    }

    // Avoids pulling in a `tempfile` dependency for one test: writes next to
    // the crate's own test artifacts dir and relies on the OS to clean tmp.
    fn tempfile_like() -> (PathBuf, fs::File) {
        let path = std::env::temp_dir().join(format!("hgdb-source-view-test-{}.txt", std::process::id()));
        let file = fs::File::create(&path).unwrap();
        (path, file)
    }
}
