use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources. Anything else under the
// package root (build output, data, reference material) is never scanned.
const SOURCE_DIRS: [&str; 4] = ["curve", "src", "tests", "benches"];

// One source policy: a line pattern, a filter deciding whether a matched line
// really violates it, and the explanation printed when it does.
struct Rule {
    name: &'static str,
    pattern: &'static str,
    applies: fn(&str) -> bool,
    advice: &'static str,
}

// Collects every violating line of a single file so the error lists them all.
struct LineCollector {
    violations: Vec<String>,
    file_path: PathBuf,
    applies: fn(&str) -> bool,
}

impl LineCollector {
    fn new(file_path: &Path, applies: fn(&str) -> bool) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
            applies,
        }
    }

    fn check_and_get_error_message(&self, rule: &Rule) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            rule.name,
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", rule.advice));
        Some(error_msg)
    }
}

impl Sink for LineCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if (self.applies)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with("//")
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///") || line.trim_start().starts_with("//!")
}

// Underscore-prefixed names inside comments or string literals are not bindings.
fn underscore_binding(line: &str) -> bool {
    if is_comment_line(line) {
        return false;
    }
    let in_string = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !in_string
}

fn always(_: &str) -> bool {
    true
}

fn plain_comment_with_stars(line: &str) -> bool {
    is_comment_line(line) && !is_doc_comment(line)
}

fn shouting_comment(line: &str) -> bool {
    if !is_comment_line(line) {
        return false;
    }
    let body = line.trim_start().trim_start_matches('/').trim_start_matches('!');
    let mut letters = body.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(|c| c.is_uppercase())
}

fn rules() -> [Rule; 4] {
    [
        Rule {
            name: "underscore-prefixed bindings",
            pattern: r"\b(_[a-zA-Z0-9_]+)\b",
            applies: underscore_binding,
            advice: "Underscore-prefixed names are not allowed. Use the binding or remove it.",
        },
        Rule {
            name: "#[allow(dead_code)] attributes",
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
            applies: always,
            advice: "Dead code must be removed, not silenced.",
        },
        Rule {
            name: "'**' markers in plain comments",
            pattern: r"//.*\*\*",
            applies: plain_comment_with_stars,
            advice: "Emphasis markers belong in doc comments only.",
        },
        Rule {
            name: "all-uppercase comments",
            pattern: r"//.*",
            applies: shouting_comment,
            advice: "Comments made only of uppercase letters are not allowed.",
        },
    ]
}

fn source_files() -> impl Iterator<Item = PathBuf> {
    SOURCE_DIRS.into_iter().flat_map(|dir| {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.into_path())
    })
}

fn scan(rule: &Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
    let mut searcher = Searcher::new();

    for path in source_files() {
        let mut collector = LineCollector::new(&path, rule.applies);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message(rule) {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    for rule in rules() {
        if let Err(e) = scan(&rule) {
            // Printed to stderr so cargo shows it with the failed build.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
