use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources. Nothing else in the checkout is scanned.
const SOURCE_DIRS: [&str; 5] = ["pipeline", "inference", "cli", "tests", "benches"];

// Words that describe an edit rather than the code, and so never belong in a comment.
const EDIT_WORDS: &str = "FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

/// One policy rule: a line regex plus a per-line filter deciding whether a match counts.
struct Rule {
    name: &'static str,
    pattern: String,
    accept: fn(&str) -> bool,
    advice: &'static str,
}

// Collects the offending lines of one file for one rule.
struct Violations {
    accept: fn(&str) -> bool,
    lines: Vec<String>,
}

impl Sink for Violations {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.accept)(line_text) {
            self.lines.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = check_sources() {
        // eprintln so the report shows up in cargo's output.
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "underscore-prefixed identifiers",
            pattern: r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            accept: is_underscore_binding,
            advice: "Either use the binding (removing the underscore) or remove it completely.",
        },
        Rule {
            name: "edit-log words in comments",
            pattern: format!(r"(//|/\*).*(?:{EDIT_WORDS})"),
            accept: |_| true,
            advice: "Comments describe the code, not the edit that produced it. Remove them.",
        },
        Rule {
            name: "'**' in regular comments",
            pattern: r"(//|/\*).*\*\*".to_string(),
            accept: |line| !is_doc_comment(line),
            advice: "Use '**' only in doc comments.",
        },
        Rule {
            name: "all-uppercase comments",
            pattern: r"(//|/\*).*".to_string(),
            accept: is_all_uppercase_comment,
            advice: "Strongly consider deleting the comment completely.",
        },
        Rule {
            name: "#[allow(dead_code)] attributes",
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            accept: |_| true,
            advice: "Either use the code (removing the attribute) or remove it completely.",
        },
    ]
}

fn check_sources() -> Result<(), Box<dyn Error>> {
    let files = rust_sources();
    let mut searcher = Searcher::new();

    for rule in rules() {
        let matcher = RegexMatcher::new_line_matcher(&rule.pattern)?;
        for path in &files {
            let mut violations = Violations {
                accept: rule.accept,
                lines: Vec::new(),
            };
            searcher.search_path(&matcher, path, &mut violations)?;
            if !violations.lines.is_empty() {
                return Err(report(&rule, path, &violations.lines).into());
            }
        }
    }
    Ok(())
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn report(rule: &Rule, path: &Path, lines: &[String]) -> String {
    let mut message = format!(
        "\n❌ ERROR: Found {} {} in {}:\n",
        lines.len(),
        rule.name,
        path.display()
    );
    for line in lines {
        message.push_str(&format!("   {line}\n"));
    }
    message.push_str(&format!(
        "\n⚠️ {} are not allowed in this project.\n   {}\n",
        rule.name, rule.advice
    ));
    message
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// Underscore names inside comments or string literals are not bindings.
fn is_underscore_binding(line: &str) -> bool {
    if line.trim_start().starts_with("//") || line.contains("/*") {
        return false;
    }
    let inside_string = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !inside_string
}

fn is_all_uppercase_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    let comment = if let Some(rest) = trimmed.strip_prefix("//") {
        rest.trim_start_matches(['/', '!'])
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        rest.find("*/").map_or(rest, |end| &rest[..end])
    } else {
        return false;
    };

    let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(|c| c.is_uppercase())
}
