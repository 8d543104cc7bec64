use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories that are never scanned: build output and vendored reference code.
const SKIPPED_DIRS: [&str; 2] = ["./target", "./examples"];

const FORBIDDEN_WORDS: &str = "FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*|///).*(?:{FORBIDDEN_WORDS})"),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::UppercaseComment => r"(//|/\*|///).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    // The underscore rule also polices this script.
    fn scans_build_script(self) -> bool {
        self == Rule::UnderscorePrefix
    }

    fn explanation(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "Underscore-prefixed variable names are not allowed in this project.\n   \
                 Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenWord => {
                "Comments narrating edits (FIXED, CHANGED, UPDATE and similar) are not allowed.\n   \
                 Remove them completely rather than commenting them out."
            }
            Rule::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (but is allowed in doc comments)."
            }
            Rule::UppercaseComment => {
                "Comments where all alphabetic characters are uppercase are not allowed."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes are not allowed.\n   \
                 Either use the code (removing the attribute) or remove it completely."
            }
        }
    }
}

// Collects the offending lines of one file for one rule.
struct Collector {
    rule: Rule,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl Collector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn is_violation(&self, line_text: &str) -> bool {
        let trimmed = line_text.trim_start();
        match self.rule {
            Rule::UnderscorePrefix => {
                let is_comment = trimmed.starts_with("//")
                    || (line_text.contains("/*")
                        && !line_text.contains("*/match")
                        && !line_text.contains("*/let"));
                // Odd-numbered pieces after splitting on quotes are string contents.
                let in_string = line_text
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !is_comment && !in_string
            }
            Rule::StarsInComment => !trimmed.starts_with("///"),
            Rule::UppercaseComment => comment_text(line_text).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ ERROR: {} violation(s) in {}:\n",
            self.violations.len(),
            self.file_path.display()
        );
        for violation in &self.violations {
            message.push_str(&format!("   {violation}\n"));
        }
        message.push_str(&format!("\n⚠️ {}\n", self.rule.explanation()));
        Some(message)
    }
}

impl Sink for Collector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

// Text of the comment on `line`, without its opening marker.
fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else if let Some(start) = line.find("/*") {
        let rest = &line[start + 2..];
        Some(rest.find("*/").map_or(rest, |end| &rest[..end]).trim())
    } else {
        None
    }
}

fn rust_sources(include_build_script: bool) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|e| !SKIPPED_DIRS.iter().any(|dir| e.path().starts_with(dir)))
        .filter_map(|e| e.ok())
        .filter(move |e| include_build_script || e.file_name() != "build.rs")
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in rust_sources(rule.scans_build_script()) {
        if std::fs::read_to_string(&path).is_err() {
            continue;
        }
        let mut collector = Collector::new(rule, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(message) = collector.error_message() {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in ["panel", "stats", "cli", "tests", "benches"] {
        println!("cargo:rerun-if-changed={dir}");
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=ESGPANEL_BUILD_TIMESTAMP={timestamp}");

    for rule in [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ] {
        if let Err(e) = scan(rule) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
