use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding first-party Rust sources.
const SOURCE_DIRS: [&str; 4] = ["smooth", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

/// One lint rule: a line regex plus a filter deciding whether a match counts.
struct Rule {
    name: &'static str,
    pattern: String,
    accept: fn(&str) -> bool,
    advice: &'static str,
}

// Collects every accepted match from a single file.
struct RuleCollector<'a> {
    rule: &'a Rule,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl<'a> RuleCollector<'a> {
    fn new(rule: &'a Rule, file_path: &Path) -> Self {
        Self {
            rule,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut message = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.name,
            self.file_path.display()
        );
        for violation in &self.violations {
            message.push_str(&format!("   {violation}\n"));
        }
        message.push_str(&format!("\n⚠️ {}\n", self.rule.advice));
        Some(message)
    }
}

impl Sink for RuleCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.rule.accept)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = scan_sources(&rules()) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "underscore-prefixed bindings",
            pattern: r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            accept: is_code_binding,
            advice: "Underscore-prefixed names are not allowed. Use the binding or remove it.",
        },
        Rule {
            name: "#[allow(dead_code)] attributes",
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            accept: |_| true,
            advice: "Either use the code or remove it.",
        },
        Rule {
            name: "change-log comments",
            pattern: format!(r"(//|/\*).*(?:{})", FORBIDDEN_WORDS.join("|")),
            accept: |_| true,
            advice: "Comments must describe the code, not its history.",
        },
        Rule {
            name: "'**' in plain comments",
            pattern: r"(//|/\*).*\*\*".to_string(),
            accept: |line| !line.trim_start().starts_with("///"),
            advice: "The '**' pattern is only allowed in doc comments.",
        },
        Rule {
            name: "all-uppercase comments",
            pattern: r"^\s*//".to_string(),
            accept: is_shouting_comment,
            advice: "Comments where all alphabetic characters are uppercase are not allowed.",
        },
    ]
}

fn scan_sources(rules: &[Rule]) -> Result<(), Box<dyn Error>> {
    let mut searcher = Searcher::new();
    let matchers = rules
        .iter()
        .map(|rule| RegexMatcher::new_line_matcher(&rule.pattern))
        .collect::<Result<Vec<_>, _>>()?;

    for entry in SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
    {
        let path = entry.path();
        for (rule, matcher) in rules.iter().zip(&matchers) {
            let mut collector = RuleCollector::new(rule, path);
            searcher.search_path(matcher, path, &mut collector)?;
            if let Some(message) = collector.error_message() {
                return Err(message.into());
            }
        }
    }
    Ok(())
}

// Skips comments and matches that sit inside string literals.
fn is_code_binding(line: &str) -> bool {
    if line.trim_start().starts_with("//") {
        return false;
    }
    !line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn is_shouting_comment(line: &str) -> bool {
    let comment = line.trim_start().trim_start_matches('/').trim_start_matches('!');
    let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}
