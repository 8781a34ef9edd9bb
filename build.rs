use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only the crate's own sources are policed. Anything else under the package root
// (vendored data, scratch directories, build output) is ignored.
const SOURCE_ROOTS: [&str; 4] = ["search", "src", "tests", "benches"];

// Which lines a rule reports once the regex has matched.
#[derive(Clone, Copy)]
enum Filter {
    // Drop matches that sit inside a comment or a string literal.
    CodeOnly,
    // Drop `**` inside doc comments, where it is markdown emphasis.
    NonDocComment,
    // Keep only comments whose alphabetic characters are all uppercase.
    ShoutingComment,
    // Keep every match.
    All,
}

struct Rule {
    name: &'static str,
    pattern: &'static str,
    filter: Filter,
    skip_build_script: bool,
    advice: &'static str,
}

const RULES: [Rule; 5] = [
    Rule {
        name: "underscore-prefixed identifiers",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        filter: Filter::CodeOnly,
        skip_build_script: false,
        advice: "Either use the binding (removing the underscore) or remove it completely.",
    },
    Rule {
        name: "forbidden comment words",
        pattern: r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)",
        filter: Filter::All,
        skip_build_script: true,
        advice: "Comments narrating edits are not allowed. Describe the code as it is.",
    },
    Rule {
        name: "'**' in regular comments",
        pattern: r"(//|/\*).*\*\*",
        filter: Filter::NonDocComment,
        skip_build_script: true,
        advice: "The '**' pattern is only allowed in doc comments.",
    },
    Rule {
        name: "all-uppercase comments",
        pattern: r"(//|/\*|///).*",
        filter: Filter::ShoutingComment,
        skip_build_script: true,
        advice: "Rewrite the comment in sentence case, or delete it.",
    },
    Rule {
        name: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        filter: Filter::All,
        skip_build_script: true,
        advice: "Either use the code (removing the attribute) or remove it completely.",
    },
];

// Collects the matching lines of one file that survive the rule's filter.
struct ViolationCollector {
    filter: Filter,
    violations: Vec<String>,
}

impl ViolationCollector {
    fn new(filter: Filter) -> Self {
        Self {
            filter,
            violations: Vec::new(),
        }
    }

    fn keeps(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self.filter {
            Filter::All => true,
            Filter::CodeOnly => {
                let is_comment = trimmed.starts_with("//") || line.contains("/*");
                // Odd-numbered pieces of a quote split are inside a string literal.
                let is_in_string = line
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !is_comment && !is_in_string
            }
            Filter::NonDocComment => !trimmed.starts_with("///"),
            Filter::ShoutingComment => comment_text(trimmed).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
        }
    }

    fn error_message(&self, rule: &Rule, path: &Path) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            rule.name,
            path.display()
        );
        for violation in &self.violations {
            msg.push_str(&format!("   {violation}\n"));
        }
        msg.push_str(&format!("\n⚠️ {}\n", rule.advice));
        Some(msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.keeps(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

// The text of a line comment or the first block comment on the line.
fn comment_text(trimmed: &str) -> Option<&str> {
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else if let Some(idx) = trimmed.find("/*") {
        let body = &trimmed[idx + 2..];
        Some(body.find("*/").map_or(body, |end| &body[..end]).trim())
    } else {
        None
    }
}

fn rust_sources() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = SOURCE_ROOTS
        .iter()
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect();
    files.push(PathBuf::from("build.rs"));
    files
}

fn check_sources() -> Result<(), Box<dyn Error>> {
    let files = rust_sources();
    let mut searcher = Searcher::new();

    for rule in &RULES {
        let matcher = RegexMatcher::new_line_matcher(rule.pattern)?;
        for path in &files {
            if rule.skip_build_script && path.file_name().is_some_and(|n| n == "build.rs") {
                continue;
            }
            let mut collector = ViolationCollector::new(rule.filter);
            searcher.search_path(&matcher, path, &mut collector)?;
            if let Some(msg) = collector.error_message(rule, path) {
                return Err(msg.into());
            }
        }
    }
    Ok(())
}

// Compiles this script with strict lints to keep it held to the same policy.
fn check_build_script_lints() {
    let status = std::process::Command::new("rustc")
        .args([
            "--edition",
            "2021",
            "-D",
            "unused_variables",
            "-D",
            "dead_code",
            "-D",
            "unused_imports",
            "--crate-type",
            "bin",
            "--error-format",
            "human",
            "build.rs",
        ])
        .output();

    match status {
        Ok(output) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            for needle in ["unused variable", "is never used", "unused import"] {
                if stderr.contains(needle) {
                    eprintln!("\n❌ ERROR: build.rs fails its own lint policy ({needle}).");
                    eprintln!("{stderr}");
                    std::process::exit(1);
                }
            }
        }
        Ok(_) => {}
        Err(_) => {
            println!("cargo:warning=Could not run rustc to lint build.rs");
        }
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    check_build_script_lints();

    if let Err(e) = check_sources() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
