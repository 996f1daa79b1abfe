//! Fixture corpus runner.
//!
//! Each fixture is a subject-language file that declares, in comment
//! headers, which diagnostics evaluating it must raise:
//!
//! ```text
//! // recover-from-errors
//! // expected-error: code=PE1001 severity=RecoverableError
//! ```
//!
//! Expectations are ordered; the recorded diagnostics must match them
//! one-for-one, field by field. `// recover-from-errors` selects the
//! recovering handler, `// strict` turns on strict mode.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

use crate::diagnostics::{Diagnostic, Recovery, Severity};
use crate::parser::parse_source;
use crate::peval::Evaluator;

/// One expected diagnostic, parsed from a fixture header line.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedDiagnostic {
    pub code: String,
    pub severity: Severity,
}

/// Everything a fixture's headers declare about its run.
#[derive(Debug, Clone, Default)]
pub struct FixtureSpec {
    pub recover: bool,
    pub strict: bool,
    pub expected: Vec<ExpectedDiagnostic>,
}

/// Parse the comment headers of a fixture.
pub fn parse_fixture_headers(source: &str) -> Result<FixtureSpec, String> {
    let mut spec = FixtureSpec::default();
    for line in source.lines() {
        let Some(rest) = line.trim().strip_prefix("//") else {
            continue;
        };
        let rest = rest.trim();
        if rest == "recover-from-errors" {
            spec.recover = true;
        } else if rest == "strict" {
            spec.strict = true;
        } else if let Some(fields) = rest.strip_prefix("expected-error:") {
            spec.expected.push(parse_expected(fields.trim())?);
        }
    }
    Ok(spec)
}

fn parse_expected(fields: &str) -> Result<ExpectedDiagnostic, String> {
    let mut code = None;
    let mut severity = None;
    for field in fields.split_whitespace() {
        let (key, value) = field
            .split_once('=')
            .ok_or_else(|| format!("malformed expectation field: {}", field))?;
        match key {
            "code" => code = Some(value.to_string()),
            "severity" => severity = Some(value.parse::<Severity>()?),
            other => return Err(format!("unknown expectation field: {}", other)),
        }
    }
    Ok(ExpectedDiagnostic {
        code: code.ok_or("expectation is missing `code=`")?,
        severity: severity.ok_or("expectation is missing `severity=`")?,
    })
}

/// The result of running one fixture: empty `failures` means it passed.
#[derive(Debug)]
pub struct CaseOutcome {
    pub name: String,
    pub failures: Vec<String>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CorpusReport {
    pub outcomes: Vec<CaseOutcome>,
}

impl CorpusReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn summary(&self) -> String {
        format!("Passed: {}/{}", self.passed(), self.outcomes.len())
    }
}

/// Run one fixture source and compare its diagnostics to its headers.
pub fn run_fixture(name: &str, source: &str) -> CaseOutcome {
    let mut failures = Vec::new();

    let spec = match parse_fixture_headers(source) {
        Ok(spec) => spec,
        Err(msg) => {
            return CaseOutcome {
                name: name.to_string(),
                failures: vec![format!("bad fixture header: {}", msg)],
            }
        }
    };

    let program = match parse_source(source) {
        Ok(p) => p,
        Err(e) => {
            return CaseOutcome {
                name: name.to_string(),
                failures: vec![format!("parse error: {}", e)],
            }
        }
    };

    let mode = if spec.recover {
        Recovery::RecoverIfPossible
    } else {
        Recovery::Fail
    };
    let mut evaluator = Evaluator::with_recovery(mode);
    // Evaluation may abort; the diagnostics recorded up to that point are
    // still the thing under test.
    let _ = evaluator.evaluate_program(&program, spec.strict);
    let got: Vec<Diagnostic> = evaluator.diagnostics;

    if got.len() != spec.expected.len() {
        failures.push(format!(
            "expected {} diagnostics, found {}: [{}]",
            spec.expected.len(),
            got.len(),
            got.iter()
                .map(|d| d.code)
                .collect::<Vec<_>>()
                .join(", ")
        ));
    } else {
        for (i, (want, have)) in spec.expected.iter().zip(&got).enumerate() {
            if want.code != have.code {
                failures.push(format!(
                    "diagnostic {}: expected code {}, found {}",
                    i, want.code, have.code
                ));
            }
            if want.severity != have.severity {
                failures.push(format!(
                    "diagnostic {}: expected severity {}, found {}",
                    i, want.severity, have.severity
                ));
            }
        }
    }

    CaseOutcome {
        name: name.to_string(),
        failures,
    }
}

/// Run every fixture file under `dir`, recursively, in path order.
pub fn run_corpus(dir: &Path) -> io::Result<CorpusReport> {
    let mut files = Vec::new();
    collect_fixture_files(dir, &mut files)?;
    files.sort();

    let mut report = CorpusReport::default();
    for path in files {
        let source = fs::read_to_string(&path)?;
        let name = path
            .strip_prefix(dir)
            .unwrap_or(&path)
            .display()
            .to_string();
        info!("fixture: {}", name);
        report.outcomes.push(run_fixture(&name, &source));
    }
    Ok(report)
}

fn collect_fixture_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.ends_with('~') {
            continue;
        }
        if path.is_dir() {
            collect_fixture_files(&path, out)?;
        } else if path.extension().map_or(false, |e| e == "js") {
            out.push(path);
        }
    }
    Ok(())
}
