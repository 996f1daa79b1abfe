//! Schist CLI: reduce a file, or run a fixture corpus.

use std::env;
use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;

use schist::errors::{render_diagnostic, Colors};
use schist::{parse_source, print_program, Evaluator, Recovery, SourceMap};

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--corpus") => match args.get(2) {
            Some(dir) => run_corpus(dir),
            None => usage(),
        },
        Some(path) => run_file(path),
        None => usage(),
    }
}

fn usage() -> ExitCode {
    eprintln!("usage: schist <file.js> | schist --corpus <dir>");
    ExitCode::FAILURE
}

fn run_file(path: &str) -> ExitCode {
    let colors = Colors::new(std::io::stderr().is_terminal());
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error reading {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    let source_map = SourceMap::new(&source);

    let program = match parse_source(&source) {
        Ok(p) => p,
        Err(e) => {
            let pos = source_map.position(e.span().start);
            eprintln!("{}:{}: {}", path, pos, e);
            return ExitCode::FAILURE;
        }
    };

    let mut evaluator = Evaluator::with_recovery(Recovery::RecoverIfPossible);
    let result = evaluator.evaluate_program(&program, false);

    for diagnostic in &evaluator.diagnostics {
        eprint!(
            "{}",
            render_diagnostic(diagnostic, &source_map, Some(path), &colors)
        );
    }

    match result {
        Ok(reduced) => {
            print!("{}", print_program(&reduced.body));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_corpus(dir: &str) -> ExitCode {
    let report = match schist::driver::run_corpus(Path::new(dir)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error reading corpus {}: {}", dir, e);
            return ExitCode::FAILURE;
        }
    };

    for outcome in &report.outcomes {
        if outcome.passed() {
            println!("ok   {}", outcome.name);
        } else {
            println!("FAIL {}", outcome.name);
            for failure in &outcome.failures {
                println!("     {}", failure);
            }
        }
    }
    println!("{}", report.summary());

    if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
