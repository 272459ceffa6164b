use std::path::Path;

use turtlelogo::{Config, Session, SharedBuffer};

/// Lines typed into a fresh session, and everything it should print.
struct Transcript {
    typed: String,
    console: String,
}

impl Transcript {
    fn replay(&self) {
        let out = SharedBuffer::default();
        let mut session = Session::new(Config::default()).with_output(Box::new(out.clone()));
        for line in self.typed.lines() {
            session.execute(line);
        }
        assert_eq!(out.contents(), self.console, "typed:\n{}", self.typed);
    }
}

/// A line made only of `ch`, at least two of them.
fn is_rule(line: &str, ch: char) -> bool {
    let line = line.trim();
    line.len() >= 2 && line.chars().all(|c| c == ch)
}

/// Transcripts are separated by `===` rules. Within one, a `---` rule
/// splits what is typed from what is printed.
fn transcripts(path: impl AsRef<Path>) -> Vec<Transcript> {
    let text = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    lines
        .split(|line| is_rule(line, '='))
        .filter_map(|block| {
            let rule = block.iter().position(|line| is_rule(line, '-'))?;
            Some(Transcript {
                typed: block[..rule].concat(),
                console: block[rule + 1..].concat(),
            })
        })
        .collect()
}

fn replay_all(path: &str) {
    let all = transcripts(path);
    assert!(!all.is_empty(), "no transcripts in {path}");
    for transcript in all {
        transcript.replay();
    }
}

#[test]
fn basic() {
    replay_all("tests/basic.txt");
}

#[test]
fn procedures() {
    replay_all("tests/procedures.txt");
}

#[test]
fn failures() {
    replay_all("tests/failures.txt");
}
