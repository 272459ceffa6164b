use std::{collections::BTreeMap, fmt::Write as _, rc::Rc};

use crate::{
    commands::Command,
    error::{ErrorKind, Failure},
    line::{Line, LineMode},
    token::Token,
};

const LINENUM_STEP: u32 = 10;

/// What the interpreter does with the lines it is given.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Mode {
    #[default]
    Command,
    /// Lines are stored in the procedure being defined.
    Defining,
    /// A load filter skips this procedure: lines are dropped until END.
    Ignoring,
}

/// A user procedure: parameters and numbered lines.
#[derive(Clone, Debug)]
pub struct Procedure {
    pub name: String,
    /// Parameter names without the `:`.
    pub params: Vec<String>,
    pub lines: Vec<Rc<Line>>,
    next_linenum: u32,
}

impl Procedure {
    pub fn new(name: String, params: Vec<String>) -> Procedure {
        Procedure {
            name,
            params,
            lines: Vec::new(),
            next_linenum: LINENUM_STEP,
        }
    }

    fn check_labels(&self, line: &Line, replacing: Option<u32>) -> Result<(), Failure> {
        for label in line.labels() {
            let clash = self
                .lines
                .iter()
                .filter(|l| Some(l.linenum) != replacing)
                .any(|l| l.has_label(label));
            if clash {
                let blame = if label.is_empty() { "DLABEL" } else { label };
                return Err(ErrorKind::DupDeclaration.at(blame));
            }
        }
        Ok(())
    }

    /// Append a line with the next free number.
    pub fn push_line(&mut self, mut line: Line) -> Result<(), Failure> {
        self.check_labels(&line, None)?;
        line.mode = LineMode::Program;
        let next = self
            .next_linenum
            .checked_add(LINENUM_STEP)
            .ok_or_else(|| ErrorKind::ValueOutOfRange.bare())?;
        line.linenum = self.next_linenum;
        self.next_linenum = next;
        self.lines.push(Rc::new(line));
        Ok(())
    }

    /// Replace, insert or (with no tokens) delete the line numbered
    /// `linenum`.
    pub fn edit_line(&mut self, linenum: u32, tokens: Vec<Token>) -> Result<(), Failure> {
        let next = linenum
            .checked_add(LINENUM_STEP)
            .ok_or_else(|| ErrorKind::ValueOutOfRange.at(linenum.to_string()))?;
        let new_line = if tokens.is_empty() {
            None
        } else {
            let mut line = Line::from_tokens(LineMode::Program, tokens)?;
            self.check_labels(&line, Some(linenum))?;
            line.linenum = linenum;
            Some(Rc::new(line))
        };

        let at = self.lines.iter().position(|l| l.linenum >= linenum);
        match (at, new_line) {
            (Some(i), Some(line)) if self.lines[i].linenum == linenum => self.lines[i] = line,
            (Some(i), None) if self.lines[i].linenum == linenum => {
                self.lines.remove(i);
            }
            (Some(i), Some(line)) => self.lines.insert(i, line),
            (None, Some(line)) => {
                self.next_linenum = next;
                self.lines.push(line);
            }
            (_, None) => {}
        }
        Ok(())
    }

    pub fn renumber(&mut self) {
        let mut linenum = LINENUM_STEP;
        for line in &mut self.lines {
            Rc::make_mut(line).linenum = linenum;
            linenum += LINENUM_STEP;
        }
        self.next_linenum = linenum;
    }

    /// Index of the line that owns `label`, exact names before the default
    /// label.
    pub fn label_line(&self, label: &str) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| l.has_label(label))
            .or_else(|| self.lines.iter().position(|l| l.has_label("")))
    }

    /// Source text. Without `full` only the header line, minus its newline.
    pub fn dump(&self, full: bool, linenums: bool, indent_labels: bool) -> String {
        let mut out = format!("TO {} ", self.name);
        for param in &self.params {
            let _ = write!(out, ":{param} ");
        }
        if !full {
            return out;
        }
        out.push('\n');
        let mut indent = 0;
        for line in &self.lines {
            if linenums && line.linenum != 0 {
                let _ = write!(out, "{:<3}\t", line.linenum);
            } else {
                out.push('\t');
            }
            if indent_labels {
                indent += line.indent_count(Command::Go);
                for _ in 0..indent {
                    out.push('\t');
                }
                indent += line.indent_count(Command::Label);
                indent += line.indent_count(Command::DLabel);
            }
            let _ = writeln!(out, "{line}");
        }
        out.push_str("END\n");
        out
    }
}

/// Every defined procedure, plus the state of a definition in progress.
#[derive(Debug, Default)]
pub struct ProcStore {
    procs: BTreeMap<String, Rc<Procedure>>,
    pub mode: Mode,
    pub(crate) defining: Option<Procedure>,
    /// While loading, only the procedure with this name is kept.
    pub(crate) load_filter: Option<String>,
}

impl ProcStore {
    pub fn get(&self, name: &str) -> Option<&Rc<Procedure>> {
        self.procs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.procs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// In name order.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<Procedure>> {
        self.procs.values()
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Procedure> {
        self.procs.get_mut(name).map(Rc::make_mut)
    }

    pub fn remove(&mut self, name: &str) -> Option<Rc<Procedure>> {
        self.procs.remove(name)
    }

    pub fn clear(&mut self) {
        self.procs.clear();
    }

    pub fn defining_name(&self) -> Option<&str> {
        self.defining.as_ref().map(|p| p.name.as_str())
    }

    /// Start a definition, or skip it when a load filter names another
    /// procedure.
    pub fn begin(&mut self, proc: Procedure) -> Result<(), Failure> {
        if self.load_filter.as_deref().map_or(false, |f| f != proc.name) {
            self.mode = Mode::Ignoring;
            return Ok(());
        }
        if self.procs.contains_key(&proc.name) {
            return Err(ErrorKind::DupDeclaration.at(&proc.name));
        }
        log::debug!("defining procedure {}", proc.name);
        self.defining = Some(proc);
        self.mode = Mode::Defining;
        Ok(())
    }

    /// Store the definition in progress. Returns its name, or None when the
    /// definition was being ignored.
    pub fn commit(&mut self) -> Option<String> {
        self.mode = Mode::Command;
        let proc = self.defining.take()?;
        let name = proc.name.clone();
        log::debug!("defined procedure {name} with {} lines", proc.lines.len());
        self.procs.insert(name.clone(), Rc::new(proc));
        Some(name)
    }

    /// Drop the definition in progress.
    pub fn abandon(&mut self) -> Option<Procedure> {
        self.mode = Mode::Command;
        self.defining.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn proc_with(lines: &[&str]) -> Procedure {
        let mut p = Procedure::new("sq".into(), vec!["n".into()]);
        for src in lines {
            p.push_line(tokenize(src).unwrap()).unwrap();
        }
        p
    }

    fn numbers(p: &Procedure) -> Vec<u32> {
        p.lines.iter().map(|l| l.linenum).collect()
    }

    fn tokens(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().tokens
    }

    #[test]
    fn editing_lines() {
        let mut p = proc_with(&["PR 1", "PR 2", "PR 3"]);
        assert_eq!(numbers(&p), [10, 20, 30]);

        p.edit_line(15, tokens("PR 15")).unwrap();
        assert_eq!(numbers(&p), [10, 15, 20, 30]);
        p.edit_line(20, tokens("PR 200")).unwrap();
        assert_eq!(p.lines[2].to_string(), "PR 200");
        p.edit_line(10, vec![]).unwrap();
        assert_eq!(numbers(&p), [15, 20, 30]);
        p.edit_line(99, vec![]).unwrap();
        assert_eq!(numbers(&p), [15, 20, 30]);

        p.edit_line(45, tokens("PR 45")).unwrap();
        p.push_line(tokenize("PR 55").unwrap()).unwrap();
        assert_eq!(numbers(&p), [15, 20, 30, 45, 55]);

        p.renumber();
        assert_eq!(numbers(&p), [10, 20, 30, 40, 50]);
    }

    #[test]
    fn line_numbers_stay_in_range() {
        let mut p = proc_with(&["PR 1"]);
        let err = p.edit_line(u32::MAX, tokens("PR 2")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueOutOfRange);
        assert_eq!(numbers(&p), [10]);

        p.edit_line(u32::MAX - LINENUM_STEP, tokens("PR 2")).unwrap();
        let err = p.push_line(tokenize("PR 3").unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueOutOfRange);
        assert_eq!(numbers(&p), [10, u32::MAX - LINENUM_STEP]);
    }

    #[test]
    fn labels_are_unique_across_lines() {
        let mut p = proc_with(&["LABEL \"a\" PR 1"]);
        let err = p.push_line(tokenize("LABEL \"a\"").unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DupDeclaration);
        // Replacing the line that owns the label is fine.
        p.edit_line(10, tokens("LABEL \"a\" PR 2")).unwrap();
        p.push_line(tokenize("DLABEL").unwrap()).unwrap();
        assert_eq!(p.label_line("a"), Some(0));
        assert_eq!(p.label_line("nowhere"), Some(1));
    }

    #[test]
    fn dump_layout() {
        let p = proc_with(&["LABEL \"top\"", "FD :n", "GO \"top\""]);
        assert_eq!(p.dump(false, false, false), "TO sq :n ");
        assert_eq!(
            p.dump(true, true, true),
            "TO sq :n \n10 \tLABEL \"top\"\n20 \t\tFD :n\n30 \tGO \"top\"\nEND\n"
        );
        assert_eq!(
            p.dump(true, false, false),
            "TO sq :n \n\tLABEL \"top\"\n\tFD :n\n\tGO \"top\"\nEND\n"
        );
    }

    #[test]
    fn load_filter_ignores_other_procedures() {
        let mut store = ProcStore {
            load_filter: Some("keep".into()),
            ..ProcStore::default()
        };
        store.begin(Procedure::new("skip".into(), vec![])).unwrap();
        assert_eq!(store.mode, Mode::Ignoring);
        assert_eq!(store.commit(), None);

        store.begin(Procedure::new("keep".into(), vec![])).unwrap();
        assert_eq!(store.mode, Mode::Defining);
        assert_eq!(store.commit().as_deref(), Some("keep"));
        assert!(store.contains("keep"));

        let err = store.begin(Procedure::new("keep".into(), vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DupDeclaration);
    }
}
