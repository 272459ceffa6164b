use std::{collections::HashMap, io::Write, ops::ControlFlow, rc::Rc};

use crate::{
    commands::Command,
    error::{ErrorKind, Failure, Location},
    flow::{cont, flow, raise, Flow, Signal},
    lexer::tokenize,
    line::{Line, LineMode},
    procs::{Mode, Procedure},
    scope::Frame,
    session::{Session, Tracing},
    token::TokenKind,
    value::Value,
};

impl Session {
    /// Tokenize and run one line of source. While a procedure is being
    /// defined the line is stored instead.
    pub fn run_line(&mut self, src: &str) -> Flow<()> {
        let line = tokenize(src)?;
        if line.is_empty() {
            return cont(());
        }
        match self.procs.mode {
            Mode::Command => {
                flow!(self.exec_line(&line, 0));
                cont(())
            }
            Mode::Defining | Mode::Ignoring => self.add_definition_line(line),
        }
    }

    /// Store a line in the procedure being defined. Only TO and END run;
    /// whatever precedes an END becomes the last line.
    pub(crate) fn add_definition_line(&mut self, line: Line) -> Flow<()> {
        let name = self.procs.defining_name().map(str::to_owned);
        let end = flow!(self.exec_line(&line, 0));
        match self.procs.mode {
            Mode::Defining => {
                if let Some(proc) = self.procs.defining.as_mut() {
                    proc.push_line(line)?;
                }
            }
            Mode::Command if end > 1 => {
                let body = Line::from_tokens(LineMode::Program, line.tokens[..end - 1].to_vec())?;
                if let Some(proc) = name.and_then(|n| self.procs.get_mut(&n)) {
                    proc.push_line(body)?;
                }
            }
            Mode::Command | Mode::Ignoring => {}
        }
        cont(())
    }

    /// Run `line` from token `from`. Returns the position execution stopped
    /// at. Jumps to labels on this line are handled here.
    pub(crate) fn exec_line(&mut self, line: &Line, from: usize) -> Flow<usize> {
        let _guard = self.nest()?;
        log::trace!("exec line {} from {from}: {line}", line.linenum);
        let mut pos = from;
        while let Some(tok) = line.tokens.get(pos) {
            if self.break_requested() {
                return raise(Signal::Break);
            }
            if self.procs.mode != Mode::Command {
                match tok.kind {
                    TokenKind::Cmd(cmd @ (Command::To | Command::End)) => {
                        return self
                            .run_command(cmd, line, pos)
                            .map_err(|e| e.fill_token(|| tok.blame()));
                    }
                    _ => {
                        pos += 1;
                        continue;
                    }
                }
            }
            let res = match tok.kind {
                TokenKind::Cmd(cmd) => {
                    self.trace(line, 'C', cmd.name())?;
                    self.run_command(cmd, line, pos)
                }
                _ => {
                    self.trace(line, 'C', "PR")?;
                    self.print_exprs(line, pos, true)
                }
            };
            match res {
                Ok(ControlFlow::Continue(next)) => pos = next,
                Ok(ControlFlow::Break(Signal::Goto(label))) => match line.label_index(&label) {
                    Some(at) => pos = at,
                    None => return raise(Signal::Goto(label)),
                },
                Ok(ControlFlow::Break(sig)) => return raise(sig),
                Err(e) => return Err(e.fill_token(|| tok.blame())),
            }
        }
        cont(pos)
    }

    /// Call the user procedure named at `pos`, evaluating one argument per
    /// parameter.
    pub(crate) fn call_user_proc(&mut self, line: &Line, pos: usize) -> Flow<(Value, usize)> {
        let name = &line.tokens[pos].text;
        let proc = self
            .procs
            .get(name)
            .cloned()
            .ok_or_else(|| ErrorKind::UndefinedUserProc.at(name))?;

        let mut vars = HashMap::new();
        let mut next = pos + 1;
        for param in &proc.params {
            if line.is_expr_end(next) {
                return Err(ErrorKind::MissingArg.at(&proc.name));
            }
            let (val, after) = flow!(self.eval_expr(line, next));
            self.scope.bind_param(&mut vars, param, val, &mut *self.out)?;
            next = after;
        }

        log::debug!("calling {} with {} arguments", proc.name, vars.len());
        self.scope.frames.push(Frame::new(Rc::clone(&proc), vars));
        let res = self.run_procedure(&proc);
        let linenum = self.scope.frame().map_or(0, |f| f.linenum);
        self.scope.frames.pop();

        match res {
            Ok(ControlFlow::Continue(())) => cont((Value::Undefined, next)),
            Ok(ControlFlow::Break(Signal::Return(val))) => cont((val.unwrap_or_default(), next)),
            Ok(ControlFlow::Break(sig)) => {
                self.stop_at.get_or_insert_with(|| Location {
                    proc: proc.name.clone(),
                    line: linenum,
                });
                raise(sig)
            }
            Err(e) => Err(e.within(&proc.name, linenum)),
        }
    }

    /// Run a procedure's lines in order. Jumps that no line caught are
    /// looked up across the whole procedure.
    fn run_procedure(&mut self, proc: &Procedure) -> Flow<()> {
        let mut index = 0;
        let mut from = 0;
        while let Some(line) = proc.lines.get(index).cloned() {
            if let Some(frame) = self.scope.frames.last_mut() {
                frame.linenum = line.linenum;
            }
            match self.exec_line(&line, from)? {
                ControlFlow::Continue(_) => {
                    index += 1;
                    from = 0;
                }
                ControlFlow::Break(Signal::Goto(label)) => {
                    let Some(target) = proc.label_line(&label) else {
                        return Err(ErrorKind::UndefinedLabel.at(label));
                    };
                    from = proc.lines[target].label_index(&label).unwrap_or(0);
                    index = target;
                }
                ControlFlow::Break(sig) => return raise(sig),
            }
        }
        cont(())
    }

    /// Print a trace line for a command or procedure call. When stepping,
    /// wait for a line of input first.
    pub(crate) fn trace(&mut self, line: &Line, kind: char, name: &str) -> Result<(), Failure> {
        if self.tracing == Tracing::Off {
            return Ok(());
        }
        let proc = self
            .scope
            .frame()
            .map_or_else(|| "-".to_owned(), |f| f.proc.name.clone());
        self.print(format_args!("[{proc},{},{kind},{name}]", line.linenum))?;
        if self.tracing == Tracing::Step {
            self.print(": ")?;
            self.out
                .flush()
                .map_err(|e| ErrorKind::WriteFail.bare().with_detail(&e))?;
            self.input
                .read_line("")
                .map_err(|e| ErrorKind::ReadFail.bare().with_detail(&e))?;
        }
        self.println("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, io::SharedBuffer};

    fn session() -> (Session, SharedBuffer) {
        let out = SharedBuffer::default();
        let s = Session::new(Config::default()).with_output(Box::new(out.clone()));
        (s, out)
    }

    fn run(s: &mut Session, lines: &[&str]) {
        for line in lines {
            s.execute(line);
        }
    }

    #[test]
    fn definitions_collect_lines() {
        let (mut s, out) = session();
        run(&mut s, &["TO sq :n", "OP :n * :n", "END", "pr sq 7"]);
        assert_eq!(out.take(), "Procedure \"sq\" defined.\n49\n");
        let proc = s.procs().get("sq").unwrap();
        assert_eq!(proc.lines.len(), 1);
        assert_eq!(proc.lines[0].linenum, 10);
    }

    #[test]
    fn inline_definitions() {
        let (mut s, out) = session();
        run(&mut s, &["to twice :x pr :x pr :x end", "twice \"hi\""]);
        assert_eq!(out.take(), "Procedure \"twice\" defined.\nhi\nhi\n");
        assert_eq!(s.mode(), Mode::Command);
    }

    #[test]
    fn text_before_end_is_kept() {
        let (mut s, out) = session();
        run(&mut s, &["TO f", "PR 1", "PR 2 END", "f"]);
        assert_eq!(out.take(), "Procedure \"f\" defined.\n1\n2\n");
        assert_eq!(s.procs().get("f").unwrap().lines.len(), 2);
    }

    #[test]
    fn jumps_between_lines() {
        let (mut s, out) = session();
        run(
            &mut s,
            &[
                "TO count :n",
                "MAKELOC \"i\" 0",
                "LABEL \"top\" INC :i PR :i",
                "IF :i < :n [GO \"top\"]",
                "END",
                "count 3",
            ],
        );
        assert_eq!(out.take(), "Procedure \"count\" defined.\n1\n2\n3\n");
    }

    #[test]
    fn failures_name_the_procedure_line() {
        let (mut s, out) = session();
        run(&mut s, &["TO bad", "PR 1", "PR 1 / 0", "END", "bad"]);
        assert_eq!(
            out.take(),
            "Procedure \"bad\" defined.\n1\nERROR 6: Divide by zero at \"/\" in procedure \"bad\" on line 20\n"
        );
        assert!(s.scope().frame().is_none());
    }

    #[test]
    fn tracing() {
        let (mut s, out) = session();
        run(&mut s, &["TO f", "PR 1", "END", "TRON"]);
        out.take();
        s.execute("f");
        assert_eq!(out.take(), "[-,0,C,PR]\n[-,0,U,f]\n[f,10,C,PR]\n1\n");
    }
}
