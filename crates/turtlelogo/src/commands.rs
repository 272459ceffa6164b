use std::{
    fmt::Write as _,
    io::Write as _,
    ops::ControlFlow,
    path::PathBuf,
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

use kurbo::Point;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    error::{ErrorKind, Failure},
    flow::{cont, flow, raise, Flow, Signal},
    lexer::is_number,
    line::{Line, LineMode},
    path::{has_wildcards, wild_match, EntryKind},
    procs::{Mode, Procedure},
    session::{Session, Tracing, DEGS_PER_RADIAN},
    sysprocs::SysProc,
    token::{Token, TokenKind},
    turtle::{Edge, LineStyle, WIN_DEFAULT_COLOUR},
    value::Value,
};

/// Declares a closed set of named built-ins with a table of all of them
/// and a case-insensitive lookup.
macro_rules! name_table {
    ($(#[$meta:meta])* $vis:vis enum $ty:ident { $($variant:ident => $name:literal,)* }) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        $vis enum $ty {
            $($variant,)*
        }

        impl $ty {
            /// Every entry, in table order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)*
                }
            }

            pub fn lookup(word: &str) -> Option<$ty> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|entry| entry.name().eq_ignore_ascii_case(word))
            }
        }
    };
}

pub(crate) use name_table;

name_table! {
    /// Statements. They produce no value and end any expression before them.
    pub enum Command {
        Comment => ";",
        Rem => "REM",
        Ed => "ED",
        To => "TO",
        End => "END",
        Restart => "RESTART",
        Er => "ER",
        Erv => "ERV",
        Erp => "ERP",
        Erall => "ERALL",
        Po => "PO",
        Pol => "POL",
        Pops => "POPS",
        Popsl => "POPSL",
        Pots => "POTS",
        Pons => "PONS",
        Posf => "POSF",
        Poall => "POALL",
        Renum => "RENUM",
        Pr => "PR",
        Wr => "WR",
        Eat => "EAT",
        Make => "MAKE",
        MakeLoc => "MAKELOC",
        Inc => "INC",
        Dec => "DEC",
        Run => "RUN",
        Stop => "STOP",
        Wait => "WAIT",
        Bye => "BYE",
        Repeat => "REPEAT",
        If => "IF",
        Label => "LABEL",
        DLabel => "DLABEL",
        Go => "GO",
        Op => "OP",
        Home => "HOME",
        Clear => "CLEAR",
        Ht => "HT",
        St => "ST",
        Hw => "HW",
        Sw => "SW",
        Cs => "CS",
        Pu => "PU",
        Pd => "PD",
        Tg => "TG",
        Fd => "FD",
        Bk => "BK",
        Lt => "LT",
        Rt => "RT",
        SetPc => "SETPC",
        SetBg => "SETBG",
        SetX => "SETX",
        SetY => "SETY",
        SetH => "SETH",
        SetSz => "SETSZ",
        SetLw => "SETLW",
        SetLs => "SETLS",
        SetPos => "SETPOS",
        Towards => "TOWARDS",
        Dot => "DOT",
        Window => "WINDOW",
        Fence => "FENCE",
        Wrap => "WRAP",
        SetInd => "SETIND",
        SetFill => "SETFILL",
        SetWinSz => "SETWINSZ",
        Fill => "FILL",
        Save => "SAVE",
        Load => "LOAD",
        Cd => "CD",
        Help => "HELP",
        SHelp => "SHELP",
        Hist => "HIST",
        CHist => "CHIST",
        Tron => "TRON",
        Trons => "TRONS",
        Troff => "TROFF",
        Watch => "WATCH",
        Unwatch => "UNWATCH",
        Seed => "SEED",
        Deg => "DEG",
        Rad => "RAD",
        Ct => "CT",
    }
}

/// Characters a variable name may not contain.
const NAME_EXCLUDES: &str = ":;[]()=<>+-*/%^";

/// The token at `pos` as written, for blaming an argument.
pub(crate) fn arg_text(line: &Line, pos: usize) -> String {
    line.tokens.get(pos).map(Token::to_string).unwrap_or_default()
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Names laid out seven to a row.
fn columns<'a>(names: impl Iterator<Item = &'a str>, sorted: bool) -> String {
    let mut names: Vec<&str> = names.collect();
    if sorted {
        names.sort_unstable();
    }
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        let _ = write!(out, "   {name:<8}");
        if (i + 1) % 7 == 0 {
            out.push('\n');
        }
    }
    if names.len() % 7 != 0 {
        out.push('\n');
    }
    out
}

fn check_var_name(name: &str) -> Result<(), Failure> {
    if name.starts_with('$') {
        return Err(ErrorKind::ReadOnlyVar.at(name));
    }
    if name.is_empty()
        || is_number(name)
        || name.chars().any(|c| (c as u32) < 33 || NAME_EXCLUDES.contains(c))
    {
        return Err(ErrorKind::InvalidVarName.at(name));
    }
    Ok(())
}

impl Session {
    /// The expression at `pos`, which must exist.
    pub(crate) fn arg(&mut self, line: &Line, pos: usize) -> Flow<(Value, usize)> {
        if line.is_expr_end(pos) {
            return Err(ErrorKind::MissingArg.bare());
        }
        self.eval_expr(line, pos)
    }

    pub(crate) fn num_arg(&mut self, line: &Line, pos: usize) -> Flow<(f64, usize)> {
        match flow!(self.arg(line, pos)) {
            (Value::Num(n), next) => cont((n, next)),
            _ => Err(ErrorKind::InvalidArg.at(arg_text(line, pos))),
        }
    }

    pub(crate) fn str_arg(&mut self, line: &Line, pos: usize) -> Flow<(String, usize)> {
        match flow!(self.arg(line, pos)) {
            (Value::Str(s), next) => cont((s, next)),
            _ => Err(ErrorKind::InvalidArg.at(arg_text(line, pos))),
        }
    }

    /// A string argument that must not be empty.
    fn word_arg(&mut self, line: &Line, pos: usize) -> Flow<(String, usize)> {
        match flow!(self.arg(line, pos)) {
            (Value::Str(s), next) if !s.is_empty() => cont((s, next)),
            _ => Err(ErrorKind::InvalidArg.at(arg_text(line, pos))),
        }
    }

    /// Run the command at `pos`. Returns the position after everything the
    /// command consumed.
    pub(crate) fn run_command(&mut self, cmd: Command, line: &Line, pos: usize) -> Flow<usize> {
        match cmd {
            Command::Comment | Command::Rem => cont(line.len()),
            Command::Ed => self.edit(line, pos),
            Command::To => self.define(line, pos),
            Command::End => self.end_definition(line, pos),
            Command::Restart => raise(Signal::Restart),
            Command::Er => self.erase(line, pos),
            Command::Erv | Command::Erp | Command::Erall => {
                self.erase_all(cmd)?;
                cont(pos + 1)
            }
            Command::Po | Command::Pol | Command::Renum => self.list_procs(cmd, line, pos),
            Command::Pops | Command::Popsl | Command::Pots => {
                self.print_procs(cmd != Command::Pots, cmd == Command::Popsl)?;
                cont(pos + 1)
            }
            Command::Pons => {
                self.print_globals()?;
                cont(pos + 1)
            }
            Command::Posf => {
                self.print_flags()?;
                cont(pos + 1)
            }
            Command::Poall => {
                self.print_procs(true, false)?;
                self.print_globals()?;
                self.println("")?;
                self.print_flags()?;
                cont(pos + 1)
            }
            Command::Pr | Command::Wr => {
                let newline = cmd == Command::Pr;
                if line.is_expr_end(pos + 1) {
                    if newline {
                        self.println("")?;
                    }
                    return cont(pos + 1);
                }
                self.print_exprs(line, pos + 1, newline)
            }
            Command::Eat => {
                let (_, next) = flow!(self.arg(line, pos + 1));
                cont(next)
            }
            Command::Make | Command::MakeLoc => self.make(cmd, line, pos),
            Command::Inc | Command::Dec => self.step_var(cmd, line, pos),
            Command::Run => self.run(line, pos),
            Command::Stop => raise(Signal::Stop),
            Command::Wait => self.wait(line, pos),
            Command::Bye => raise(Signal::Bye),
            Command::Repeat => self.repeat(line, pos),
            Command::If => self.branch(line, pos),
            Command::Label => cont(pos + 2),
            Command::DLabel => cont(pos + 1),
            Command::Go => {
                if line.is_expr_end(pos + 1) {
                    return raise(Signal::Goto(String::new()));
                }
                match flow!(self.eval_expr(line, pos + 1)) {
                    (Value::Str(label), _) => raise(Signal::Goto(label)),
                    _ => Err(ErrorKind::InvalidArg.at(arg_text(line, pos + 1))),
                }
            }
            Command::Op => {
                if !self.scope.in_proc() {
                    return Err(ErrorKind::NotInUserProc.bare());
                }
                if line.is_expr_end(pos + 1) {
                    return raise(Signal::Return(None));
                }
                let (val, _) = flow!(self.eval_expr(line, pos + 1));
                raise(Signal::Return(Some(val)))
            }
            Command::Tg => {
                self.graphics = !self.graphics;
                log::debug!("graphics {}", on_off(self.graphics));
                cont(pos + 1)
            }
            Command::Home
            | Command::Clear
            | Command::Ht
            | Command::St
            | Command::Hw
            | Command::Sw
            | Command::Cs
            | Command::Pu
            | Command::Pd
            | Command::Window
            | Command::Fence
            | Command::Wrap
            | Command::SetFill
            | Command::Fill => {
                self.turtle_command(cmd)?;
                cont(pos + 1)
            }
            Command::Fd
            | Command::Bk
            | Command::Lt
            | Command::Rt
            | Command::SetPc
            | Command::SetBg
            | Command::SetX
            | Command::SetY
            | Command::SetH
            | Command::SetSz
            | Command::SetLw
            | Command::SetLs => self.turtle_command_1(cmd, line, pos),
            Command::SetPos | Command::Towards | Command::Dot | Command::SetWinSz => {
                self.turtle_command_2(cmd, line, pos)
            }
            Command::SetInd => {
                self.indent_labels = !self.indent_labels;
                self.println(format_args!(
                    "User procedure label block indenting {}.",
                    on_off(self.indent_labels)
                ))?;
                cont(pos + 1)
            }
            Command::Save => self.save(line, pos),
            Command::Load => self.load(line, pos),
            Command::Cd => {
                let (dir, next) = flow!(self.word_arg(line, pos + 1));
                let target = if has_wildcards(&dir) {
                    self.paths
                        .match_path(&dir, EntryKind::Dir)
                        .map_err(|k| k.at(&dir))?
                } else {
                    PathBuf::from(&dir)
                };
                std::env::set_current_dir(&target)
                    .map_err(|e| ErrorKind::CdFail.at(&dir).with_detail(&e))?;
                log::debug!("changed directory to {}", target.display());
                cont(next)
            }
            Command::Help | Command::SHelp => self.help(cmd == Command::SHelp, line, pos),
            Command::Hist => self.show_history(line, pos),
            Command::CHist => {
                self.history.clear();
                self.println("History buffer cleared.")?;
                cont(pos + 1)
            }
            Command::Tron | Command::Trons | Command::Troff => {
                let (tracing, msg) = match cmd {
                    Command::Tron => (Tracing::On, "Tracing on."),
                    Command::Trons => (Tracing::Step, "Tracing on with stepping."),
                    _ => (Tracing::Off, "Tracing off."),
                };
                self.tracing = tracing;
                self.println(msg)?;
                cont(pos + 1)
            }
            Command::Watch => self.watch(line, pos),
            Command::Unwatch => self.unwatch(line, pos),
            Command::Seed => {
                let (seed, next) = flow!(self.num_arg(line, pos + 1));
                if seed < 0.0 {
                    return Err(ErrorKind::InvalidArg.at(arg_text(line, pos + 1)));
                }
                self.rng = StdRng::seed_from_u64(seed as u64);
                cont(next)
            }
            Command::Deg | Command::Rad => {
                self.angle_in_degs = cmd == Command::Deg;
                self.scope.set_system("$angle_mode", cmd.name());
                cont(pos + 1)
            }
            Command::Ct => {
                self.print("\x1b[2J\x1b[H")?;
                self.out
                    .flush()
                    .map_err(|e| ErrorKind::WriteFail.bare().with_detail(&e))?;
                cont(pos + 1)
            }
        }
    }

    /// Print expressions until the next command. Undefined values print
    /// nothing.
    pub(crate) fn print_exprs(&mut self, line: &Line, first: usize, newline: bool) -> Flow<usize> {
        let mut pos = first;
        loop {
            let (val, next) = flow!(self.eval_expr(line, pos));
            let defined = !matches!(val, Value::Undefined);
            if defined {
                self.print(val.dump(false))?;
            }
            pos = next;
            if line.is_expr_end(pos) {
                if newline && defined {
                    self.println("")?;
                }
                return cont(pos);
            }
        }
    }

    /// `TO name :p ...` with an optional body on the same line.
    fn define(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        if self.procs.mode != Mode::Command {
            return Err(ErrorKind::UnexpectedTo.bare());
        }
        let Some(name) = line.tokens.get(pos + 1) else {
            return Err(ErrorKind::MissingArg.bare());
        };
        if !matches!(name.kind, TokenKind::UserProc) {
            return Err(ErrorKind::InvalidArg.at(name.blame()));
        }

        let mut params: Vec<String> = Vec::new();
        let mut next = pos + 2;
        while let Some(tok) = line.tokens.get(next) {
            if !matches!(tok.kind, TokenKind::Var) {
                break;
            }
            let param = tok.var_name();
            if param.starts_with('$') {
                return Err(ErrorKind::ReadOnlyVar.at(&tok.text));
            }
            if params.iter().any(|p| p == param) {
                return Err(ErrorKind::DupDeclaration.at(&tok.text));
            }
            params.push(param.to_owned());
            next += 1;
        }
        self.procs.begin(Procedure::new(name.text.clone(), params))?;

        if next < line.len() {
            let res = match Line::from_tokens(LineMode::Program, line.tokens[next..].to_vec()) {
                Ok(body) => self.add_definition_line(body),
                Err(e) => Err(e),
            };
            if !matches!(res, Ok(ControlFlow::Continue(()))) {
                self.procs.abandon();
            }
            flow!(res);
        }
        cont(line.len())
    }

    fn end_definition(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        if self.procs.mode == Mode::Command {
            return Err(ErrorKind::UnexpectedEnd.bare());
        }
        if let Some(tok) = line.tokens.get(pos + 1) {
            return Err(ErrorKind::UnexpectedArg.at(tok.blame()));
        }
        if let Some(name) = self.procs.commit() {
            self.println(format_args!("Procedure \"{name}\" defined."))?;
        }
        cont(pos + 1)
    }

    /// `ED name linenum tokens...` replaces, inserts or, with no tokens,
    /// deletes a line.
    fn edit(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        if self.scope.in_proc() {
            return Err(ErrorKind::UnexpectedEd.bare());
        }
        if line.len() - pos < 3 {
            return Err(ErrorKind::MissingArg.bare());
        }
        let name = &line.tokens[pos + 1];
        if !matches!(name.kind, TokenKind::UserProc) {
            return Err(ErrorKind::InvalidArg.at(name.blame()));
        }
        let num = &line.tokens[pos + 2];
        let linenum = match num.kind {
            TokenKind::Num(n) if n >= 1.0 && !num.neg => n,
            _ => return Err(ErrorKind::InvalidArg.at(num.blame())),
        };
        if linenum > u32::MAX as f64 {
            return Err(ErrorKind::ValueOutOfRange.at(num.blame()));
        }
        let proc = self
            .procs
            .get_mut(&name.text)
            .ok_or_else(|| ErrorKind::UndefinedUserProc.at(&name.text))?;
        proc.edit_line(linenum as u32, line.tokens[pos + 3..].to_vec())?;
        cont(line.len())
    }

    fn erase(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        if pos + 1 >= line.len() {
            return Err(ErrorKind::MissingArg.bare());
        }
        for (i, tok) in line.tokens.iter().enumerate().skip(pos + 1) {
            match tok.kind {
                TokenKind::Var => {
                    let name = tok.var_name();
                    self.scope
                        .erase_global(name)
                        .ok_or_else(|| ErrorKind::UndefinedVar.at(name))?;
                    self.println(format_args!("Global variable \"{name}\" erased."))?;
                }
                TokenKind::UserProc => {
                    self.procs
                        .remove(&tok.text)
                        .ok_or_else(|| ErrorKind::UndefinedUserProc.at(&tok.text))?;
                    self.println(format_args!("User procedure \"{}\" erased.", tok.text))?;
                }
                _ if i == pos + 1 => {
                    return Err(ErrorKind::InvalidArg.at(tok.to_string()));
                }
                _ => {}
            }
        }
        cont(line.len())
    }

    fn erase_all(&mut self, cmd: Command) -> Result<(), Failure> {
        if cmd != Command::Erv && self.scope.in_proc() {
            return Err(ErrorKind::UnexpectedErase.bare());
        }
        if cmd != Command::Erp {
            if cmd == Command::Erall {
                self.angle_in_degs = true;
            }
            self.scope.clear_globals();
            self.set_system_vars();
            self.println("Global variables deleted and system variables reset.")?;
        }
        if cmd != Command::Erv && !self.procs.is_empty() {
            self.procs.clear();
            self.println("User procedures deleted.")?;
        }
        if cmd == Command::Erall && !self.scope.watch.is_empty() {
            self.scope.watch.clear();
            self.println("Watch variables list cleared.")?;
        }
        self.println("READY")
    }

    /// PO, POL and RENUM take a list of procedure names.
    fn list_procs(&mut self, cmd: Command, line: &Line, pos: usize) -> Flow<usize> {
        if pos + 1 >= line.len() {
            return Err(ErrorKind::MissingArg.bare());
        }
        let mut next = pos + 1;
        while let Some(tok) = line.tokens.get(next) {
            if !matches!(tok.kind, TokenKind::UserProc) {
                if next == pos + 1 {
                    return Err(ErrorKind::InvalidArg.at(tok.to_string()));
                }
                break;
            }
            let undefined = || ErrorKind::UndefinedUserProc.at(&tok.text);
            match cmd {
                Command::Renum => {
                    self.procs.get_mut(&tok.text).ok_or_else(undefined)?.renumber();
                    self.println(format_args!("User procedure \"{}\" renumbered.", tok.text))?;
                }
                _ => {
                    let text = self.procs.get(&tok.text).ok_or_else(undefined)?.dump(
                        true,
                        cmd == Command::Pol,
                        self.indent_labels,
                    );
                    self.print(text)?;
                }
            }
            next += 1;
        }
        cont(next)
    }

    fn print_procs(&mut self, full: bool, linenums: bool) -> Result<(), Failure> {
        if self.procs.is_empty() {
            return self.println("No user procedures defined.");
        }
        let mut text = String::from("User procedures\n---------------\n");
        for proc in self.procs.iter() {
            text += &proc.dump(full, linenums, self.indent_labels);
            text.push('\n');
        }
        self.print(text)
    }

    /// System variables first, then the user's.
    fn print_globals(&mut self) -> Result<(), Failure> {
        let mut text = String::from("Global variables\n----------------\n");
        let (system, user): (Vec<_>, Vec<_>) =
            self.scope.globals().partition(|(name, _)| name.starts_with('$'));
        for (name, val) in system.into_iter().chain(user) {
            let _ = writeln!(text, "{name} is {}", val.dump(true));
        }
        self.print(text)
    }

    fn print_flags(&mut self) -> Result<(), Failure> {
        let filling = self.graphics && self.turtle.facts().filling;
        self.print(format_args!(
            "System flags\n------------\nIndentation is {}.\nFill is {}.\n",
            on_off(self.indent_labels),
            on_off(filling)
        ))
    }

    fn make(&mut self, cmd: Command, line: &Line, pos: usize) -> Flow<usize> {
        let first = pos + 1;
        if line.len().saturating_sub(first) < 2 {
            return Err(ErrorKind::MissingArg.bare());
        }
        if cmd == Command::MakeLoc && !self.scope.in_proc() {
            return Err(ErrorKind::NotInUserProc.bare());
        }
        let (name, next) = flow!(self.str_arg(line, first));
        check_var_name(&name)?;
        let (val, end) = flow!(self.arg(line, next));
        if matches!(val, Value::Undefined) {
            return Err(ErrorKind::InvalidArg.at(arg_text(line, next)));
        }
        if cmd == Command::Make {
            self.scope.set_global(&name, val, &mut *self.out)?;
        } else {
            self.scope.set_local(&name, val, &mut *self.out)?;
        }
        cont(end)
    }

    /// INC and DEC on a global, or failing that a local, number.
    fn step_var(&mut self, cmd: Command, line: &Line, pos: usize) -> Flow<usize> {
        let Some(tok) = line.tokens.get(pos + 1) else {
            return Err(ErrorKind::MissingArg.bare());
        };
        if !matches!(tok.kind, TokenKind::Var) {
            return Err(ErrorKind::InvalidArg.at(tok.to_string()));
        }
        let name = tok.var_name();
        let step = if cmd == Command::Inc { 1.0 } else { -1.0 };
        let global = self.scope.global(name).is_some();
        let current = if global {
            self.scope.global(name)
        } else {
            self.scope.local(name)
        };
        let n = match current {
            Some(Value::Num(n)) => *n,
            Some(_) => return Err(ErrorKind::InvalidVarType.at(name)),
            None => return Err(ErrorKind::UndefinedVar.at(name)),
        };
        if global {
            self.scope.set_global(name, Value::Num(n + step), &mut *self.out)?;
        } else {
            self.scope.set_local(name, Value::Num(n + step), &mut *self.out)?;
        }
        cont(pos + 2)
    }

    /// Run every list or string that follows.
    fn run(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let mut next = pos + 1;
        if line.is_expr_end(next) {
            return Err(ErrorKind::MissingArg.bare());
        }
        loop {
            let (val, after) = flow!(self.eval_expr(line, next));
            match val {
                Value::List(list) => {
                    flow!(self.exec_line(&list, 0));
                }
                Value::Str(src) => flow!(self.run_line(&src)),
                _ => return Err(ErrorKind::CantRun.at(arg_text(line, next))),
            }
            next = after;
            if line.is_expr_end(next) {
                return cont(next);
            }
        }
    }

    /// Sleep, waking up regularly to check for an interrupt.
    fn wait(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let (secs, next) = flow!(self.num_arg(line, pos + 1));
        let deadline = Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|d| Instant::now().checked_add(d))
            .ok_or_else(|| ErrorKind::InvalidArg.at(arg_text(line, pos + 1)))?;
        loop {
            if self.break_requested() {
                return raise(Signal::Break);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return cont(next);
            }
            thread::sleep(left.min(Duration::from_millis(50)));
        }
    }

    fn repeat(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let first = pos + 1;
        if line.len().saturating_sub(first) < 2 {
            return Err(ErrorKind::MissingArg.bare());
        }
        let (count, next) = flow!(self.eval_expr(line, first));
        if next >= line.len() {
            return Err(ErrorKind::MissingArg.bare());
        }
        let count = match count {
            Value::Num(n) if n >= 0.0 => n as u64,
            _ => return Err(ErrorKind::InvalidArg.at(arg_text(line, first))),
        };
        let (body, end) = flow!(self.eval_expr(line, next));
        let Value::List(body) = body else {
            return Err(ErrorKind::InvalidArg.at(arg_text(line, next)));
        };
        for _ in 0..count {
            match self.exec_line(&body, 0)? {
                ControlFlow::Continue(_) => {}
                ControlFlow::Break(Signal::Stop) => {
                    self.stop_at = None;
                    break;
                }
                ControlFlow::Break(sig) => return raise(sig),
            }
        }
        cont(end)
    }

    /// `IF cond [true] [false]`. The blocks must be literal lists.
    fn branch(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let first = pos + 1;
        if line.len().saturating_sub(first) < 2 {
            return Err(ErrorKind::MissingArg.bare());
        }
        let (cond, next) = flow!(self.eval_expr(line, first));
        let Some(tok) = line.tokens.get(next) else {
            return Err(ErrorKind::IfMissingBlock.bare());
        };
        let TokenKind::List(if_true) = &tok.kind else {
            return Err(ErrorKind::IfRequiresList.at(tok.to_string()));
        };
        let if_false = match line.tokens.get(next + 1).map(|t| &t.kind) {
            Some(TokenKind::List(list)) => Some(list),
            _ => None,
        };
        let end = if if_false.is_some() { next + 2 } else { next + 1 };
        let block = if cond.is_set() { Some(if_true) } else { if_false };
        if let Some(block) = block.map(Rc::clone) {
            flow!(self.exec_line(&block, 0));
        }
        cont(end)
    }

    fn check_graphics(&self) -> Result<(), Failure> {
        if self.graphics {
            Ok(())
        } else {
            Err(ErrorKind::NoGraphics.bare())
        }
    }

    fn turtle_command(&mut self, cmd: Command) -> Result<(), Failure> {
        self.check_graphics()?;
        match cmd {
            Command::Home => self.turtle.home(),
            Command::Clear => self.turtle.clear(),
            Command::Ht => self.turtle.set_visible(false),
            Command::St => self.turtle.set_visible(true),
            Command::Hw => self.turtle.show_window(false),
            Command::Sw => self.turtle.show_window(true),
            Command::Cs => {
                self.turtle.reset();
                self.win_colour = WIN_DEFAULT_COLOUR;
                self.set_window_vars();
            }
            Command::Pu => self.turtle.set_pen_down(false),
            Command::Pd => self.turtle.set_pen_down(true),
            Command::Window => {
                self.turtle.set_edge(Edge::Unbounded);
                self.println("Turtle not fenced.")?;
            }
            Command::Fence => {
                self.turtle.set_edge(Edge::Fenced);
                self.println("Turtle fenced.")?;
            }
            Command::Wrap => {
                self.turtle.set_edge(Edge::Wrapped);
                self.println("Turtle wrapped.")?;
            }
            Command::SetFill => self.turtle.start_fill()?,
            Command::Fill => self.turtle.fill()?,
            _ => unreachable!("{} takes arguments", cmd.name()),
        }
        Ok(())
    }

    fn turtle_command_1(&mut self, cmd: Command, line: &Line, pos: usize) -> Flow<usize> {
        self.check_graphics()?;
        let (val, next) = flow!(self.arg(line, pos + 1));
        if cmd == Command::SetLs {
            let Value::Str(name) = val else {
                return Err(ErrorKind::InvalidArg.at(arg_text(line, pos + 1)));
            };
            let style = LineStyle::parse(&name)
                .ok_or_else(|| ErrorKind::InvalidArg.at(name.to_uppercase()))?;
            self.turtle.set_line_style(style);
            return cont(next);
        }
        let Value::Num(n) = val else {
            return Err(ErrorKind::InvalidArg.at(arg_text(line, pos + 1)));
        };
        let degrees = if self.angle_in_degs { n } else { n * DEGS_PER_RADIAN };
        let at = self.turtle.position();
        match cmd {
            Command::Fd => self.turtle.forward(n)?,
            Command::Bk => self.turtle.forward(-n)?,
            Command::Lt => self.turtle.turn(-degrees),
            Command::Rt => self.turtle.turn(degrees),
            Command::SetPc => self.turtle.set_colour(n as i64)?,
            Command::SetBg => {
                self.turtle.set_background(n as i64)?;
                self.win_colour = n as i64;
                self.scope.set_system("$win_colour", self.win_colour as f64);
            }
            Command::SetX => self.turtle.set_pos(Point::new(n, at.y))?,
            Command::SetY => self.turtle.set_pos(Point::new(at.x, n))?,
            Command::SetH => self.turtle.set_heading(degrees),
            Command::SetSz => self.turtle.set_size(n)?,
            Command::SetLw => self.turtle.set_line_width(n as i64)?,
            _ => unreachable!("{} does not take one argument", cmd.name()),
        }
        cont(next)
    }

    fn turtle_command_2(&mut self, cmd: Command, line: &Line, pos: usize) -> Flow<usize> {
        self.check_graphics()?;
        if line.len() - pos < 2 {
            return Err(ErrorKind::MissingArg.bare());
        }
        let (x, ypos) = flow!(self.num_arg(line, pos + 1));
        if line.is_expr_end(ypos) {
            return Err(ErrorKind::MissingArg.bare());
        }
        let (y, next) = flow!(self.num_arg(line, ypos));
        match cmd {
            Command::SetPos => self.turtle.set_pos(Point::new(x, y))?,
            Command::Towards => self.turtle.face(Point::new(x, y)),
            Command::Dot => self.turtle.dot(Point::new(x, y)),
            Command::SetWinSz => {
                if x < 1.0 {
                    return Err(ErrorKind::InvalidArg.at(arg_text(line, pos + 1)));
                }
                if y < 1.0 {
                    return Err(ErrorKind::InvalidArg.at(arg_text(line, ypos)));
                }
                self.turtle.resize(x.trunc(), y.trunc());
                self.set_window_vars();
            }
            _ => unreachable!("{} does not take two arguments", cmd.name()),
        }
        cont(next)
    }

    /// `SAVE "file ["proc]`
    fn save(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let first = pos + 1;
        let (path, mut next) = flow!(self.word_arg(line, first));
        let mut only = None;
        if !line.is_expr_end(next) {
            let (name, after) = flow!(self.str_arg(line, next));
            if !name.is_empty() {
                if !self.procs.contains(&name) {
                    return Err(ErrorKind::UndefinedUserProc.at(name));
                }
                only = Some(name);
            }
            next = after;
        } else if self.procs.is_empty() {
            self.println("No user procedures to save.")?;
            return cont(next);
        }
        self.save_procs(&path, only.as_deref()).map_err(|mut e| {
            e.token = line.tokens[first].text.clone();
            e
        })?;
        cont(next)
    }

    /// `LOAD "file ["proc]`. An empty procedure name loads everything.
    fn load(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let (file, mut next) = flow!(self.word_arg(line, pos + 1));
        let mut filter = None;
        if !line.is_expr_end(next) {
            let (name, after) = flow!(self.str_arg(line, next));
            filter = Some(name);
            next = after;
        }
        flow!(self.load_procs(&file, filter));
        cont(next)
    }

    /// HELP lists names in table order, SHELP sorted.
    fn help(&mut self, sorted: bool, line: &Line, pos: usize) -> Flow<usize> {
        let mut next = pos + 1;
        let mut pattern = None;
        if !line.is_expr_end(next) {
            let (pat, after) = flow!(self.str_arg(line, next));
            pattern = Some(pat);
            next = after;
        }
        let wanted = |name: &&str| {
            pattern
                .as_deref()
                .map_or(true, |pat| wild_match(name, pat, false))
        };
        let mut text = String::from("Commands\n--------\n");
        text += &columns(Command::ALL.iter().map(|c| c.name()).filter(wanted), sorted);
        text += "\nSystem procedures\n-----------------\n";
        text += &columns(SysProc::ALL.iter().map(|s| s.name()).filter(wanted), sorted);
        text.push('\n');
        self.print(text)?;
        cont(next)
    }

    fn show_history(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let mut next = pos + 1;
        let mut count = self.history.len();
        if !line.is_expr_end(next) {
            let (n, after) = flow!(self.num_arg(line, next));
            if n < 1.0 {
                return Err(ErrorKind::InvalidArg.at(arg_text(line, next)));
            }
            count = n as usize;
            next = after;
        }
        let mut text = String::from("Command history\n---------------\n");
        for (num, src) in self.history.recent(count) {
            let _ = writeln!(text, "{num:<3} {src}");
        }
        self.print(text)?;
        cont(next)
    }

    fn watch(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let mut next = pos + 1;
        if line.is_expr_end(next) {
            if self.scope.watch.is_empty() {
                self.println("There are no variables being watched.")?;
            } else {
                let names: Vec<&str> = self.scope.watch.iter().map(String::as_str).collect();
                let text = format!("Watched variables: {}", names.join(", "));
                self.println(text)?;
            }
            return cont(next);
        }
        while let Some(tok) = line.tokens.get(next) {
            if !matches!(tok.kind, TokenKind::Var) {
                break;
            }
            self.scope.watch.insert(tok.var_name().to_owned());
            next += 1;
        }
        self.println(format_args!("Watching {} variables.", self.scope.watch.len()))?;
        cont(next)
    }

    fn unwatch(&mut self, line: &Line, pos: usize) -> Flow<usize> {
        let mut next = pos + 1;
        if line.is_expr_end(next) {
            self.scope.watch.clear();
            self.println("All watch variables cleared.")?;
            return cont(next);
        }
        while let Some(tok) = line.tokens.get(next) {
            if !matches!(tok.kind, TokenKind::Var) {
                break;
            }
            let name = tok.var_name();
            if !self.scope.watch.remove(name) {
                return Err(ErrorKind::UnwatchedVar.at(name));
            }
            next += 1;
        }
        match self.scope.watch.len() {
            0 => self.println("All watch variables cleared.")?,
            n => self.println(format_args!("Now watching {n} variable(s)."))?,
        }
        cont(next)
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

    fn run(s: &mut Session, out: &SharedBuffer, src: &str) -> String {
        for line in src.lines() {
            s.execute(line);
        }
        out.take()
    }

    #[test]
    fn table_lookup() {
        assert_eq!(Command::lookup("repeat"), Some(Command::Repeat));
        assert_eq!(Command::lookup("MakeLoc"), Some(Command::MakeLoc));
        assert_eq!(Command::lookup(";"), Some(Command::Comment));
        assert_eq!(Command::lookup("sqrt"), None);
        assert_eq!(Command::ALL[0].name(), ";");
    }

    #[test]
    fn print_and_write() {
        let (mut s, out) = session();
        assert_eq!(run(&mut s, &out, "pr \"a\" 1 [1 \"b\"]"), "a1[1 \"b\"]\n");
        assert_eq!(run(&mut s, &out, "wr 1 wr 2\npr"), "12\n");
        assert_eq!(run(&mut s, &out, "1 + 1"), "2\n");
    }

    #[test]
    fn make_checks_names() {
        let (mut s, out) = session();
        assert_eq!(
            run(&mut s, &out, "make \"1\" 2\nmake \"$pi\" 3\nmake \"a b\" 1\nmake \"a+b\" 1"),
            "ERROR 15: Invalid variable name at \"1\"\n\
             ERROR 17: Read only variable at \"$pi\"\n\
             ERROR 15: Invalid variable name at \"a b\"\n\
             ERROR 15: Invalid variable name at \"a+b\"\n"
        );
        assert_eq!(
            run(&mut s, &out, "makeloc \"y\" 1"),
            "ERROR 31: Not in a user procedure at \"makeloc\"\n"
        );
    }

    #[test]
    fn repeat_and_stop() {
        let (mut s, out) = session();
        assert_eq!(
            run(&mut s, &out, "make \"i\" 0\nrepeat 5 [inc :i if :i = 3 [stop]]\npr :i"),
            "3\n"
        );
        assert_eq!(
            run(&mut s, &out, "repeat 2 \"x\""),
            "ERROR 8: Invalid argument at \"\"x\"\"\n"
        );
    }

    #[test]
    fn if_blocks() {
        let (mut s, out) = session();
        assert_eq!(run(&mut s, &out, "if 1 [pr \"y\"] [pr \"n\"]"), "y\n");
        assert_eq!(run(&mut s, &out, "if 0 [pr \"y\"] [pr \"n\"]"), "n\n");
        assert_eq!(run(&mut s, &out, "if 0 [pr \"y\"] pr \"after\""), "after\n");
        assert_eq!(
            run(&mut s, &out, "IF 1 PR 2"),
            "ERROR 22: IF requires a list block to execute at \"PR\"\n"
        );
        assert_eq!(
            run(&mut s, &out, "IF 1 + 2"),
            "ERROR 23: IF missing exec list block at \"IF\"\n"
        );
    }

    #[test]
    fn watch_list() {
        let (mut s, out) = session();
        assert_eq!(
            run(&mut s, &out, "watch\nwatch :b :a\nwatch\nmake \"a\" 1"),
            "There are no variables being watched.\n\
             Watching 2 variables.\n\
             Watched variables: a, b\n\
             {G,a=1}\n"
        );
        assert_eq!(
            run(&mut s, &out, "unwatch :a\nunwatch :zz\nunwatch"),
            "Now watching 1 variable(s).\n\
             ERROR 14: Unwatched variable at \"zz\"\n\
             All watch variables cleared.\n"
        );
    }

    #[test]
    fn graphics_can_be_switched_off() {
        let (mut s, out) = session();
        assert_eq!(
            run(&mut s, &out, "FD 10\nTG\nFD 10"),
            "ERROR 34: Turtle graphics are not available at \"FD\"\n"
        );
        assert_eq!(run(&mut s, &out, "tg\nfence"), "Turtle fenced.\n");
    }

    #[test]
    fn help_filters() {
        let (mut s, out) = session();
        let cell = |name: &str| format!("   {name:<8}");
        let row: String = ["PO", "POL", "POPS", "POPSL", "POTS", "PONS", "POSF"]
            .into_iter()
            .map(cell)
            .collect();
        assert_eq!(
            run(&mut s, &out, "help \"po*\""),
            format!(
                "Commands\n--------\n{row}\n{}\n\nSystem procedures\n-----------------\n\n",
                cell("POALL")
            )
        );
    }

    #[test]
    fn erase() {
        let (mut s, out) = session();
        run(&mut s, &out, "make \"x\" 1\nto f\nend");
        assert_eq!(
            run(&mut s, &out, "er :x f\ner :x"),
            "Global variable \"x\" erased.\n\
             User procedure \"f\" erased.\n\
             ERROR 13: Undefined variable at \"x\"\n"
        );
        assert_eq!(run(&mut s, &out, "er 3"), "ERROR 8: Invalid argument at \"3\"\n");
    }

    #[test]
    fn listing_and_editing() {
        let (mut s, out) = session();
        run(&mut s, &out, "to f :a\npr :a\npr 2\nend");
        assert_eq!(
            run(&mut s, &out, "ed f 15 pr 3\ned f 20\nrenum f\npol f"),
            "User procedure \"f\" renumbered.\n\
             TO f :a \n10 \tPR :a\n20 \tPR 3\nEND\n"
        );
        assert_eq!(
            run(&mut s, &out, "ed g 10 pr 1"),
            "ERROR 30: Undefined user procedure at \"g\"\n"
        );
        assert_eq!(
            run(&mut s, &out, "ed f 99999999999 pr 4"),
            "ERROR 21: Value out of range at \"99999999999\"\n"
        );
        assert_eq!(run(&mut s, &out, "f 1"), "1\n3\n");
    }
}
