use std::{
    ffi::CString,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{seq::SliceRandom, Rng};

use crate::{
    commands::{arg_text, name_table},
    error::{ErrorKind, Failure},
    flow::{cont, flow, Flow},
    lexer::{is_number, tokenize_list},
    line::Line,
    path::{wild_match, EntryKind, FILE_EXTENSION},
    session::{Session, DEGS_PER_RADIAN},
    token::Token,
    value::{repeat_count, Value},
};

name_table! {
    /// Built-in functions. Each one returns a value.
    pub enum SysProc {
        Eval => "EVAL",
        First => "FIRST",
        Last => "LAST",
        Bf => "BF",
        Bl => "BL",
        Piece => "PIECE",
        Count => "COUNT",
        NumP => "NUMP",
        StrP => "STRP",
        ListP => "LISTP",
        FPut => "FPUT",
        LPut => "LPUT",
        Item => "ITEM",
        MemberP => "MEMBERP",
        Uc => "UC",
        Lc => "LC",
        Ascii => "ASCII",
        Char => "CHAR",
        Rc => "RC",
        Rl => "RL",
        Tf => "TF",
        Num => "NUM",
        Str => "STR",
        SStr => "SSTR",
        Split => "SPLIT",
        Random => "RANDOM",
        Int => "INT",
        Round => "ROUND",
        Sin => "SIN",
        Cos => "COS",
        Tan => "TAN",
        ASin => "ASIN",
        ACos => "ACOS",
        ATan => "ATAN",
        Log => "LOG",
        Log2 => "LOG2",
        Log10 => "LOG10",
        Sqrt => "SQRT",
        Abs => "ABS",
        Sgn => "SGN",
        Shuffle => "SHUFFLE",
        Match => "MATCH",
        MatchC => "MATCHC",
        Dir => "DIR",
        GetDir => "GETDIR",
        GetSecs => "GETSECS",
        GetDate => "GETDATE",
        Fmt => "FMT",
        LPad => "LPAD",
        RPad => "RPAD",
        List => "LIST",
        Path => "PATH",
    }
}

impl SysProc {
    /// How many arguments the procedure takes. DIR's one is optional.
    pub fn arity(self) -> usize {
        match self {
            SysProc::Tf | SysProc::Dir | SysProc::GetDir | SysProc::GetSecs => 0,
            SysProc::Piece | SysProc::LPad | SysProc::RPad => 3,
            SysProc::FPut
            | SysProc::LPut
            | SysProc::Item
            | SysProc::MemberP
            | SysProc::Split
            | SysProc::Match
            | SysProc::MatchC
            | SysProc::GetDate
            | SysProc::Fmt => 2,
            _ => 1,
        }
    }
}

fn invalid(line: &Line, pos: usize) -> Failure {
    ErrorKind::InvalidArg.at(arg_text(line, pos))
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Characters `from..=to` counting from 1.
fn substr(s: &str, from: usize, to: usize) -> String {
    s.chars().skip(from - 1).take(to + 1 - from).collect()
}

fn sign(n: f64) -> f64 {
    if n > 0.0 {
        1.0
    } else if n < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// `#` and `.` templates: every `#` before the point takes one integer
/// digit from the right, zero padded; every `#` after it one decimal
/// place. No `#` on a side leaves that side as printed.
fn format_number(n: f64, template: &str) -> Option<String> {
    let (int_fmt, frac_fmt) = template.split_once('.')?;
    if !template.chars().all(|c| c == '#' || c == '.') || frac_fmt.contains('.') {
        return None;
    }
    let printed = format!("{n:.6}");
    let (int_part, frac_part) = printed.split_once('.').unwrap_or((&printed, ""));

    let mut out = String::new();
    if int_fmt.is_empty() {
        out.push_str(int_part);
    } else {
        let digits: Vec<char> = int_part.chars().collect();
        let width = int_fmt.len();
        out.extend(std::iter::repeat('0').take(width.saturating_sub(digits.len())));
        out.extend(&digits[digits.len().saturating_sub(width)..]);
    }
    out.push('.');
    if frac_fmt.is_empty() {
        out.push_str(frac_part);
    } else {
        let mut frac = frac_part.chars();
        out.extend((0..frac_fmt.len()).map(|_| frac.next().unwrap_or('0')));
    }
    Some(out)
}

/// strftime on the local or, with a leading `U` in the format, the UTC
/// time. None if the result doesn't fit or the format can't be passed on.
fn format_date(secs: i64, format: &str) -> Option<String> {
    let (utc, format) = match format.strip_prefix('U') {
        Some(rest) => (true, rest),
        None => (false, format),
    };
    let format = CString::new(format).ok()?;
    let time = secs as libc::time_t;
    // SAFETY: tm is plain data that the conversions below fill in.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    // SAFETY: both pointers refer to live locals.
    let converted = unsafe {
        if utc {
            libc::gmtime_r(&time, &mut tm)
        } else {
            libc::localtime_r(&time, &mut tm)
        }
    };
    if converted.is_null() {
        return None;
    }
    let mut buf = [0u8; 200];
    // SAFETY: strftime writes at most buf.len() bytes, and format is NUL
    // terminated.
    let len = unsafe { libc::strftime(buf.as_mut_ptr().cast(), buf.len(), format.as_ptr(), &tm) };
    if len == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&buf[..len]).into_owned())
}

impl Session {
    /// Call the system procedure at `pos`. Returns its value and the
    /// position after its last argument.
    pub(crate) fn call_sysproc(&mut self, sp: SysProc, line: &Line, pos: usize) -> Flow<(Value, usize)> {
        let first = pos + 1;
        match sp {
            SysProc::Eval => match flow!(self.arg(line, first)) {
                (Value::List(list), next) => {
                    let evaluated = flow!(self.eval_list(&list));
                    cont((Value::from(evaluated), next))
                }
                _ => Err(ErrorKind::CantEval.at(arg_text(line, first))),
            },
            SysProc::First | SysProc::Last => {
                let (val, next) = flow!(self.arg(line, first));
                let val = match val {
                    Value::Str(s) => {
                        let c = if sp == SysProc::First {
                            s.chars().next()
                        } else {
                            s.chars().last()
                        };
                        Value::Str(c.map(String::from).unwrap_or_default())
                    }
                    Value::List(l) => l.element(if sp == SysProc::First { 1 } else { l.len() }),
                    _ => return Err(invalid(line, first)),
                };
                cont((val, next))
            }
            SysProc::Bf | SysProc::Bl => {
                let (val, next) = flow!(self.arg(line, first));
                let val = match val {
                    Value::Str(s) => {
                        let len = char_count(&s);
                        if len < 2 {
                            Value::from("")
                        } else if sp == SysProc::Bf {
                            Value::Str(substr(&s, 2, len))
                        } else {
                            Value::Str(substr(&s, 1, len - 1))
                        }
                    }
                    Value::List(l) => {
                        let len = l.len();
                        if len < 2 {
                            Value::from(Line::empty_list())
                        } else if sp == SysProc::Bf {
                            Value::from(l.slice(2, len))
                        } else {
                            Value::from(l.slice(1, len - 1))
                        }
                    }
                    _ => return Err(invalid(line, first)),
                };
                cont((val, next))
            }
            SysProc::Piece => self.piece(line, first),
            SysProc::Count => {
                let (val, next) = flow!(self.arg(line, first));
                let count = match val {
                    Value::Str(s) => char_count(&s),
                    Value::List(l) => l.len(),
                    _ => return Err(invalid(line, first)),
                };
                cont((Value::Num(count as f64), next))
            }
            SysProc::NumP | SysProc::StrP | SysProc::ListP => {
                let (val, next) = flow!(self.arg(line, first));
                let is = match sp {
                    SysProc::NumP => matches!(val, Value::Num(_)),
                    SysProc::StrP => matches!(val, Value::Str(_)),
                    _ => matches!(val, Value::List(_)),
                };
                cont((Value::from(is), next))
            }
            SysProc::FPut | SysProc::LPut => {
                let (elem, at) = flow!(self.arg(line, first));
                if line.is_expr_end(at) {
                    return Err(ErrorKind::MissingArg.bare());
                }
                let (into, next) = flow!(self.eval_expr(line, at));
                let val = match into {
                    Value::Str(s) => match elem {
                        Value::Str(e) if !e.is_empty() => {
                            if sp == SysProc::FPut {
                                Value::Str(e + &s)
                            } else {
                                Value::Str(s + &e)
                            }
                        }
                        _ => return Err(invalid(line, first)),
                    },
                    Value::List(l) if sp == SysProc::FPut => Value::from(l.with_first(&elem)),
                    Value::List(l) => Value::from(l.with_last(&elem)),
                    _ => return Err(invalid(line, at)),
                };
                cont((val, next))
            }
            SysProc::Item => {
                let (index, at) = flow!(self.arg(line, first));
                if line.is_expr_end(at) {
                    return Err(ErrorKind::MissingArg.bare());
                }
                let Value::Num(index) = index else {
                    return Err(invalid(line, first));
                };
                if index < 1.0 {
                    return Err(ErrorKind::OutOfBounds.at(arg_text(line, first)));
                }
                let index = index as usize;
                let (of, next) = flow!(self.eval_expr(line, at));
                let val = match of {
                    Value::Str(s) => match s.chars().nth(index - 1) {
                        Some(c) => Value::Str(c.to_string()),
                        None => Value::from(""),
                    },
                    Value::List(l) if index > l.len() => Value::from(Line::empty_list()),
                    Value::List(l) => l.element(index),
                    _ => return Err(invalid(line, at)),
                };
                cont((val, next))
            }
            SysProc::MemberP => {
                let (needle, at) = flow!(self.arg(line, first));
                if line.is_expr_end(at) {
                    return Err(ErrorKind::MissingArg.bare());
                }
                let (haystack, next) = flow!(self.eval_expr(line, at));
                let found = match haystack {
                    Value::Str(s) => match needle {
                        Value::Str(n) if !n.is_empty() => {
                            s.find(&n).map_or(0, |i| char_count(&s[..i]) + 1)
                        }
                        _ => return Err(invalid(line, first)),
                    },
                    Value::List(l) => l.position_of(&needle).unwrap_or(0),
                    _ => return Err(invalid(line, first)),
                };
                cont((Value::Num(found as f64), next))
            }
            SysProc::Uc | SysProc::Lc => match flow!(self.arg(line, first)) {
                (Value::Str(s), next) => {
                    let s = if sp == SysProc::Uc {
                        s.to_ascii_uppercase()
                    } else {
                        s.to_ascii_lowercase()
                    };
                    cont((Value::Str(s), next))
                }
                _ => Err(invalid(line, first)),
            },
            SysProc::Ascii => match flow!(self.arg(line, first)) {
                (Value::Str(s), next) if char_count(&s) == 1 => {
                    let code = s.chars().next().map_or(0, u32::from);
                    cont((Value::Num(f64::from(code)), next))
                }
                _ => Err(invalid(line, first)),
            },
            SysProc::Char => match flow!(self.arg(line, first)) {
                (Value::Num(n), next) if (0.0..=255.0).contains(&n) => {
                    cont((Value::Str(char::from(n as u8).to_string()), next))
                }
                _ => Err(invalid(line, first)),
            },
            SysProc::Rc | SysProc::Rl => {
                // The argument asks for echoing, which the line source
                // decides on by itself.
                let (echo, next) = flow!(self.arg(line, first));
                if !matches!(echo, Value::Num(n) if n == 0.0 || n == 1.0) {
                    return Err(invalid(line, first));
                }
                let input = self
                    .input
                    .read_line("")
                    .map_err(|e| ErrorKind::ReadFail.bare().with_detail(&e))?
                    .unwrap_or_default();
                let val = if sp == SysProc::Rc {
                    input.chars().next().map(String::from).unwrap_or_default()
                } else {
                    input
                };
                cont((Value::Str(val), next))
            }
            SysProc::Tf => {
                if !self.graphics {
                    return Err(ErrorKind::NoGraphics.bare());
                }
                cont((Value::from(self.turtle_facts()), first))
            }
            SysProc::Num => match flow!(self.arg(line, first)) {
                (Value::Num(n), next) => cont((Value::Num(n), next)),
                (Value::Str(s), next) if !s.is_empty() && is_number(&s) => match s.parse::<f64>() {
                    Ok(n) => cont((Value::Num(n), next)),
                    Err(_) => Err(ErrorKind::CantConvert.at(arg_text(line, first))),
                },
                _ => Err(ErrorKind::CantConvert.at(arg_text(line, first))),
            },
            SysProc::Str | SysProc::SStr => {
                let (val, next) = flow!(self.arg(line, first));
                let s = match &val {
                    Value::List(l) if sp == SysProc::SStr => l.to_simple_string(),
                    _ => val.dump(false),
                };
                cont((Value::Str(s), next))
            }
            SysProc::Split => {
                let (sep, at) = flow!(self.arg(line, first));
                let sep = match sep {
                    Value::Str(s) if !s.is_empty() => s,
                    _ => return Err(invalid(line, first)),
                };
                if line.is_expr_end(at) {
                    return Err(ErrorKind::MissingArg.bare());
                }
                let (Value::Str(s), next) = flow!(self.eval_expr(line, at)) else {
                    return Err(invalid(line, at));
                };
                let parts = s.split(sep.as_str()).map(Token::string).collect();
                cont((Value::from(Line::list_of(parts)), next))
            }
            SysProc::Shuffle => {
                let (val, next) = flow!(self.arg(line, first));
                let val = match val {
                    Value::List(l) => {
                        let mut tokens = l.tokens.clone();
                        tokens.shuffle(&mut self.rng);
                        Value::from(Line::list_of(tokens))
                    }
                    Value::Str(s) => {
                        let mut chars: Vec<char> = s.chars().collect();
                        chars.shuffle(&mut self.rng);
                        Value::Str(chars.into_iter().collect())
                    }
                    _ => return Err(invalid(line, first)),
                };
                cont((val, next))
            }
            SysProc::Random
            | SysProc::Int
            | SysProc::Round
            | SysProc::Sin
            | SysProc::Cos
            | SysProc::Tan
            | SysProc::ASin
            | SysProc::ACos
            | SysProc::ATan
            | SysProc::Log
            | SysProc::Log2
            | SysProc::Log10
            | SysProc::Sqrt
            | SysProc::Abs
            | SysProc::Sgn => {
                let (val, next) = flow!(self.arg(line, first));
                let Value::Num(n) = val else {
                    return Err(invalid(line, first));
                };
                cont((Value::Num(self.maths(sp, n, line, first)?), next))
            }
            SysProc::Match | SysProc::MatchC => {
                let (Value::Str(s), at) = flow!(self.arg(line, first)) else {
                    return Err(invalid(line, first));
                };
                let (Value::Str(pat), next) = flow!(self.arg(line, at)) else {
                    return Err(invalid(line, at));
                };
                let matched = wild_match(&s, &pat, sp == SysProc::MatchC);
                cont((Value::from(matched), next))
            }
            SysProc::Dir => self.dir(line, first),
            SysProc::GetDir => {
                let dir = std::env::current_dir()
                    .map_err(|e| ErrorKind::StatFail.bare().with_detail(&e))?;
                cont((Value::Str(dir.display().to_string()), first))
            }
            SysProc::GetSecs => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_secs());
                cont((Value::Num(secs as f64), first))
            }
            SysProc::GetDate => {
                let (Value::Num(secs), at) = flow!(self.arg(line, first)) else {
                    return Err(invalid(line, first));
                };
                let (format, next) = match flow!(self.arg(line, at)) {
                    (Value::Str(f), next) if !f.is_empty() => (f, next),
                    _ => return Err(invalid(line, at)),
                };
                let date = format_date(secs as i64, &format)
                    .ok_or_else(|| ErrorKind::InvalidArg.at(format.as_str()))?;
                cont((Value::Str(date), next))
            }
            SysProc::Fmt => {
                let (Value::Num(n), at) = flow!(self.arg(line, first)) else {
                    return Err(ErrorKind::InvalidFmt.at(arg_text(line, first)));
                };
                let (Value::Str(template), next) = flow!(self.arg(line, at)) else {
                    return Err(ErrorKind::InvalidFmt.at(arg_text(line, at)));
                };
                let s = format_number(n, &template)
                    .ok_or_else(|| ErrorKind::InvalidFmt.at(template.as_str()))?;
                cont((Value::Str(s), next))
            }
            SysProc::LPad | SysProc::RPad => self.pad(sp, line, first),
            SysProc::List => match flow!(self.arg(line, first)) {
                (Value::Str(s), next) => cont((Value::from(tokenize_list(&s)?), next)),
                _ => Err(invalid(line, first)),
            },
            SysProc::Path => match flow!(self.arg(line, first)) {
                (Value::Str(s), next) => {
                    let path = self
                        .paths
                        .match_path(&s, EntryKind::Dir)
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    cont((Value::Str(path), next))
                }
                _ => Err(invalid(line, first)),
            },
        }
    }

    /// `PIECE from to thing`
    fn piece(&mut self, line: &Line, first: usize) -> Flow<(Value, usize)> {
        let (Value::Num(from), at) = flow!(self.arg(line, first)) else {
            return Err(invalid(line, first));
        };
        if from < 1.0 {
            return Err(ErrorKind::OutOfBounds.at(arg_text(line, first)));
        }
        if at >= line.len() {
            return Err(ErrorKind::MissingArg.bare());
        }
        let from = from as usize;
        let (to, of_at) = flow!(self.eval_expr(line, at));
        let to = match to {
            Value::Num(to) if to < 1.0 => return Err(ErrorKind::OutOfBounds.at(arg_text(line, at))),
            Value::Num(to) if to as usize >= from => to as usize,
            _ => return Err(invalid(line, at)),
        };
        let (of, next) = flow!(self.arg(line, of_at));
        let val = match of {
            Value::Str(s) if from > char_count(&s) => Value::from(""),
            Value::Str(s) => Value::Str(substr(&s, from, to)),
            Value::List(l) if from > l.len() => Value::from(Line::empty_list()),
            Value::List(l) => Value::from(l.slice(from, to)),
            _ => return Err(invalid(line, of_at)),
        };
        cont((val, next))
    }

    fn maths(&mut self, sp: SysProc, n: f64, line: &Line, pos: usize) -> Result<f64, Failure> {
        let to_rads = if self.angle_in_degs { DEGS_PER_RADIAN } else { 1.0 };
        let out_of_range = || ErrorKind::ValueOutOfRange.at(arg_text(line, pos));
        Ok(match sp {
            SysProc::Random => {
                if n < 1.0 {
                    return Err(invalid(line, pos));
                }
                f64::from(self.rng.gen_range(0..=n as u32))
            }
            SysProc::Int => n.trunc(),
            SysProc::Round => n.round(),
            SysProc::Sin => (n / to_rads).sin(),
            SysProc::Cos => (n / to_rads).cos(),
            SysProc::Tan => (n / to_rads).tan(),
            SysProc::ASin | SysProc::ACos if !(-1.0..=1.0).contains(&n) => {
                return Err(out_of_range());
            }
            SysProc::ASin => n.asin() * to_rads,
            SysProc::ACos => n.acos() * to_rads,
            SysProc::ATan => n.atan() * to_rads,
            SysProc::Log => n.ln(),
            SysProc::Log2 => n.log2(),
            SysProc::Log10 => n.log10(),
            SysProc::Sqrt => n.sqrt(),
            SysProc::Abs => n.abs(),
            SysProc::Sgn => sign(n),
            _ => unreachable!("{} is not numeric", sp.name()),
        })
    }

    /// `DIR [dir]`: procedure files in a directory, without their
    /// extension.
    fn dir(&mut self, line: &Line, first: usize) -> Flow<(Value, usize)> {
        let (dir, next) = if line.is_expr_end(first) {
            (".".to_owned(), first)
        } else {
            match flow!(self.eval_expr(line, first)) {
                (Value::Str(s), next) if !s.is_empty() => (s, next),
                _ => return Err(invalid(line, first)),
            }
        };
        let path = self
            .paths
            .match_path(&dir, EntryKind::Dir)
            .map_err(|k| k.at(arg_text(line, first)))?;
        let entries = std::fs::read_dir(&path)
            .map_err(|e| ErrorKind::OpenFail.at(path.display().to_string()).with_detail(&e))?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map_or(true, |t| !t.is_dir()))
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(FILE_EXTENSION)
                    .filter(|stem| !stem.is_empty())
                    .map(str::to_owned)
            })
            .collect();
        names.sort();
        log::debug!("{} procedure files in {}", names.len(), path.display());
        let list = Line::list_of(names.into_iter().map(Token::string).collect());
        cont((Value::from(list), next))
    }

    /// `LPAD text char width` and `RPAD`. Text that is already wide
    /// enough is left alone.
    fn pad(&mut self, sp: SysProc, line: &Line, first: usize) -> Flow<(Value, usize)> {
        let (Value::Str(text), at) = flow!(self.arg(line, first)) else {
            return Err(invalid(line, first));
        };
        let (fill, width_at) = match flow!(self.arg(line, at)) {
            (Value::Str(s), next) if char_count(&s) == 1 => (s, next),
            _ => return Err(invalid(line, at)),
        };
        let (width, next) = match flow!(self.arg(line, width_at)) {
            (Value::Num(n), next) if n >= 1.0 => {
                let width = repeat_count(n, fill.len(), &arg_text(line, width_at))?;
                (width, next)
            }
            _ => return Err(invalid(line, width_at)),
        };
        let padding = fill.repeat(width.saturating_sub(char_count(&text)));
        let padded = if sp == SysProc::LPad {
            padding + &text
        } else {
            text + &padding
        };
        cont((Value::Str(padded), next))
    }

    /// TF: everything about the turtle in one list.
    fn turtle_facts(&self) -> Line {
        let facts = self.turtle.facts();
        let word = |yes: bool, on: &str, off: &str| Token::string(if yes { on } else { off });
        Line::list_of(vec![
            Token::num(facts.pos.x),
            Token::num(facts.pos.y),
            Token::num(facts.heading),
            Token::num(facts.size),
            Token::num(facts.line_width as f64),
            Token::num(facts.colour as f64),
            word(facts.pen_down, "DOWN", "UP"),
            word(facts.visible, "VISIBLE", "HIDDEN"),
            word(facts.filling, "FILL", "NO_FILL"),
            Token::string(facts.edge.name()),
            Token::string(facts.style.name()),
            word(facts.window_shown, "WIN_VISIBLE", "WIN_HIDDEN"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, io::SharedBuffer};

    fn eval(src: &str) -> String {
        let out = SharedBuffer::default();
        let mut s = Session::new(Config::default()).with_output(Box::new(out.clone()));
        s.execute(&format!("pr {src}"));
        out.take()
    }

    #[test]
    fn arities() {
        assert_eq!(SysProc::lookup("piece").map(SysProc::arity), Some(3));
        assert_eq!(SysProc::Dir.arity(), 0);
        assert_eq!(SysProc::Fmt.arity(), 2);
        assert_eq!(SysProc::Sqrt.arity(), 1);
    }

    #[test]
    fn strings_and_lists() {
        assert_eq!(eval("first \"abc\""), "a\n");
        assert_eq!(eval("last [1 2 3]"), "3\n");
        assert_eq!(eval("bf \"abc\""), "bc\n");
        assert_eq!(eval("bl [1 2 3]"), "[1 2]\n");
        assert_eq!(eval("piece 2 3 \"abcd\""), "bc\n");
        assert_eq!(eval("piece 2 9 [1 2 3]"), "[2 3]\n");
        assert_eq!(eval("count [1 [2 3] 4]"), "3\n");
        assert_eq!(eval("fput \"x\" \"yz\""), "xyz\n");
        assert_eq!(eval("lput 4 [1 2]"), "[1 2 4]\n");
        assert_eq!(eval("item 2 \"abc\""), "b\n");
        assert_eq!(eval("memberp \"c\" \"abc\""), "3\n");
        assert_eq!(eval("memberp 9 [1 2]"), "0\n");
        assert_eq!(eval("split \",\" \"a,b,,c\""), "[\"a\" \"b\" \"\" \"c\"]\n");
        assert_eq!(eval("sstr [1 [2 3]]"), "1 2 3\n");
        assert_eq!(eval("str [1 2]"), "[1 2]\n");
        assert_eq!(eval("uc \"abc\""), "ABC\n");
        assert_eq!(eval("ascii \"A\""), "65\n");
        assert_eq!(eval("char 66"), "B\n");
    }

    #[test]
    fn argument_checks() {
        assert_eq!(
            eval("piece 0 1 \"abc\""),
            "ERROR 20: Out of bounds at \"0\"\n"
        );
        assert_eq!(eval("count 5"), "ERROR 8: Invalid argument at \"5\"\n");
        assert_eq!(eval("num \"1x\""), "ERROR 12: Cannot convert at \"\"1x\"\"\n");
        assert_eq!(
            eval("asin 2"),
            "ERROR 21: Value out of range at \"2\"\n"
        );
        assert_eq!(eval("eval 1"), "ERROR 18: Cannot EVALuate at \"1\"\n");
    }

    #[test]
    fn numbers() {
        assert_eq!(eval("int 3.7"), "3\n");
        assert_eq!(eval("round 3.5"), "4\n");
        assert_eq!(eval("sgn 0 - 2"), "-1\n");
        assert_eq!(eval("sqrt 16"), "4\n");
        assert_eq!(eval("round 10 * sin 30"), "5\n");
        assert_eq!(eval("2 * num \"2.5\""), "5\n");
    }

    #[test]
    fn number_templates() {
        assert_eq!(format_number(12.3, ".#").as_deref(), Some("12.3"));
        assert_eq!(format_number(12.34, "#.###").as_deref(), Some("2.340"));
        assert_eq!(format_number(12.34, "###.").as_deref(), Some("012.340000"));
        assert_eq!(format_number(1.0, "#"), None);
        assert_eq!(format_number(1.0, "#.#.#"), None);
        assert_eq!(format_number(1.0, "x.#"), None);
    }

    #[test]
    fn padding() {
        assert_eq!(eval("lpad \"7\" \"0\" 3"), "007\n");
        assert_eq!(eval("rpad \"abcd\" \"-\" 2"), "abcd\n");
        assert_eq!(
            eval("lpad \"7\" \"0\" 99999999999"),
            "ERROR 21: Value out of range at \"99999999999\"\n"
        );
    }

    #[test]
    fn utc_dates() {
        assert_eq!(format_date(0, "U%Y-%m-%d %H:%M").as_deref(), Some("1970-01-01 00:00"));
        assert_eq!(format_date(0, "U"), None);
    }

    #[test]
    fn turtle_facts_list() {
        assert_eq!(
            eval("tf"),
            "[400 300 0 20 1 105 \"DOWN\" \"VISIBLE\" \"NO_FILL\" \"UNBOUNDED\" \"SOLID\" \"WIN_VISIBLE\"]\n"
        );
    }
}
