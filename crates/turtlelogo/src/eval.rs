use std::rc::Rc;

use crate::{
    commands::arg_text,
    error::{ErrorKind, Failure},
    flow::{cont, flow, Flow},
    line::{Line, LineMode},
    session::Session,
    token::{Op, Token, TokenKind},
    value::Value,
};

/// Operator precedence reduction on the two evaluation stacks.
struct Stacks {
    vals: Vec<Value>,
    ops: Vec<Op>,
    /// Values below this index were left behind by a true AND and are not
    /// operands of anything that follows.
    floor: usize,
}

impl Stacks {
    fn reduce_one(&mut self, op: Op) -> Result<(), Failure> {
        let rhs = self.vals.pop().ok_or_else(|| ErrorKind::MissingArg.bare())?;
        if self.vals.len() <= self.floor {
            return Err(ErrorKind::MissingArg.bare());
        }
        let lhs = self.vals.pop().ok_or_else(|| ErrorKind::MissingArg.bare())?;
        let val = lhs
            .binary(op, &rhs)
            .map_err(|e| e.fill_token(|| op.symbol().to_owned()))?;
        self.vals.push(val);
        Ok(())
    }

    fn reduce_all(&mut self) -> Result<(), Failure> {
        while let Some(op) = self.ops.pop() {
            self.reduce_one(op)?;
        }
        Ok(())
    }

    /// Reduce everything that binds at least as tightly as `op`.
    fn reduce_for(&mut self, op: Op) -> Result<(), Failure> {
        while let Some(&top) = self.ops.last() {
            if op.priority() > top.priority() {
                break;
            }
            self.ops.pop();
            self.reduce_one(top)?;
        }
        Ok(())
    }
}

/// Apply a call site's unary minus and pending NOTs to a result.
fn adjust(val: Value, tok: &Token, invert: u32) -> Result<Value, Failure> {
    let val = if tok.neg { val.negate()? } else { val };
    val.invert(invert).map_err(|e| e.fill_token(|| tok.blame()))
}

impl Session {
    /// Evaluate the expression starting at `start`. Returns its value and
    /// the position of the first token after it.
    pub(crate) fn eval_expr(&mut self, line: &Line, start: usize) -> Flow<(Value, usize)> {
        let tokens = &line.tokens;
        let mut stacks = Stacks {
            vals: Vec::new(),
            ops: Vec::new(),
            floor: 0,
        };
        let mut expect_val = true;
        let mut invert = 0;
        let mut pos = start;

        while let Some(tok) = tokens.get(pos) {
            let blame = |e: Failure| e.fill_token(|| tok.blame());
            match &tok.kind {
                TokenKind::Num(_) | TokenKind::Str | TokenKind::Var | TokenKind::List(_) => {
                    if !expect_val {
                        break;
                    }
                    let val = match tok.kind {
                        TokenKind::Var => {
                            let val = self.var_value(&tok.text)?;
                            if tok.neg {
                                val.negate().map_err(blame)?
                            } else {
                                val
                            }
                        }
                        _ => Value::from(tok),
                    };
                    stacks.vals.push(val.invert(invert).map_err(blame)?);
                    invert = 0;
                    expect_val = false;
                    pos += 1;
                }
                TokenKind::Cmd(_) => break,
                TokenKind::Word => return Err(ErrorKind::Syntax.at(&tok.text)),
                TokenKind::SysProc(sp) => {
                    if !expect_val {
                        break;
                    }
                    if sp.arity() > 0 && pos + 1 == tokens.len() {
                        return Err(ErrorKind::MissingArg.at(tok.to_string()));
                    }
                    self.trace(line, 'S', sp.name())?;
                    let (val, next) = flow!(self.call_sysproc(*sp, line, pos).map_err(blame));
                    stacks.vals.push(adjust(val, tok, invert).map_err(blame)?);
                    invert = 0;
                    expect_val = false;
                    pos = next;
                }
                TokenKind::UserProc => {
                    if !expect_val {
                        break;
                    }
                    self.trace(line, 'U', &tok.text)?;
                    let (val, next) = flow!(self.call_user_proc(line, pos));
                    stacks.vals.push(adjust(val, tok, invert).map_err(blame)?);
                    invert = 0;
                    expect_val = false;
                    pos = next;
                }
                TokenKind::Op(Op::Not) => {
                    if pos != start && !expect_val {
                        return Err(ErrorKind::UnexpectedOp.at("NOT"));
                    }
                    invert += 1;
                    expect_val = true;
                    pos += 1;
                }
                TokenKind::Op(Op::LParen) => {
                    if !expect_val {
                        break;
                    }
                    let (val, inner_end) = flow!(self.eval_expr(line, pos + 1));
                    if inner_end != tok.match_pos {
                        return Err(ErrorKind::Syntax.at(arg_text(line, inner_end)));
                    }
                    stacks.vals.push(adjust(val, tok, invert).map_err(blame)?);
                    invert = 0;
                    expect_val = false;
                    pos = tok.match_pos + 1;
                }
                TokenKind::Op(Op::RParen) => {
                    if expect_val {
                        return Err(ErrorKind::Syntax.at(tok.to_string()));
                    }
                    break;
                }
                TokenKind::Op(Op::And) => {
                    if expect_val {
                        return Err(ErrorKind::Syntax.at(tok.to_string()));
                    }
                    stacks.reduce_all()?;
                    let lhs_set = stacks.vals.last().map_or(false, Value::is_set);
                    if lhs_set {
                        stacks.floor = stacks.vals.len();
                        expect_val = true;
                        pos += 1;
                    } else {
                        pos = self.and_rhs_end(line, pos);
                    }
                }
                TokenKind::Op(op) => {
                    if expect_val {
                        return Err(ErrorKind::Syntax.at(tok.to_string()));
                    }
                    stacks.reduce_for(*op)?;
                    stacks.ops.push(*op);
                    expect_val = true;
                    pos += 1;
                }
            }
        }

        let last = || {
            pos.checked_sub(1)
                .and_then(|p| tokens.get(p))
                .map_or_else(String::new, Token::blame)
        };
        if invert > 0 {
            return Err(ErrorKind::UnexpectedOp.at(last()));
        }
        if stacks.vals.is_empty() {
            let blame = tokens.get(start).map_or_else(String::new, Token::blame);
            return Err(ErrorKind::Syntax.at(blame));
        }
        stacks.reduce_all().map_err(|e| e.fill_token(last))?;
        let val = stacks.vals.pop().unwrap_or_default();
        cont((val, pos))
    }

    /// Where the right hand side of the AND at `and_pos` ends: the next OR
    /// or XOR at the same bracket depth, or the end of the expression.
    fn and_rhs_end(&self, line: &Line, and_pos: usize) -> usize {
        let and = &line.tokens[and_pos];
        if let Some(end) = and.lazy_jump.get() {
            return end;
        }

        let mut depth = 0;
        let mut expect_val = true;
        // Extra arguments still owed to procedures at depth zero.
        let mut owed = 0;
        let mut pos = and_pos + 1;
        while let Some(tok) = line.tokens.get(pos) {
            let arity = match &tok.kind {
                TokenKind::Cmd(_) => break,
                TokenKind::SysProc(sp) => Some(sp.arity()),
                TokenKind::UserProc => Some(self.procs.get(&tok.text).map_or(0, |p| p.params.len())),
                TokenKind::Op(Op::Or | Op::Xor) if depth < 1 => break,
                TokenKind::Op(Op::RParen) => {
                    depth -= 1;
                    if depth < 0 {
                        break;
                    }
                    expect_val = false;
                    pos += 1;
                    continue;
                }
                TokenKind::Op(Op::LParen) => Some(0),
                TokenKind::Op(_) => {
                    expect_val = true;
                    pos += 1;
                    continue;
                }
                _ => Some(0),
            };
            if depth < 1 && !expect_val {
                if owed == 0 {
                    break;
                }
                owed -= 1;
            }
            match (tok.as_op(), arity) {
                (Some(Op::LParen), _) => {
                    depth += 1;
                    expect_val = true;
                }
                (_, Some(n)) if n > 0 => {
                    if depth < 1 {
                        owed += n - 1;
                    }
                    expect_val = true;
                }
                _ => expect_val = false,
            }
            pos += 1;
        }
        and.lazy_jump.set(Some(pos));
        pos
    }

    /// Evaluate every expression in a list, keeping commands and
    /// recursing into sublists.
    pub(crate) fn eval_list(&mut self, list: &Line) -> Flow<Line> {
        let _guard = self.nest()?;
        let mut out = Vec::new();
        let mut pos = 0;
        while let Some(tok) = list.tokens.get(pos) {
            match &tok.kind {
                TokenKind::Cmd(_) => {
                    out.push(tok.clone());
                    pos += 1;
                }
                TokenKind::List(sub) => {
                    let sub = Rc::clone(sub);
                    let evaluated = flow!(self.eval_list(&sub));
                    out.push(Token::list(Rc::new(evaluated)));
                    pos += 1;
                }
                _ => {
                    let (val, next) = flow!(self.eval_expr(list, pos));
                    out.push(Token::from(&val));
                    pos = next.max(pos + 1);
                }
            }
        }
        cont(Line::from_tokens(LineMode::List, out)?)
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;

    use super::*;
    use crate::{config::Config, io::SharedBuffer, lexer::tokenize};

    fn session() -> Session {
        Session::new(Config::default()).with_output(Box::new(SharedBuffer::default()))
    }

    fn eval(s: &mut Session, src: &str) -> Result<Value, Failure> {
        let line = tokenize(src)?;
        match s.eval_expr(&line, 0)? {
            ControlFlow::Continue((val, _)) => Ok(val),
            ControlFlow::Break(sig) => panic!("unexpected {sig:?}"),
        }
    }

    #[test]
    fn precedence() {
        let mut s = session();
        assert_eq!(eval(&mut s, "2 + 3 * 4").unwrap(), Value::Num(14.0));
        assert_eq!(eval(&mut s, "(2 + 3) * 4").unwrap(), Value::Num(20.0));
        assert_eq!(eval(&mut s, "10 - 2 - 3").unwrap(), Value::Num(5.0));
        assert_eq!(eval(&mut s, "2 * 3 + 4 * 5").unwrap(), Value::Num(26.0));
        assert_eq!(eval(&mut s, "1 + 2 = 3").unwrap(), Value::Num(1.0));
        assert_eq!(eval(&mut s, "-(2 + 3)").unwrap(), Value::Num(-5.0));
    }

    #[test]
    fn parens_hold_one_expression() {
        let mut s = session();
        let err = eval(&mut s, "(1 2) + 3").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.token, "2");
        let err = eval(&mut s, "(1 PR 2)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.token, "PR");
        assert_eq!(eval(&mut s, "((1 + 2) * (3))").unwrap(), Value::Num(9.0));
    }

    #[test]
    fn and_short_circuits() {
        let mut s = session();
        assert_eq!(eval(&mut s, "0 AND 1 / 0").unwrap(), Value::Num(0.0));
        assert_eq!(eval(&mut s, "0 AND :nope OR 1").unwrap(), Value::Num(1.0));
        assert_eq!(eval(&mut s, "(0 AND :nope) + 1").unwrap(), Value::Num(1.0));
        assert_eq!(eval(&mut s, "1 AND 0 OR 1").unwrap(), Value::Num(1.0));
        assert_eq!(eval(&mut s, "0 AND COUNT \"abc\" OR 0").unwrap(), Value::Num(0.0));
        let err = eval(&mut s, "1 AND 1 / 0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivideByZero);
    }

    #[test]
    fn and_skip_is_remembered() {
        let mut s = session();
        let line = tokenize("0 AND 5 OR 2").unwrap();
        let _ = s.eval_expr(&line, 0).unwrap();
        assert_eq!(line.tokens[1].lazy_jump.get(), Some(3));
    }

    #[test]
    fn not_inverts() {
        let mut s = session();
        assert_eq!(eval(&mut s, "NOT NOT 1").unwrap(), Value::Num(1.0));
        assert_eq!(eval(&mut s, "NOT 0").unwrap(), Value::Num(1.0));
        assert_eq!(eval(&mut s, "NOT (1 = 2)").unwrap(), Value::Num(1.0));
        let err = eval(&mut s, "1 NOT 1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedOp);
        let err = eval(&mut s, "NOT \"a\"").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CantInvert);
    }

    #[test]
    fn malformed_expressions() {
        let mut s = session();
        assert_eq!(eval(&mut s, "- - 5").unwrap_err().kind, ErrorKind::Syntax);
        assert_eq!(eval(&mut s, "1 + * 2").unwrap_err().kind, ErrorKind::Syntax);
        assert_eq!(eval(&mut s, "1 +").unwrap_err().kind, ErrorKind::MissingArg);
        assert_eq!(eval(&mut s, "NOT").unwrap_err().kind, ErrorKind::UnexpectedOp);
        assert_eq!(eval(&mut s, "COUNT").unwrap_err().kind, ErrorKind::MissingArg);
        let err = eval(&mut s, ":x + 1").unwrap_err();
        assert_eq!((err.kind, err.token.as_str()), (ErrorKind::UndefinedVar, ":x"));
    }

    #[test]
    fn stops_at_the_next_value() {
        let mut s = session();
        let line = tokenize("1 + 2 3").unwrap();
        let ControlFlow::Continue((val, next)) = s.eval_expr(&line, 0).unwrap() else {
            panic!()
        };
        assert_eq!((val, next), (Value::Num(3.0), 3));
    }

    #[test]
    fn lists_evaluate_element_wise() {
        let mut s = session();
        let val = eval(&mut s, "EVAL [1 + 2 [3 * 3] \"a\"]").unwrap();
        assert_eq!(val.dump(false), "[3 [9] \"a\"]");
    }
}
