use std::{collections::HashMap, fmt, rc::Rc};

use crate::{
    commands::Command,
    error::{ErrorKind, Failure},
    token::{Op, Token, TokenKind},
    value::Value,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineMode {
    /// A line typed at the prompt or stored in a procedure.
    Program,
    /// The payload of a `[...]` list.
    List,
}

/// A tokenized line. Brackets are already folded into `List` tokens and
/// parentheses know their partners.
#[derive(Clone, Debug)]
pub struct Line {
    pub mode: LineMode,
    /// Number inside the owning procedure, 0 outside one.
    pub linenum: u32,
    pub tokens: Vec<Token>,
    labels: HashMap<String, usize>,
}

impl Line {
    pub fn empty_list() -> Line {
        Line {
            mode: LineMode::List,
            linenum: 0,
            tokens: Vec::new(),
            labels: HashMap::new(),
        }
    }

    /// Build a line from already classified tokens, recomputing everything
    /// that depends on token positions.
    pub fn from_tokens(mode: LineMode, tokens: Vec<Token>) -> Result<Line, Failure> {
        let mut line = Line {
            mode,
            linenum: 0,
            tokens: tokens.iter().map(Token::relocated).collect(),
            labels: HashMap::new(),
        };
        line.match_parens()?;
        line.set_labels()?;
        Ok(line)
    }

    fn match_parens(&mut self) -> Result<(), Failure> {
        let mut open = Vec::new();
        for pos in 0..self.tokens.len() {
            match self.tokens[pos].as_op() {
                Some(Op::LParen) => open.push(pos),
                Some(Op::RParen) => {
                    let start = open
                        .pop()
                        .ok_or_else(|| ErrorKind::UnexpectedBracket.at(")"))?;
                    self.tokens[pos].match_pos = start;
                    self.tokens[start].match_pos = pos;
                }
                _ => {}
            }
        }
        if open.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::MissingBracket.at("("))
        }
    }

    fn set_labels(&mut self) -> Result<(), Failure> {
        for pos in 0..self.tokens.len() {
            match self.tokens[pos].kind {
                TokenKind::Cmd(Command::Label) => {
                    let Some(name) = self.tokens.get(pos + 1).filter(|t| !t.is_cmd()) else {
                        return Err(ErrorKind::MissingArg.at("LABEL"));
                    };
                    if !matches!(name.kind, TokenKind::Str) || name.text.is_empty() {
                        return Err(ErrorKind::InvalidArg.at(name.blame()));
                    }
                    let name = name.text.clone();
                    self.add_label(name, pos)?;
                }
                TokenKind::Cmd(Command::DLabel) => self.add_label(String::new(), pos)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn add_label(&mut self, name: String, pos: usize) -> Result<(), Failure> {
        if self.labels.contains_key(&name) {
            let blame = if name.is_empty() { "DLABEL".to_owned() } else { name };
            return Err(ErrorKind::DupDeclaration.at(blame));
        }
        self.labels.insert(name, pos);
        Ok(())
    }

    /// Labels declared on this line, not counting those inside lists.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    /// Where execution resumes for a jump to `name`. Falls back to the
    /// default label.
    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels
            .get(name)
            .or_else(|| self.labels.get(""))
            .copied()
    }

    /// True if an expression can't start at `pos`.
    pub fn is_expr_end(&self, pos: usize) -> bool {
        self.tokens.get(pos).map_or(true, Token::is_cmd)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Element-wise equality on values, which is what `=` means for lists.
    pub fn list_eq(&self, other: &Line) -> bool {
        self.tokens.len() == other.tokens.len()
            && self
                .tokens
                .iter()
                .zip(&other.tokens)
                .all(|(a, b)| Value::from(a) == Value::from(b))
    }

    pub(crate) fn list_of(tokens: Vec<Token>) -> Line {
        // Pieces of balanced lists stay balanced unless cut inside
        // parentheses; fall back to a plain copy then.
        Line::from_tokens(LineMode::List, tokens.clone()).unwrap_or(Line {
            mode: LineMode::List,
            linenum: 0,
            tokens,
            labels: HashMap::new(),
        })
    }

    pub fn concat(&self, other: &Line) -> Line {
        Line::list_of(self.tokens.iter().chain(&other.tokens).cloned().collect())
    }

    pub fn repeat(&self, count: usize) -> Line {
        let len = self.tokens.len().saturating_mul(count);
        Line::list_of(self.tokens.iter().cycle().take(len).cloned().collect())
    }

    /// Elements `from..=to`, counting from 1. Out of range positions are
    /// clipped.
    pub fn slice(&self, from: usize, to: usize) -> Line {
        let len = self.tokens.len();
        let start = from.saturating_sub(1).min(len);
        let end = to.min(len).max(start);
        Line::list_of(self.tokens[start..end].to_vec())
    }

    pub fn with_first(&self, val: &Value) -> Line {
        let mut tokens = vec![Token::from(val)];
        tokens.extend(self.tokens.iter().cloned());
        Line::list_of(tokens)
    }

    pub fn with_last(&self, val: &Value) -> Line {
        let mut tokens = self.tokens.clone();
        tokens.push(Token::from(val));
        Line::list_of(tokens)
    }

    /// Element `index`, counting from 1. Out of range gives 0.
    pub fn element(&self, index: usize) -> Value {
        match index.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(tok) => Value::from(tok),
            None => Value::Num(0.0),
        }
    }

    /// Position of the first element equal to `val`, counting from 1.
    pub fn position_of(&self, val: &Value) -> Option<usize> {
        self.tokens
            .iter()
            .position(|tok| {
                let elem = Value::from(tok);
                elem.type_name() == val.type_name() && elem == *val
            })
            .map(|i| i + 1)
    }

    /// How much a listing indents after this line for the given command:
    /// +1 per label, -1 per GO. Lines mixing commands don't indent.
    pub fn indent_count(&self, cmd: Command) -> i32 {
        let step = if cmd == Command::Go { -1 } else { 1 };
        let mut indent = 0;
        for tok in &self.tokens {
            match &tok.kind {
                TokenKind::Cmd(c) if *c != cmd => return 0,
                TokenKind::Cmd(_) => indent += step,
                TokenKind::List(l) => indent += l.indent_count(cmd),
                _ => {}
            }
        }
        indent
    }

    /// Words separated by single spaces, with no quoting.
    pub fn to_simple_string(&self) -> String {
        self.tokens
            .iter()
            .map(|tok| match &tok.kind {
                TokenKind::List(l) => l.to_simple_string(),
                _ => tok.text.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<&Value> for Token {
    fn from(val: &Value) -> Token {
        match val {
            Value::Num(n) => Token::num(*n),
            Value::Str(s) => Token::string(s.clone()),
            Value::List(l) => Token::list(Rc::clone(l)),
            Value::Undefined => Token::string(""),
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for tok in &self.tokens {
            match tok.as_op() {
                Some(Op::LParen) => out += &tok.to_string(),
                Some(Op::RParen) => {
                    if out.ends_with(' ') {
                        out.pop();
                    }
                    out += &tok.to_string();
                    out.push(' ');
                }
                _ => {
                    out += &tok.to_string();
                    out.push(' ');
                }
            }
        }
        f.write_str(out.trim_end_matches(' '))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{tokenize, tokenize_list};

    #[test]
    fn render_round_trip() {
        for src in [
            "PR 1 + 2",
            "MAKE \"x\" [1 [2 3] \"a b\"]",
            "PR -(2 * :y) + -SQRT 4",
            "IF :n < 1 [OP 1] OP :n * fact :n - 1",
            "PR \"tab\\there\" ; trailing words",
            "LABEL \"top\" PR (1 + (2)) GO \"top\"",
        ] {
            let line = tokenize(src).unwrap();
            let again = tokenize(&line.to_string()).unwrap();
            assert_eq!(line.tokens, again.tokens, "{src}");
        }
    }

    #[test]
    fn parens_hug_their_contents() {
        let line = tokenize("pr ( 1 + ( 2 * 3 ) )").unwrap();
        assert_eq!(line.to_string(), "PR (1 + (2 * 3))");
    }

    #[test]
    fn labels() {
        let line = tokenize("LABEL \"a\" PR 1 DLABEL PR 2").unwrap();
        assert_eq!(line.label_index("a"), Some(0));
        assert_eq!(line.label_index("zzz"), Some(4));

        let line = tokenize("LABEL \"a\" PR 1").unwrap();
        assert_eq!(line.label_index("b"), None);

        let err = tokenize("LABEL \"a\" LABEL \"a\"").unwrap_err();
        assert_eq!(err.kind, ErrorKind::DupDeclaration);
        let err = tokenize("LABEL").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingArg);
        let err = tokenize("LABEL 3").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArg);
    }

    #[test]
    fn list_helpers() {
        let l = tokenize_list("a 2 [3 4] \"x y\"").unwrap();
        assert_eq!(l.element(2), Value::Num(2.0));
        assert_eq!(l.element(9), Value::Num(0.0));
        assert_eq!(l.slice(2, 3).to_string(), "2 [3 4]");
        assert_eq!(l.slice(4, 10).to_string(), "\"x y\"");
        assert!(l.slice(7, 8).is_empty());
        assert_eq!(l.position_of(&Value::from("x y")), Some(4));
        assert_eq!(l.position_of(&Value::from("2")), None);
        assert_eq!(l.with_first(&Value::Num(0.0)).element(1), Value::Num(0.0));
        assert_eq!(l.with_last(&Value::Num(5.0)).len(), 5);
        assert_eq!(l.to_simple_string(), "a 2 3 4 x y");
    }
}
