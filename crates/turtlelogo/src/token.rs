use std::{cell::Cell, fmt, rc::Rc};

use crate::{commands::Command, line::Line, sysprocs::SysProc, value::num_to_string};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Op {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Not,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl Op {
    /// Binding strength, higher binds tighter. Brackets never reach the stack.
    pub fn priority(self) -> u8 {
        match self {
            Op::LParen | Op::RParen | Op::LBracket | Op::RBracket => 0,
            Op::And | Op::Or | Op::Xor => 1,
            Op::Eq | Op::Ne | Op::Lt | Op::Gt | Op::Le | Op::Ge => 2,
            Op::Add | Op::Sub => 3,
            Op::Mul | Op::Div => 4,
            Op::Mod => 5,
            Op::Pow | Op::Not => 6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Op::LParen => "(",
            Op::RParen => ")",
            Op::LBracket => "[",
            Op::RBracket => "]",
            Op::Not => "NOT",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Xor => "XOR",
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Le => "<=",
            Op::Ge => ">=",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Pow => "^",
        }
    }

    pub fn from_word(word: &str) -> Option<Op> {
        [Op::Not, Op::And, Op::Or, Op::Xor]
            .into_iter()
            .find(|op| op.symbol().eq_ignore_ascii_case(word))
    }
}

impl TryFrom<char> for Op {
    type Error = ();

    fn try_from(value: char) -> Result<Self, Self::Error> {
        Ok(match value {
            '[' => Op::LBracket,
            ']' => Op::RBracket,
            '(' => Op::LParen,
            ')' => Op::RParen,
            '=' => Op::Eq,
            '>' => Op::Gt,
            '<' => Op::Lt,
            '+' => Op::Add,
            '-' => Op::Sub,
            '*' => Op::Mul,
            '/' => Op::Div,
            '%' => Op::Mod,
            '^' => Op::Pow,
            _ => Err(())?,
        })
    }
}

#[derive(Clone, Debug)]
pub enum TokenKind {
    /// A bare word that hasn't been classified yet. Never survives tokenizing.
    Word,
    Num(f64),
    Str,
    Var,
    Op(Op),
    Cmd(Command),
    SysProc(SysProc),
    UserProc,
    List(Rc<Line>),
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text: the string contents, the variable name with its sigil,
    /// or the word as typed.
    pub text: String,
    /// Unary minus folded into this token.
    pub neg: bool,
    /// Column in the source line, starting at 1.
    pub col: usize,
    /// For parentheses, the position of the partner.
    pub(crate) match_pos: usize,
    /// For AND, where the right hand side ends. Filled on first evaluation.
    pub(crate) lazy_jump: Cell<Option<usize>>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Token {
        Token {
            kind,
            text: text.into(),
            neg: false,
            col: 0,
            match_pos: 0,
            lazy_jump: Cell::new(None),
        }
    }

    pub fn num(n: f64) -> Token {
        Token::new(TokenKind::Num(n), num_to_string(n))
    }

    pub fn string(s: impl Into<String>) -> Token {
        Token::new(TokenKind::Str, s)
    }

    pub fn list(line: Rc<Line>) -> Token {
        Token::new(TokenKind::List(line), "")
    }

    /// Text used when an error blames this token.
    pub fn blame(&self) -> String {
        match &self.kind {
            TokenKind::List(line) => format!("[{line}]"),
            _ => self.text.clone(),
        }
    }

    pub fn as_op(&self) -> Option<Op> {
        match self.kind {
            TokenKind::Op(op) => Some(op),
            _ => None,
        }
    }

    pub fn is_op(&self, op: Op) -> bool {
        self.as_op() == Some(op)
    }

    pub fn is_cmd(&self) -> bool {
        matches!(self.kind, TokenKind::Cmd(_))
    }

    /// Variable name as stored: `:x` becomes `x`, `$pi` stays `$pi`.
    pub fn var_name(&self) -> &str {
        self.text.strip_prefix(':').unwrap_or(&self.text)
    }

    pub(crate) fn set_negative(&mut self) {
        match self.kind {
            TokenKind::Num(n) => {
                self.kind = TokenKind::Num(-n);
                self.text = format!("-{}", self.text);
            }
            _ => self.neg = true,
        }
    }

    /// A copy that can be placed at a different position in another line.
    pub(crate) fn relocated(&self) -> Token {
        let mut tok = self.clone();
        tok.match_pos = 0;
        tok.lazy_jump = Cell::new(None);
        tok
    }
}

/// How the token reads back as source. Lists are bracketed, strings quoted,
/// commands and system procedures upper cased.
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.neg {
            f.write_str("-")?;
        }
        match &self.kind {
            TokenKind::Str => {
                f.write_str("\"")?;
                for c in self.text.chars() {
                    match c {
                        '\u{8}' => f.write_str("\\b")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        '\t' => f.write_str("\\t")?,
                        '"' => f.write_str("\\\"")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            TokenKind::List(line) => write!(f, "[{line}]"),
            TokenKind::Op(op) => f.write_str(op.symbol()),
            TokenKind::Cmd(cmd) => f.write_str(cmd.name()),
            TokenKind::SysProc(sp) => f.write_str(sp.name()),
            _ => f.write_str(&self.text),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        if self.neg != other.neg {
            return false;
        }
        match (&self.kind, &other.kind) {
            (TokenKind::Num(a), TokenKind::Num(b)) => a == b,
            (TokenKind::Str, TokenKind::Str)
            | (TokenKind::Var, TokenKind::Var)
            | (TokenKind::Word, TokenKind::Word)
            | (TokenKind::UserProc, TokenKind::UserProc) => self.text == other.text,
            (TokenKind::Op(a), TokenKind::Op(b)) => a == b,
            (TokenKind::Cmd(a), TokenKind::Cmd(b)) => a == b,
            (TokenKind::SysProc(a), TokenKind::SysProc(b)) => a == b,
            (TokenKind::List(a), TokenKind::List(b)) => a.tokens == b.tokens,
            _ => false,
        }
    }
}
