use std::rc::Rc;

use nom::{
    branch::alt,
    bytes::complete::take_till1,
    character::complete::{anychar, char, digit0, multispace0},
    combinator::{all_consuming, map, map_opt, opt, recognize, value},
    sequence::{pair, preceded},
    IResult, InputTake,
};
use nom_locate::position;

use crate::{
    commands::Command,
    error::{ErrorKind, Failure},
    line::{Line, LineMode},
    sysprocs::SysProc,
    token::{Op, Token, TokenKind},
};

pub type Span<'a> = nom_locate::LocatedSpan<&'a str>;

#[derive(Clone, Debug, PartialEq)]
enum Lexeme {
    Str(String),
    Semicolon,
    Op(Op),
    Word(String),
}

const SPACE: &str = " \t\r\n";

fn is_delimiter(c: char) -> bool {
    SPACE.contains(c) || c == '"' || c == ';' || Op::try_from(c).is_ok()
}

fn unescape(c: char) -> Option<char> {
    Some(match c {
        'b' => '\u{8}',
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        '"' => '"',
        _ => None?,
    })
}

/// A double quoted string. Unknown escapes keep their backslash.
fn quoted(input: Span) -> IResult<Span, Lexeme> {
    let (input, _) = char('"')(input)?;
    let mut text = String::new();
    let mut chars = input.fragment().char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                let (rest, _) = input.take_split(i + 1);
                return Ok((rest, Lexeme::Str(text)));
            }
            '\\' => match chars.peek().and_then(|&(_, next)| unescape(next)) {
                Some(esc) => {
                    text.push(esc);
                    chars.next();
                }
                None => text.push('\\'),
            },
            c => text.push(c),
        }
    }
    Err(nom::Err::Failure(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn semicolon(input: Span) -> IResult<Span, Lexeme> {
    value(Lexeme::Semicolon, char(';'))(input)
}

fn op(input: Span) -> IResult<Span, Lexeme> {
    map(map_opt(anychar, |c| Op::try_from(c).ok()), Lexeme::Op)(input)
}

fn word(input: Span) -> IResult<Span, Lexeme> {
    map(take_till1(is_delimiter), |s: Span| {
        Lexeme::Word(s.fragment().to_string())
    })(input)
}

fn lexeme(input: Span) -> IResult<Span, (Span, Lexeme)> {
    preceded(
        multispace0,
        pair(position, alt((quoted, semicolon, op, word))),
    )(input)
}

/// Digits with at most one decimal point.
pub(crate) fn is_number(word: &str) -> bool {
    let number: IResult<&str, &str> =
        all_consuming(recognize(pair(digit0, opt(preceded(char('.'), digit0)))))(word);
    number.is_ok()
}

/// Split a line into raw tokens. Brackets are still separate operator
/// tokens and words are not yet classified.
fn scan(src: &str) -> Result<Vec<Token>, Failure> {
    let last_char = || {
        src.trim_end_matches('\n')
            .chars()
            .last()
            .map(String::from)
            .unwrap_or_default()
    };
    let mut input = Span::new(src);
    let mut tokens: Vec<Token> = Vec::new();
    let mut square = 0;
    let mut round = 0;
    let mut unclosed_quote = false;

    while !input.fragment().chars().all(|c| SPACE.contains(c)) {
        let Ok((rest, (pos, lex))) = lexeme(input) else {
            unclosed_quote = true;
            break;
        };
        input = rest;
        let col = pos.get_utf8_column();
        let tok = match lex {
            Lexeme::Str(s) => Token::string(s),
            Lexeme::Semicolon => Token::new(TokenKind::Word, ";"),
            Lexeme::Word(w) => {
                if let Some((i, c)) = w.char_indices().skip(1).find(|(_, c)| *c == ':' || *c == '$') {
                    return Err(ErrorKind::InvalidChar.at(&w[..i + c.len_utf8()]));
                }
                Token::new(TokenKind::Word, w)
            }
            Lexeme::Op(op) => {
                match op {
                    Op::LBracket => square += 1,
                    Op::LParen => round += 1,
                    Op::RBracket => {
                        square -= 1;
                        if square < 0 {
                            return Err(ErrorKind::UnexpectedBracket.at("]"));
                        }
                    }
                    Op::RParen => {
                        round -= 1;
                        if round < 0 {
                            return Err(ErrorKind::UnexpectedBracket.at(")"));
                        }
                    }
                    _ => {}
                }
                if let Some(prev) = tokens.last_mut() {
                    let merged = match (prev.as_op(), op) {
                        (Some(Op::Lt), Op::Eq) => Some(Op::Le),
                        (Some(Op::Gt), Op::Eq) => Some(Op::Ge),
                        (Some(Op::Lt), Op::Gt) => Some(Op::Ne),
                        _ => None,
                    };
                    if let Some(merged) = merged {
                        prev.kind = TokenKind::Op(merged);
                        prev.text = merged.symbol().to_owned();
                        continue;
                    }
                }
                Token::new(TokenKind::Op(op), op.symbol())
            }
        };
        tokens.push(Token { col, ..tok });
    }

    if square != 0 || round != 0 {
        return Err(ErrorKind::MissingBracket.at(last_char()));
    }
    if unclosed_quote {
        return Err(ErrorKind::MissingQuotes.at(last_char()));
    }
    Ok(tokens)
}

fn classify(tok: &mut Token) -> Result<(), Failure> {
    let text = tok.text.as_str();
    if text.starts_with([':', '$']) {
        if text.len() == 1 {
            return Err(ErrorKind::Syntax.at(text));
        }
        tok.kind = TokenKind::Var;
        return Ok(());
    }
    if is_number(text) {
        let n = text.parse().unwrap_or(0.0);
        *tok = Token {
            col: tok.col,
            ..Token::num(n)
        };
        return Ok(());
    }
    tok.kind = if let Some(op) = Op::from_word(text) {
        TokenKind::Op(op)
    } else if let Some(cmd) = Command::lookup(text) {
        TokenKind::Cmd(cmd)
    } else if let Some(sp) = SysProc::lookup(text) {
        TokenKind::SysProc(sp)
    } else {
        TokenKind::UserProc
    };
    Ok(())
}

/// Fold a unary minus into the token after it.
fn fold_negation(tokens: &mut Vec<Token>) {
    let mut pos = 0;
    while pos + 1 < tokens.len() {
        let prev_allows = match pos.checked_sub(1).map(|p| &tokens[p]) {
            None => true,
            Some(prev) => match &prev.kind {
                TokenKind::Op(op) => *op != Op::RParen,
                TokenKind::Cmd(_) | TokenKind::SysProc(_) | TokenKind::Str | TokenKind::List(_) => true,
                _ => false,
            },
        };
        let next = &tokens[pos + 1];
        let next_allows = next.is_op(Op::LParen)
            || matches!(
                next.kind,
                TokenKind::Num(_) | TokenKind::Var | TokenKind::SysProc(_) | TokenKind::UserProc
            );
        if tokens[pos].is_op(Op::Sub) && prev_allows && next_allows {
            tokens[pos + 1].set_negative();
            tokens.remove(pos);
        } else {
            pos += 1;
        }
    }
}

/// Replace every `[ ... ]` span with a single list token.
fn fold_lists(tokens: Vec<Token>) -> Result<Vec<Token>, Failure> {
    let mut out = Vec::new();
    let mut outer: Vec<(usize, Vec<Token>)> = Vec::new();
    for tok in tokens {
        match tok.as_op() {
            Some(Op::LBracket) => outer.push((tok.col, std::mem::take(&mut out))),
            Some(Op::RBracket) => {
                let (col, enclosing) = outer
                    .pop()
                    .ok_or_else(|| ErrorKind::UnexpectedBracket.at("]"))?;
                let inner = std::mem::replace(&mut out, enclosing);
                let list = Line::from_tokens(LineMode::List, inner)?;
                out.push(Token {
                    col,
                    ..Token::list(Rc::new(list))
                });
            }
            _ => out.push(tok),
        }
    }
    if !outer.is_empty() {
        return Err(ErrorKind::MissingBracket.at("["));
    }
    Ok(out)
}

fn build(mode: LineMode, src: &str) -> Result<Line, Failure> {
    let mut tokens = scan(src)?;
    for tok in &mut tokens {
        if matches!(tok.kind, TokenKind::Word) {
            classify(tok)?;
        }
    }
    fold_negation(&mut tokens);
    Line::from_tokens(mode, fold_lists(tokens)?)
}

/// Tokenize one logical line of program text.
pub fn tokenize(src: &str) -> Result<Line, Failure> {
    build(LineMode::Program, src)
}

/// Tokenize text as the contents of a list.
pub fn tokenize_list(src: &str) -> Result<Line, Failure> {
    build(LineMode::List, src)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<String> {
        tokenize(src)
            .unwrap()
            .tokens
            .iter()
            .map(|t| match &t.kind {
                TokenKind::Num(n) => format!("num {n}"),
                TokenKind::Str => format!("str {}", t.text),
                TokenKind::Var => format!("var {}", t.text),
                TokenKind::Op(op) => format!("op {}{}", if t.neg { "-" } else { "" }, op.symbol()),
                TokenKind::Cmd(c) => format!("cmd {}", c.name()),
                TokenKind::SysProc(s) => format!("sys {}{}", if t.neg { "-" } else { "" }, s.name()),
                TokenKind::UserProc => format!("user {}", t.text),
                TokenKind::List(l) => format!("list [{l}]"),
                TokenKind::Word => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn classifies_words() {
        assert_eq!(
            kinds("pr :x + 1.5 \"hi there\" and sqrt foo $pi"),
            [
                "cmd PR",
                "var :x",
                "op +",
                "num 1.5",
                "str hi there",
                "op AND",
                "sys SQRT",
                "user foo",
                "var $pi"
            ]
        );
    }

    #[test]
    fn merges_comparisons() {
        assert_eq!(kinds("1 <= 2 >= 3 <> 4")[1], "op <=");
        assert_eq!(kinds("1 <= 2 >= 3 <> 4")[3], "op >=");
        assert_eq!(kinds("1 <= 2 >= 3 <> 4")[5], "op <>");
    }

    #[test]
    fn unary_minus() {
        assert_eq!(kinds("pr -5"), ["cmd PR", "num -5"]);
        assert_eq!(kinds("pr 3 -5"), ["cmd PR", "num 3", "op -", "num 5"]);
        assert_eq!(kinds("pr 3 * -sqrt 4")[3], "sys -SQRT");
        assert_eq!(kinds("pr (1) -(2)")[4], "op -");
        assert_eq!(kinds("pr - - 5"), ["cmd PR", "op -", "num -5"]);
    }

    #[test]
    fn nested_lists() {
        assert_eq!(kinds("make \"l\" [1 [2 3] x]")[2], "list [1 [2 3] x]");
    }

    #[test]
    fn escapes() {
        let line = tokenize(r#"pr "a\tb\"c\qd""#).unwrap();
        assert_eq!(line.tokens[1].text, "a\tb\"c\\qd");
    }

    #[test]
    fn semicolon_is_a_comment_command() {
        assert_eq!(kinds("pr 1; note")[..3], ["cmd PR", "num 1", "cmd ;"]);
    }

    #[test]
    fn failures() {
        let fail = |src| {
            let err = tokenize(src).unwrap_err();
            (err.kind, err.token)
        };
        assert_eq!(fail("pr [1 2"), (ErrorKind::MissingBracket, "2".into()));
        assert_eq!(fail("pr 1 ]"), (ErrorKind::UnexpectedBracket, "]".into()));
        assert_eq!(fail("pr \"abc"), (ErrorKind::MissingQuotes, "c".into()));
        assert_eq!(fail("pr ab:c"), (ErrorKind::InvalidChar, "ab:".into()));
        assert_eq!(fail("pr :"), (ErrorKind::Syntax, ":".into()));
    }

    #[test]
    fn blank_lines_have_no_tokens() {
        assert!(tokenize("   ").unwrap().is_empty());
        assert!(tokenize("").unwrap().is_empty());
    }
}
