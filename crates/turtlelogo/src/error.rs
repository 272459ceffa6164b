use std::fmt;

/// Every user-visible error, numbered the way the interpreter reports them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    #[error("Syntax error")]
    Syntax = 1,
    #[error("Missing quotes")]
    MissingQuotes,
    #[error("Missing bracket")]
    MissingBracket,
    #[error("Unexpected bracket")]
    UnexpectedBracket,
    #[error("Unexpected operator")]
    UnexpectedOp,
    #[error("Divide by zero")]
    DivideByZero,
    #[error("Missing argument(s)")]
    MissingArg,
    #[error("Invalid argument")]
    InvalidArg,
    #[error("Invalid character")]
    InvalidChar,
    #[error("Cannot invert")]
    CantInvert,
    #[error("Cannot negate")]
    CantNegate,
    #[error("Cannot convert")]
    CantConvert,
    #[error("Undefined variable")]
    UndefinedVar,
    #[error("Unwatched variable")]
    UnwatchedVar,
    #[error("Invalid variable name")]
    InvalidVarName,
    #[error("Invalid variable type")]
    InvalidVarType,
    #[error("Read only variable")]
    ReadOnlyVar,
    #[error("Cannot EVALuate")]
    CantEval,
    #[error("Cannot RUN")]
    CantRun,
    #[error("Out of bounds")]
    OutOfBounds,
    #[error("Value out of range")]
    ValueOutOfRange,
    #[error("IF requires a list block to execute")]
    IfRequiresList,
    #[error("IF missing exec list block")]
    IfMissingBlock,
    #[error("Duplicate declaration")]
    DupDeclaration,
    #[error("Unexpected TO")]
    UnexpectedTo,
    #[error("Unexpected END")]
    UnexpectedEnd,
    #[error("Unexpected ED")]
    UnexpectedEd,
    #[error("Unexpected ER or ERALL")]
    UnexpectedErase,
    #[error("Unexpected argument")]
    UnexpectedArg,
    #[error("Undefined user procedure")]
    UndefinedUserProc,
    #[error("Not in a user procedure")]
    NotInUserProc,
    #[error("Max nesting depth exceeded")]
    MaxNestDepth,
    #[error("Undefined label")]
    UndefinedLabel,
    #[error("Turtle graphics are not available")]
    NoGraphics,
    #[error("Turtle graphics initialisation failed")]
    GraphicsInitFail,
    #[error("Invalid colour")]
    InvalidColour,
    #[error("Open failed")]
    OpenFail,
    #[error("Read failed")]
    ReadFail,
    #[error("Write failed")]
    WriteFail,
    #[error("Stat failed")]
    StatFail,
    #[error("Change directory failed")]
    CdFail,
    #[error("Invalid history command number")]
    InvalidHistCmd,
    #[error("Turtle out of bounds")]
    TurtleOutOfBounds,
    #[error("Cannot FILL when turtle is wrapped")]
    CantFill,
    #[error("Cannot RESTART while doing initial load")]
    CantRestart,
    #[error("Invalid format")]
    InvalidFmt,
    #[error("Invalid path/filename or path not found")]
    InvalidPath,
    #[error("Path or filename too long")]
    PathTooLong,
}

impl ErrorKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Build a failure that blames `token`.
    pub fn at(self, token: impl Into<String>) -> Failure {
        Failure {
            kind: self,
            token: token.into(),
            location: None,
            detail: None,
        }
    }

    /// A failure whose token gets filled in by whoever catches it.
    pub fn bare(self) -> Failure {
        self.at("")
    }
}

/// Where a failure happened inside a user procedure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    pub proc: String,
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub token: String,
    pub location: Option<Location>,
    /// Operating system error text, for the file related kinds.
    pub detail: Option<String>,
}

impl Failure {
    pub fn with_detail(mut self, err: &std::io::Error) -> Self {
        self.detail = Some(err.to_string());
        self
    }

    pub(crate) fn fill_token(mut self, token: impl FnOnce() -> String) -> Self {
        if self.token.is_empty() {
            self.token = token();
        }
        self
    }

    pub(crate) fn within(mut self, proc: &str, line: u32) -> Self {
        if self.location.is_none() {
            self.location = Some(Location {
                proc: proc.to_owned(),
                line,
            });
        }
        self
    }
}

impl From<ErrorKind> for Failure {
    fn from(kind: ErrorKind) -> Self {
        kind.bare()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ERROR {}: {} at \"{}\"",
            self.kind.code(),
            self.kind,
            self.token
        )?;
        if let Some(loc) = &self.location {
            write!(f, " in procedure \"{}\" on line {}", loc.proc, loc.line)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_declaration_order() {
        assert_eq!(ErrorKind::Syntax.code(), 1);
        assert_eq!(ErrorKind::DivideByZero.code(), 6);
        assert_eq!(ErrorKind::DupDeclaration.code(), 24);
        assert_eq!(ErrorKind::MaxNestDepth.code(), 32);
        assert_eq!(ErrorKind::PathTooLong.code(), 48);
    }

    #[test]
    fn message_format() {
        let f = ErrorKind::UndefinedVar.at(":x");
        assert_eq!(f.to_string(), "ERROR 13: Undefined variable at \":x\"");

        let f = ErrorKind::DivideByZero.at("/").within("sq", 20);
        assert_eq!(
            f.to_string(),
            "ERROR 6: Divide by zero at \"/\" in procedure \"sq\" on line 20"
        );
    }
}
