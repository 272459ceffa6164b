use std::ops::ControlFlow;

use crate::{error::Failure, value::Value};

/// Non-local exits. These are not errors: they unwind execution until
/// something that owns them catches them.
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    /// The interrupt flag was observed.
    Break,
    /// Leave the current loop body, or everything if no loop catches it.
    Stop,
    /// Jump to a label. The empty name is the default label.
    Goto(String),
    /// Leave the current user procedure, maybe with a value.
    Return(Option<Value>),
    /// Throw away all state and start again.
    Restart,
    /// Leave the interpreter.
    Bye,
}

/// Outcome of anything that executes code: a failure, a signal, or a value.
pub type Flow<T> = Result<ControlFlow<Signal, T>, Failure>;

pub fn cont<T>(val: T) -> Flow<T> {
    Ok(ControlFlow::Continue(val))
}

pub fn raise<T>(sig: Signal) -> Flow<T> {
    Ok(ControlFlow::Break(sig))
}

/// Like `?`, but for [`Flow`]: failures and signals both return early.
macro_rules! flow {
    ($e:expr) => {
        match $e? {
            ::std::ops::ControlFlow::Continue(v) => v,
            ::std::ops::ControlFlow::Break(sig) => {
                return Ok(::std::ops::ControlFlow::Break(sig));
            }
        }
    };
}

pub(crate) use flow;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn half(x: i32) -> Flow<i32> {
        if x % 2 != 0 {
            return Err(ErrorKind::InvalidArg.at(x.to_string()));
        }
        if x == 0 {
            return raise(Signal::Stop);
        }
        cont(x / 2)
    }

    fn quarter(x: i32) -> Flow<i32> {
        let h = flow!(half(x));
        half(h)
    }

    #[test]
    fn composes_like_question_mark() {
        assert_eq!(quarter(8), cont(2));
        assert_eq!(quarter(0), raise(Signal::Stop));
        assert_eq!(quarter(6).unwrap_err().kind, ErrorKind::InvalidArg);
    }
}
