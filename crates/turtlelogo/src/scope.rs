use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::Write,
    rc::Rc,
};

use crate::{
    error::{ErrorKind, Failure},
    procs::Procedure,
    value::Value,
};

/// One active user procedure call.
#[derive(Debug)]
pub struct Frame {
    pub proc: Rc<Procedure>,
    pub vars: HashMap<String, Value>,
    /// The line being executed, for messages.
    pub linenum: u32,
}

impl Frame {
    pub fn new(proc: Rc<Procedure>, vars: HashMap<String, Value>) -> Frame {
        Frame {
            proc,
            vars,
            linenum: 0,
        }
    }
}

/// Variables: the globals, the call stack and the watch list.
#[derive(Debug, Default)]
pub struct Scope {
    globals: BTreeMap<String, Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) watch: BTreeSet<String>,
}

fn watch_line(out: &mut dyn Write, kind: char, name: &str, val: &Value) -> Result<(), Failure> {
    writeln!(out, "{{{kind},{name}={}}}", val.dump(true))
        .map_err(|e| ErrorKind::WriteFail.bare().with_detail(&e))
}

impl Scope {
    pub fn frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn in_proc(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Look in the current frame, then the globals. `name` has no `:`.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .last()
            .and_then(|f| f.vars.get(name))
            .or_else(|| self.globals.get(name))
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.frames.last().and_then(|f| f.vars.get(name))
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn globals(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.globals.iter()
    }

    pub fn is_watched(&self, name: &str) -> bool {
        self.watch.contains(name)
    }

    pub fn set_global(&mut self, name: &str, val: Value, out: &mut dyn Write) -> Result<(), Failure> {
        if self.local(name).is_some() {
            return Err(ErrorKind::DupDeclaration.at(name));
        }
        if self.watch.contains(name) {
            watch_line(out, 'G', name, &val)?;
        }
        self.globals.insert(name.to_owned(), val);
        Ok(())
    }

    pub fn set_local(&mut self, name: &str, val: Value, out: &mut dyn Write) -> Result<(), Failure> {
        if self.globals.contains_key(name) {
            return Err(ErrorKind::DupDeclaration.at(name));
        }
        if self.watch.contains(name) {
            watch_line(out, 'L', name, &val)?;
        }
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| ErrorKind::NotInUserProc.bare())?;
        frame.vars.insert(name.to_owned(), val);
        Ok(())
    }

    /// Check a parameter binding for a call that is about to start.
    pub fn bind_param(
        &self,
        vars: &mut HashMap<String, Value>,
        name: &str,
        val: Value,
        out: &mut dyn Write,
    ) -> Result<(), Failure> {
        if self.globals.contains_key(name) {
            return Err(ErrorKind::DupDeclaration.at(name));
        }
        if self.watch.contains(name) {
            watch_line(out, 'P', name, &val)?;
        }
        vars.insert(name.to_owned(), val);
        Ok(())
    }

    /// Set a read only `$` variable, skipping every check.
    pub fn set_system(&mut self, name: &str, val: impl Into<Value>) {
        self.globals.insert(name.to_owned(), val.into());
    }

    pub fn erase_global(&mut self, name: &str) -> Option<Value> {
        self.globals.remove(name)
    }

    /// Remove every global, system variables included.
    pub fn clear_globals(&mut self) {
        self.globals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc() -> Rc<Procedure> {
        Rc::new(Procedure::new("p".into(), vec![]))
    }

    #[test]
    fn locals_shadow_nothing() {
        let mut out = Vec::new();
        let mut scope = Scope::default();
        scope.set_global("x", Value::Num(1.0), &mut out).unwrap();
        scope.frames.push(Frame::new(proc(), HashMap::new()));

        assert_eq!(scope.lookup("x"), Some(&Value::Num(1.0)));
        let err = scope.set_local("x", Value::Num(2.0), &mut out).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DupDeclaration);

        scope.set_local("y", Value::Num(2.0), &mut out).unwrap();
        let err = scope.set_global("y", Value::Num(3.0), &mut out).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DupDeclaration);

        scope.frames.pop();
        assert_eq!(scope.lookup("y"), None);
    }

    #[test]
    fn watched_writes_are_reported() {
        let mut out = Vec::new();
        let mut scope = Scope::default();
        scope.watch.insert("s".into());
        scope.set_global("s", "hi".into(), &mut out).unwrap();
        scope.set_global("t", "no".into(), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{G,s=\"hi\"}\n");
    }
}
