use std::{
    fs::File,
    io::{BufReader, Write},
};

use crate::{
    error::{ErrorKind, Failure},
    flow::{cont, flow, raise, Flow},
    io::{read_logical_line, LineSource, ReaderSource},
    path::{load_path, save_path},
    procs::Mode,
    session::Session,
};

impl Session {
    /// Run a procedure file line by line, as if typed. With a filter only
    /// the procedure of that name is defined. Loading stops at the first
    /// line that fails.
    pub(crate) fn load_procs(&mut self, name: &str, filter: Option<String>) -> Flow<()> {
        let path = load_path(&*self.paths, name).map_err(|k| k.at(name))?;
        self.println(format_args!("Loading file \"{}\"...", path.display()))?;
        let file = File::open(&path).map_err(|e| {
            ErrorKind::OpenFail
                .at(path.display().to_string())
                .with_detail(&e)
        })?;

        let before = self.procs.len();
        self.procs.load_filter = filter.filter(|f| !f.is_empty());
        let res = self.load_lines(&mut ReaderSource::new(BufReader::new(file)));
        self.procs.load_filter = None;
        if self.procs.mode != Mode::Command {
            log::warn!("{} ends inside a definition", path.display());
            self.procs.abandon();
        }

        if flow!(res) {
            let loaded = self.procs.len().saturating_sub(before);
            self.println(format_args!("Loaded {loaded} procedure(s)."))?;
        }
        cont(())
    }

    /// Returns false if a line failed. The failure has been reported.
    fn load_lines(&mut self, src: &mut dyn LineSource) -> Flow<bool> {
        loop {
            let line = match read_logical_line(src, "") {
                Ok(Some(line)) => line,
                Ok(None) => return cont(true),
                Err(e) => return Err(ErrorKind::ReadFail.bare().with_detail(&e)),
            };
            let res = self.run_line(&line);
            match self.report(res) {
                Ok(true) => {}
                Ok(false) => return cont(false),
                Err(sig) => return raise(sig),
            }
        }
    }

    /// Write every procedure, or just `only`, to a file. Returns how many
    /// were written.
    pub(crate) fn save_procs(&mut self, name: &str, only: Option<&str>) -> Result<usize, Failure> {
        let path = save_path(&*self.paths, name).map_err(|k| k.at(name))?;
        self.println(format_args!("Saving to file \"{}\"...", path.display()))?;

        let mut text = String::new();
        let mut count = 0;
        for proc in self
            .procs
            .iter()
            .filter(|p| only.map_or(true, |n| p.name == n))
        {
            text += &proc.dump(true, false, false);
            text.push('\n');
            count += 1;
        }

        let display = path.display().to_string();
        let mut file =
            File::create(&path).map_err(|e| ErrorKind::OpenFail.at(&display).with_detail(&e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| ErrorKind::WriteFail.at(&display).with_detail(&e))?;
        log::info!("saved {count} procedures to {display}");
        self.println(format_args!("Saved {count} procedures."))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{config::Config, io::SharedBuffer, session::Session};

    fn session() -> (Session, SharedBuffer) {
        let out = SharedBuffer::default();
        let s = Session::new(Config::default()).with_output(Box::new(out.clone()));
        (s, out)
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shapes").to_string_lossy().into_owned();
        let saved = dir.path().join("shapes.lg");

        let (mut s, out) = session();
        for line in ["to sq :n", "op :n * :n", "end", "to cube :n op :n * sq :n end"] {
            s.execute(line);
        }
        out.take();
        s.execute(&format!("save \"{file}\""));
        assert_eq!(
            out.take(),
            format!("Saving to file \"{}\"...\nSaved 2 procedures.\n", saved.display())
        );
        let text = fs::read_to_string(&saved).unwrap();
        assert!(text.contains("TO sq :n \n\tOP :n * :n\nEND\n"));

        let (mut s, out) = session();
        s.execute(&format!("load \"{file}\""));
        assert_eq!(
            out.take(),
            format!(
                "Loading file \"{}\"...\nProcedure \"cube\" defined.\nProcedure \"sq\" defined.\nLoaded 2 procedure(s).\n",
                saved.display()
            )
        );
        s.execute("pr cube 3");
        assert_eq!(out.take(), "27\n");
    }

    #[test]
    fn load_one_procedure() {
        let dir = tempfile::tempdir().unwrap();
        let saved = dir.path().join("two.lg");
        fs::write(&saved, "TO a\nPR 1\nEND\nTO b\nPR 2\nEND\n").unwrap();

        let (mut s, out) = session();
        s.execute(&format!("load \"{}\" \"b\"", saved.display()));
        assert_eq!(
            out.take(),
            format!(
                "Loading file \"{}\"...\nProcedure \"b\" defined.\nLoaded 1 procedure(s).\n",
                saved.display()
            )
        );
        assert!(!s.procs().contains("a"));
    }

    #[test]
    fn loading_stops_at_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let saved = dir.path().join("bad.lg");
        fs::write(&saved, "TO a\nEND\nPR 1 / 0\nTO b\nEND\n").unwrap();

        let (mut s, out) = session();
        s.execute(&format!("load \"{}\"", saved.display()));
        assert_eq!(
            out.take(),
            format!(
                "Loading file \"{}\"...\nProcedure \"a\" defined.\nERROR 6: Divide by zero at \"/\"\n",
                saved.display()
            )
        );
        assert!(!s.procs().contains("b"));
    }

    #[test]
    fn save_with_nothing_defined() {
        let (mut s, out) = session();
        s.execute("save \"anything\"");
        assert_eq!(out.take(), "No user procedures to save.\n");
    }
}
