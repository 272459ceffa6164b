use std::{
    cell::RefCell,
    collections::VecDeque,
    io::{self, BufRead, Write},
    rc::Rc,
};

pub const MAX_HISTORY_LINES: usize = 100;
pub const CONTINUATION_PROMPT: &str = "~ ";

/// Where input lines come from: the terminal, a file, or a script.
pub trait LineSource {
    /// The next physical line without its line ending, or None at the end
    /// of input. An interrupted read fails with `ErrorKind::Interrupted`.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// Read one logical line: physical lines ending in a backslash continue on
/// the next one.
pub fn read_logical_line(src: &mut dyn LineSource, prompt: &str) -> io::Result<Option<String>> {
    let Some(mut line) = src.read_line(prompt)? else {
        return Ok(None);
    };
    while continues(&line) {
        line.pop();
        match src.read_line(CONTINUATION_PROMPT)? {
            Some(more) => line.push_str(&more),
            None => break,
        }
    }
    Ok(Some(line))
}

fn continues(line: &str) -> bool {
    let slashes = line.chars().rev().take_while(|&c| c == '\\').count();
    slashes % 2 == 1
}

/// Lines held in memory.
#[derive(Clone, Debug, Default)]
pub struct ScriptSource {
    lines: VecDeque<String>,
}

impl ScriptSource {
    pub fn new(text: &str) -> ScriptSource {
        ScriptSource {
            lines: text.lines().map(str::to_owned).collect(),
        }
    }
}

impl LineSource for ScriptSource {
    fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

/// Lines from any buffered reader, such as a procedure file.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        ReaderSource { reader }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn read_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(len);
        Ok(Some(line))
    }
}

/// An output sink that can be read back, for capturing console output.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.0.borrow_mut());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Recently entered lines, numbered from 1.
#[derive(Clone, Debug)]
pub struct History {
    lines: VecDeque<String>,
    max: usize,
}

impl History {
    pub fn new(max: usize) -> History {
        History {
            lines: VecDeque::new(),
            max: max.max(1),
        }
    }

    pub fn add(&mut self, line: &str) {
        if self.lines.len() == self.max {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_owned());
    }

    pub fn get(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// The last `n` lines with their numbers.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = (usize, &str)> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, line)| (i + 1, line.as_str()))
    }
}

impl Default for History {
    fn default() -> Self {
        History::new(MAX_HISTORY_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_lines_are_joined() {
        let mut src = ScriptSource::new("pr 1 + \\\n2\npr \"a\\\\\"\n");
        assert_eq!(
            read_logical_line(&mut src, "? ").unwrap().as_deref(),
            Some("pr 1 + 2")
        );
        assert_eq!(
            read_logical_line(&mut src, "? ").unwrap().as_deref(),
            Some("pr \"a\\\\\"")
        );
        assert_eq!(read_logical_line(&mut src, "? ").unwrap(), None);
    }

    #[test]
    fn reader_strips_line_endings() {
        let mut src = ReaderSource::new("TO a\r\nEND\n".as_bytes());
        assert_eq!(src.read_line("").unwrap().as_deref(), Some("TO a"));
        assert_eq!(src.read_line("").unwrap().as_deref(), Some("END"));
        assert_eq!(src.read_line("").unwrap(), None);
    }

    #[test]
    fn history_is_bounded() {
        let mut hist = History::new(2);
        hist.add("a");
        hist.add("b");
        hist.add("c");
        assert_eq!(hist.get(1), Some("b"));
        assert_eq!(hist.get(3), None);
        assert_eq!(hist.get(0), None);
        assert_eq!(hist.recent(1).collect::<Vec<_>>(), [(2, "c")]);
    }
}
