use std::{
    cell::Cell,
    fmt,
    io::{self, Write},
    ops::ControlFlow,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::Config,
    error::{ErrorKind, Failure, Location},
    flow::{Flow, Signal},
    io::{read_logical_line, History, LineSource, ScriptSource},
    path::{FsResolver, PathResolver, FILE_EXTENSION},
    procs::{Mode, ProcStore},
    scope::Scope,
    turtle::{HeadlessTurtle, Renderer, NUM_COLOURS, WIN_DEFAULT_COLOUR},
    value::Value,
};

pub const INTERPRETER: &str = "TURTLELOGO";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COPYRIGHT: &str = "Copyright (C) the turtlelogo authors";
pub const MAX_NEST_DEPTH: usize = 100;
pub const DEGS_PER_RADIAN: f64 = 180.0 / std::f64::consts::PI;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Tracing {
    #[default]
    Off,
    On,
    /// Trace, and wait for a line of input after every step.
    Step,
}

/// Why a session stopped taking input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Everything should be thrown away and the session started again.
    Restart,
    Bye,
}

/// Decrements the nesting depth when dropped.
pub(crate) struct DepthGuard(Rc<Cell<usize>>);

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// One interpreter: variables, procedures, and the collaborators it talks
/// to. Sessions share nothing, so several can run side by side.
pub struct Session {
    pub(crate) scope: Scope,
    pub(crate) procs: ProcStore,
    depth: Rc<Cell<usize>>,
    /// Innermost procedure a stop signal passed through.
    pub(crate) stop_at: Option<Location>,
    pub(crate) tracing: Tracing,
    pub(crate) angle_in_degs: bool,
    pub(crate) indent_labels: bool,
    pub(crate) graphics: bool,
    pub(crate) win_colour: i64,
    pub(crate) rng: StdRng,
    brk: Arc<AtomicBool>,
    pub(crate) turtle: Box<dyn Renderer>,
    pub(crate) paths: Box<dyn PathResolver>,
    pub(crate) input: Box<dyn LineSource>,
    pub(crate) out: Box<dyn Write>,
    pub(crate) history: History,
    pub(crate) config: Config,
}

impl Session {
    pub fn new(config: Config) -> Session {
        let mut turtle =
            HeadlessTurtle::new(f64::from(config.win_width), f64::from(config.win_height));
        turtle.show_window(config.show_window);
        let mut session = Session {
            scope: Scope::default(),
            procs: ProcStore::default(),
            depth: Rc::new(Cell::new(0)),
            stop_at: None,
            tracing: Tracing::Off,
            angle_in_degs: true,
            indent_labels: config.indent_labels,
            graphics: config.graphics,
            win_colour: WIN_DEFAULT_COLOUR,
            rng: StdRng::from_entropy(),
            brk: Arc::new(AtomicBool::new(false)),
            turtle: Box::new(turtle),
            paths: Box::new(FsResolver),
            input: Box::new(ScriptSource::default()),
            out: Box::new(io::stdout()),
            history: History::new(config.history_lines),
            config,
        };
        session.set_system_vars();
        session
    }

    pub fn with_renderer(mut self, turtle: Box<dyn Renderer>) -> Self {
        self.turtle = turtle;
        self
    }

    pub fn with_paths(mut self, paths: Box<dyn PathResolver>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_input(mut self, input: Box<dyn LineSource>) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    /// Share an interrupt flag, typically set from a signal handler.
    pub fn with_break_flag(mut self, brk: Arc<AtomicBool>) -> Self {
        self.brk = brk;
        self
    }

    pub fn break_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.brk)
    }

    pub fn mode(&self) -> Mode {
        self.procs.mode
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn procs(&self) -> &ProcStore {
        &self.procs
    }

    pub fn renderer(&self) -> &dyn Renderer {
        &*self.turtle
    }

    pub(crate) fn set_system_vars(&mut self) {
        let scope = &mut self.scope;
        scope.set_system("$interpreter", INTERPRETER);
        scope.set_system("$copyright", COPYRIGHT);
        scope.set_system("$version", VERSION);
        scope.set_system("$pi", std::f64::consts::PI);
        scope.set_system("$e", std::f64::consts::E);
        scope.set_system("$degs_per_rad", DEGS_PER_RADIAN);
        scope.set_system("$num_colours", NUM_COLOURS as f64);
        scope.set_system("$file_extension", FILE_EXTENSION);
        scope.set_system("$angle_mode", if self.angle_in_degs { "DEG" } else { "RAD" });
        scope.set_system("$home", std::env::var("HOME").unwrap_or_default());
        scope.set_system("$username", std::env::var("USER").unwrap_or_default());
        scope.set_system("$pid", f64::from(std::process::id()));
        self.set_window_vars();
    }

    pub(crate) fn set_window_vars(&mut self) {
        let win = self.turtle.window();
        self.scope.set_system("$win_width", win.width());
        self.scope.set_system("$win_height", win.height());
        self.scope.set_system("$win_colour", self.win_colour as f64);
    }

    /// Throw away all procedures and variables, as if just started.
    pub fn restart(&mut self) {
        log::debug!("restarting session");
        self.scope = Scope::default();
        self.procs = ProcStore::default();
        self.depth.set(0);
        self.stop_at = None;
        self.tracing = Tracing::Off;
        self.angle_in_degs = true;
        self.rng = StdRng::from_entropy();
        self.brk.store(false, Ordering::Relaxed);
        self.turtle.reset();
        self.win_colour = WIN_DEFAULT_COLOUR;
        self.set_system_vars();
    }

    /// Enter one more level of line execution.
    pub(crate) fn nest(&self) -> Result<DepthGuard, Failure> {
        let depth = self.depth.get() + 1;
        if depth > MAX_NEST_DEPTH {
            return Err(ErrorKind::MaxNestDepth.bare());
        }
        self.depth.set(depth);
        Ok(DepthGuard(Rc::clone(&self.depth)))
    }

    pub(crate) fn break_requested(&self) -> bool {
        self.brk.load(Ordering::Relaxed)
    }

    pub(crate) fn print(&mut self, text: impl fmt::Display) -> Result<(), Failure> {
        write!(self.out, "{text}").map_err(|e| ErrorKind::WriteFail.bare().with_detail(&e))
    }

    pub(crate) fn println(&mut self, text: impl fmt::Display) -> Result<(), Failure> {
        writeln!(self.out, "{text}").map_err(|e| ErrorKind::WriteFail.bare().with_detail(&e))
    }

    /// Console output outside of any running code. There is nobody to
    /// report a failure to, so it only gets logged.
    fn say(&mut self, text: impl fmt::Display) {
        if let Err(e) = writeln!(self.out, "{text}").and_then(|()| self.out.flush()) {
            log::warn!("console write failed: {e}");
        }
    }

    pub(crate) fn show_failure(&mut self, failure: &Failure) {
        let mut failure = failure.clone();
        if let Some(loc) = self.stop_at.take() {
            failure.location.get_or_insert(loc);
        }
        self.say(failure);
    }

    fn show_stop(&mut self, word: &str) {
        match self.stop_at.take() {
            Some(loc) => self.say(format_args!(
                "*** {word} in procedure \"{}\" on line {} ***",
                loc.proc, loc.line
            )),
            None => self.say(format_args!("*** {word} ***")),
        }
    }

    /// Report whatever a finished line left behind and clear per line
    /// state. Returns false if the line didn't run to completion; restart
    /// and exit requests are handed back.
    pub(crate) fn settle(&mut self, res: Flow<()>) -> Result<bool, Signal> {
        let ok = self.report(res)?;
        self.stop_at = None;
        self.scope.frames.clear();
        Ok(ok)
    }

    /// Print the failure or signal a line ended with.
    pub(crate) fn report(&mut self, res: Flow<()>) -> Result<bool, Signal> {
        Ok(match res {
            Ok(ControlFlow::Continue(())) => true,
            Ok(ControlFlow::Break(sig)) => match sig {
                Signal::Break => {
                    self.brk.store(false, Ordering::Relaxed);
                    self.show_stop("BREAK");
                    false
                }
                Signal::Stop => {
                    self.show_stop("STOP");
                    false
                }
                Signal::Goto(label) => {
                    self.show_failure(&ErrorKind::UndefinedLabel.at(label));
                    false
                }
                Signal::Return(_) => true,
                Signal::Restart | Signal::Bye => return Err(sig),
            },
            Err(failure) => {
                self.show_failure(&failure);
                false
            }
        })
    }

    /// Expand `!n` into history line `n`.
    fn recall(&mut self, src: &str) -> Result<String, Failure> {
        let Some(num) = src.strip_prefix('!') else {
            return Ok(src.to_owned());
        };
        let line = num
            .parse::<usize>()
            .ok()
            .and_then(|n| self.history.get(n))
            .ok_or_else(|| ErrorKind::InvalidHistCmd.at(num))?
            .to_owned();
        self.say(&line);
        Ok(line)
    }

    /// Run one line typed at the prompt and print the result. Returns
    /// Some when the session should stop taking input.
    pub fn execute(&mut self, src: &str) -> Option<Outcome> {
        let src = match self.recall(src) {
            Ok(src) => src,
            Err(failure) => {
                self.show_failure(&failure);
                return None;
            }
        };
        self.brk.store(false, Ordering::Relaxed);
        let res = self.run_line(&src);
        if !src.trim().is_empty() {
            self.history.add(&src);
        }
        let outcome = match self.settle(res) {
            Ok(_) => None,
            Err(Signal::Restart) => {
                self.show_stop("RESTART");
                Some(Outcome::Restart)
            }
            Err(_) => {
                self.say("*** GOODBYE ***");
                Some(Outcome::Bye)
            }
        };
        let _ = self.out.flush();
        outcome
    }

    /// The startup file and code. Restarting from here would loop.
    fn startup(&mut self) -> Option<Outcome> {
        if let Some(file) = self.config.load_file.clone() {
            match self.load_procs(&file, None) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(Signal::Bye)) => {
                    self.say("*** GOODBYE ***");
                    return Some(Outcome::Bye);
                }
                Ok(ControlFlow::Break(_)) => {
                    self.show_failure(&ErrorKind::CantRestart.at("RESTART"));
                }
                Err(failure) => self.show_failure(&failure.fill_token(|| file.clone())),
            }
        }
        if let Some(text) = self.config.run_text.clone() {
            self.say("Running code...");
            let res = self.run_line(&text);
            match self.settle(res) {
                Ok(_) => {}
                Err(Signal::Bye) => {
                    self.say("*** GOODBYE ***");
                    return Some(Outcome::Bye);
                }
                Err(_) => self.show_failure(&ErrorKind::CantRestart.at("RESTART")),
            }
        }
        None
    }

    /// An interrupt at the prompt abandons a definition in progress.
    fn interrupted_at_prompt(&mut self) {
        match self.procs.abandon() {
            Some(proc) => self.say(format_args!(
                "*** BREAK in procedure \"{}\" definition ***",
                proc.name
            )),
            None => self.say("*** BREAK ***"),
        }
    }

    /// Read and run lines until the input ends or something asks to stop.
    pub fn repl(&mut self) -> Outcome {
        if let Some(outcome) = self.startup() {
            return outcome;
        }
        self.say("READY");
        loop {
            let prompt = match self.procs.mode {
                Mode::Defining => "> ",
                _ => "? ",
            };
            match read_logical_line(&mut *self.input, prompt) {
                Ok(Some(line)) => {
                    if let Some(outcome) = self.execute(&line) {
                        return outcome;
                    }
                }
                Ok(None) => {
                    self.say("*** GOODBYE ***");
                    return Outcome::Bye;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.interrupted_at_prompt(),
                Err(e) => {
                    log::error!("reading input: {e}");
                    return Outcome::Bye;
                }
            }
        }
    }

    /// Look a variable up by the name in its token.
    pub(crate) fn var_value(&self, name: &str) -> Result<Value, Failure> {
        let key = name.strip_prefix(':').unwrap_or(name);
        self.scope
            .lookup(key)
            .cloned()
            .ok_or_else(|| ErrorKind::UndefinedVar.at(name))
    }
}

/// The version line shown at startup.
pub fn banner() -> String {
    format!(
        "\n{INTERPRETER} {VERSION}, pid: {}\n{COPYRIGHT}\n",
        std::process::id()
    )
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;
    use crate::io::SharedBuffer;

    fn session(script: &str) -> (Session, SharedBuffer) {
        let out = SharedBuffer::default();
        let session = Session::new(Config::default())
            .with_input(Box::new(ScriptSource::new(script)))
            .with_output(Box::new(out.clone()));
        (session, out)
    }

    #[test]
    fn repl_runs_until_bye() {
        let (mut s, out) = session("pr 1 + 2\nbye\npr 99\n");
        assert_eq!(s.repl(), Outcome::Bye);
        assert_eq!(out.contents(), "READY\n3\n*** GOODBYE ***\n");
    }

    fn interrupt_after(brk: Arc<AtomicBool>, millis: u64) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(millis));
            brk.store(true, Ordering::Relaxed);
        })
    }

    #[test]
    fn break_flag_interrupts_running_code() {
        let (mut s, out) = session("");
        s.execute("make \"n\" 0");
        let brk = s.break_flag();

        let interrupter = interrupt_after(Arc::clone(&brk), 100);
        s.execute("repeat 1000000000 [make \"n\" :n + 1]");
        interrupter.join().unwrap();
        assert_eq!(out.take(), "*** BREAK ***\n");
        assert!(!brk.load(Ordering::Relaxed));

        let interrupter = interrupt_after(Arc::clone(&brk), 100);
        s.execute("wait 30");
        interrupter.join().unwrap();
        assert_eq!(out.take(), "*** BREAK ***\n");

        s.execute("pr :n > 0");
        assert_eq!(out.take(), "1\n");
    }

    #[test]
    fn end_of_input_says_goodbye() {
        let (mut s, out) = session("");
        assert_eq!(s.repl(), Outcome::Bye);
        assert_eq!(out.contents(), "READY\n*** GOODBYE ***\n");
    }

    #[test]
    fn restart_clears_everything() {
        let (mut s, out) = session("make \"x\" 1\nwatch :x\nrestart\n");
        assert_eq!(s.repl(), Outcome::Restart);
        assert!(out.contents().ends_with("*** RESTART ***\n"));
        s.restart();
        assert!(s.scope().global("x").is_none());
        assert!(!s.scope().is_watched("x"));
        assert_eq!(s.scope().global("$angle_mode"), Some(&Value::from("DEG")));
    }

    #[test]
    fn history_recall() {
        let (mut s, out) = session("");
        s.execute("pr 7");
        out.take();
        s.execute("!1");
        assert_eq!(out.take(), "pr 7\n7\n");
        s.execute("!9");
        assert_eq!(
            out.take(),
            "ERROR 42: Invalid history command number at \"9\"\n"
        );
    }

    #[test]
    fn startup_code_cannot_restart() {
        let out = SharedBuffer::default();
        let config = Config {
            run_text: Some("restart".into()),
            ..Config::default()
        };
        let mut s = Session::new(config).with_output(Box::new(out.clone()));
        assert_eq!(s.repl(), Outcome::Bye);
        assert_eq!(
            out.contents(),
            "Running code...\nERROR 45: Cannot RESTART while doing initial load at \"RESTART\"\nREADY\n*** GOODBYE ***\n"
        );
    }

    #[test]
    fn depth_guard_unwinds() {
        let (s, _) = session("");
        {
            let _a = s.nest().unwrap();
            let _b = s.nest().unwrap();
            assert_eq!(s.depth.get(), 2);
        }
        assert_eq!(s.depth.get(), 0);
    }
}
