use std::{
    io,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;
use clap::Parser;
use rustyline::{error::ReadlineError, history::DefaultHistory, Editor};
use turtlelogo::{banner, config, Config, LineSource, Outcome, Session};

#[derive(Parser)]
#[command(about = "An interactive LOGO interpreter", disable_help_flag = true)]
struct Args {
    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
    /// Window width.
    #[arg(short = 'w', default_value_t = config::WIN_WIDTH)]
    width: u32,
    /// Window height.
    #[arg(short = 'h', default_value_t = config::WIN_HEIGHT)]
    height: u32,
    /// Console only: no turtle graphics.
    #[arg(short = 'c')]
    console: bool,
    /// Procedure file to load on startup.
    #[arg(short = 'l')]
    load: Option<String>,
    /// Code to run on startup.
    #[arg(short = 'r')]
    run: Option<String>,
    /// Indent procedure listings between labels and jumps.
    #[arg(short = 'i')]
    indent: bool,
    /// Start with the turtle window hidden.
    #[arg(short = 'u')]
    hidden: bool,
    /// Print the version and exit.
    #[arg(long = "ver")]
    version: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Config {
        Config {
            win_width: args.width,
            win_height: args.height,
            graphics: !args.console,
            show_window: !args.hidden,
            indent_labels: args.indent,
            load_file: args.load,
            run_text: args.run,
            ..Config::default()
        }
    }
}

/// Terminal input with line editing.
struct Terminal {
    editor: Editor<(), DefaultHistory>,
}

impl LineSource for Terminal {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    if let Err(e) = self.editor.add_history_entry(line.as_str()) {
                        log::warn!("couldn't record history: {e}");
                    }
                }
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted) => Err(io::ErrorKind::Interrupted.into()),
            Err(ReadlineError::Eof) => Ok(None),
            Err(ReadlineError::Io(e)) => Err(e),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    if args.version {
        println!("{}", banner().trim());
        return Ok(());
    }

    let brk = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&brk))
        .context("failed to install the interrupt handler")?;
    let editor = Editor::<(), DefaultHistory>::new().context("failed to set up the terminal")?;

    print!("{}", banner());
    let mut session = Session::new(args.into())
        .with_input(Box::new(Terminal { editor }))
        .with_break_flag(brk);
    loop {
        match session.repl() {
            Outcome::Restart => session.restart(),
            Outcome::Bye => return Ok(()),
        }
    }
}
