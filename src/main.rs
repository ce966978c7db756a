use clap::Parser;
use clap::error::ErrorKind;
use compile_timer::{CacheFile, Timer, TimerError, format_elapsed, init_logging};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
  /// Either start or stop.
  mode: String,

  /// Directory the cache file lives in (must already exist).
  dir: PathBuf,

  /// Exit non-zero when an operation fails.
  #[arg(long)]
  strict_exit: bool,
}

fn main() -> ExitCode {
  init_logging();

  let args = match Args::try_parse() {
    Ok(args) => args,
    Err(error) => return report_parse_error(error),
  };

  let outcome = run(&args.mode, &args.dir);

  let code = if args.strict_exit { outcome } else { EXIT_OK };

  ExitCode::from(code)
}

fn run(mode: &str, dir: &Path) -> u8 {
  // the path length is checked before the mode is looked at
  let cache = match CacheFile::resolve(dir) {
    Ok(cache) => cache,
    Err(error) => return report(&error),
  };

  let timer = Timer::new();

  match mode {
    "start" => match timer.start(&cache) {
      Ok(_) => {
        println!("Cache file written: {}", cache.path().display());

        EXIT_OK
      }
      Err(error) => report(&error),
    },
    "stop" => match timer.stop(&cache) {
      Ok(elapsed) => {
        println!("{}", format_elapsed(elapsed));

        EXIT_OK
      }
      Err(error) => report(&error),
    },
    _ => {
      println!("Mode is invalid.");

      EXIT_USAGE
    }
  }
}

fn report(error: &TimerError) -> u8 {
  println!("{error}");

  if let Some(help) = error.help() {
    println!("{help}");
  }

  if error.is_usage() {
    EXIT_USAGE
  } else {
    EXIT_FAILURE
  }
}

fn report_parse_error(error: clap::Error) -> ExitCode {
  // clap's rendered output goes to stdout so the printed contract holds
  print!("{}", error.render());

  if matches!(
    error.kind(),
    ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
  ) {
    return ExitCode::from(EXIT_OK);
  }

  // parsing failed, so the flag is read back off the raw arguments
  let strict = env::args().any(|argument| argument == "--strict-exit");

  if strict {
    ExitCode::from(EXIT_USAGE)
  } else {
    ExitCode::from(EXIT_OK)
  }
}
