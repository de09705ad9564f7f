//! Command line driver: argument parsing, the `// stdlib:` include
//! preprocessor, and mode dispatch.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::debug;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use toyc::Compiler;

/// Ahead-of-time compiler for the Toy language.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
  /// Path to the source file.
  path: PathBuf,

  /// Print the token stream instead of compiling.
  #[arg(long, group = "mode")]
  tokens: bool,

  /// Print global symbols and struct layouts.
  #[arg(long, group = "mode")]
  symbols: bool,

  /// Stop after type checking.
  #[arg(long, group = "mode")]
  typecheck: bool,

  /// Print the lowered program.
  #[arg(long, group = "mode")]
  lower: bool,

  /// Write assembly to PATH ('-' for stdout).
  #[arg(long, group = "mode", value_name = "PATH", num_args = 0..=1,
    default_missing_value = "-")]
  emit: Option<PathBuf>,

  /// Directory containing the library sources for `// stdlib:` includes.
  #[arg(long, value_name = "DIR", default_value = "stdlib")]
  stdlib: PathBuf,

  /// Log pipeline progress to stderr.
  #[arg(short, long)]
  verbose: bool,
}

fn main() -> ExitCode {
  let args = Args::parse();
  let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Warn };
  let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto);
  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("error: {e}");
      ExitCode::FAILURE
    }
  }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
  let text = fs::read_to_string(&args.path)
    .map_err(|e| format!("cannot read {}: {e}", args.path.display()))?;

  let mut compiler = Compiler::new();
  for name in stdlib_includes(&text) {
    let lib_path = args.stdlib.join(format!("{name}.toy"));
    debug!("including stdlib module {name}");
    let lib_text = fs::read_to_string(&lib_path)
      .map_err(|e| format!("cannot read stdlib module '{name}' from {}: {e}", lib_path.display()))?;
    compiler.add_source(&lib_path.to_string_lossy(), lib_text)?;
  }
  compiler.add_source(&args.path.to_string_lossy(), text)?;

  if args.tokens {
    for tok in compiler.tokens() {
      println!("{}:{} {:?} {}", tok.span.line, tok.span.col, tok.kind, tok.lexeme);
    }
    return Ok(());
  }

  let program = compiler.parse()?;
  if args.symbols {
    let symbols = toyc::symbols::build_symbols(&program)?;
    println!("{symbols:#?}");
  } else if args.typecheck {
    compiler.analyze(&program)?;
    println!("typecheck OK");
  } else if args.lower {
    let symbols = compiler.analyze(&program)?;
    let lowered = toyc::lower::lower_program(&program, &symbols);
    println!("{lowered:#?}");
  } else if let Some(out) = &args.emit {
    let asm = compiler.compile(&program)?;
    if out.as_os_str() == "-" {
      print!("{asm}");
    } else {
      fs::write(out, asm).map_err(|e| format!("cannot write {}: {e}", out.display()))?;
    }
  } else {
    println!("{program:#?}");
  }
  Ok(())
}

/// Collect `// stdlib: a, b` directive names in order of first appearance.
fn stdlib_includes(text: &str) -> Vec<String> {
  let mut names: Vec<String> = Vec::new();
  for line in text.lines() {
    if let Some(rest) = line.trim_start().strip_prefix("// stdlib:") {
      for name in rest.split(',') {
        let name = name.trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
          names.push(name.to_owned());
        }
      }
    }
  }
  names
}
