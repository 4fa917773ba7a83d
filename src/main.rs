//! The Lark command-line front end: run a script file, or drop into
//! an interactive REPL when no file is given.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use log::LevelFilter;

use lark::common::source::Source;
use lark::common::Value;
use lark::{root_env, run_source, LarkError};

/// Command-line configuration for the `lark` interpreter.
#[derive(ClapParser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// A `.lk`/`.lrk`/`.lark` file to run. Omit to start the REPL.
    file: Option<PathBuf>,

    /// Raise interpreter log verbosity to `Debug`; repeat (`-vv`) for
    /// `Trace`. Separate from program output, which always prints.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable ANSI color in diagnostic output.
    #[arg(long)]
    no_color: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .with_colors(!cli.no_color)
        .init()
        .expect("logger installs exactly once");

    match cli.file {
        Some(path) => run_file(&path),
        None => repl(),
    }
}

/// Exit code conventions: `0` on a clean run, `1` when the program
/// itself raised a runtime error, `2` when the source never even
/// parsed. This lets a caller distinguish "the script failed" from
/// "the script is malformed" in shell scripting contexts.
fn run_file(path: &std::path::Path) -> ExitCode {
    let source = match Source::path(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: could not read '{}': {}", path.display(), e);
            return ExitCode::from(2);
        },
    };

    let env = root_env();
    match run_source(source, &env) {
        Ok(_) => ExitCode::SUCCESS,
        Err(LarkError::Syntax(e)) => {
            eprintln!("{}", e);
            ExitCode::from(2)
        },
        Err(LarkError::Runtime(e)) => {
            eprintln!("{}", e);
            ExitCode::from(1)
        },
    }
}

/// A line-at-a-time REPL in the style of the original `lark.py`
/// prompt: `lrk>` for a fresh line, `....` while brackets, `if`/`loop`
/// blocks, or a triple-quoted docstring remain open.
fn repl() -> ExitCode {
    println!("Lark {} — Ctrl-D to exit", env!("CARGO_PKG_VERSION"));
    let env = root_env();
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "lrk> " } else { ".... " };
        print!("{}", prompt);
        std::io::stdout().flush().ok();

        let mut line = String::new();
        let bytes_read = std::io::stdin().read_line(&mut line).unwrap_or(0);
        if bytes_read == 0 {
            println!();
            break;
        }

        buffer.push_str(&line);
        if !balanced(&buffer) {
            continue;
        }

        let source = Source::source(buffer.trim_end());
        match run_source(source, &env) {
            Ok(value) => {
                if value != Value::Nil {
                    println!("{}", value.string_form());
                }
            },
            Err(e) => eprintln!("{}", e),
        }
        buffer.clear();
    }

    ExitCode::SUCCESS
}

/// A rough balance check combining three things the REPL needs to
/// wait out: bracket nesting (`(`/`{`/`[`), keyword-delimited blocks
/// (`if`/`loop` against `end` — `elif`/`else`/`then` don't nest),
/// and open triple-quoted docstrings. Strings don't interpret
/// escapes, so a quote's contents only need a matching close quote,
/// not backslash tracking. `#` starts a line comment, same as the
/// lexer.
fn balanced(src: &str) -> bool {
    let chars: Vec<char> = src.chars().collect();
    let mut depth: i32 = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            if i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote {
                i += 3;
                while i < chars.len() && !(chars[i] == quote && i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote) {
                    i += 1;
                }
                i = (i + 3).min(chars.len());
            } else {
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                i = (i + 1).min(chars.len());
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            match chars[start..i].iter().collect::<String>().as_str() {
                "if" | "loop" => depth += 1,
                "end" => depth -= 1,
                _ => {},
            }
            continue;
        }

        match c {
            '(' | '{' | '[' => depth += 1,
            ')' | '}' | ']' => depth -= 1,
            _ => {},
        }
        i += 1;
    }

    depth <= 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bracket_balance() {
        assert!(!balanced("f[1, 2"));
        assert!(balanced("f[1, 2]"));
    }

    #[test]
    fn if_end_balance() {
        assert!(!balanced("if true\n  1"));
        assert!(balanced("if true\n  1\nend"));
    }

    #[test]
    fn nested_loop_and_if() {
        assert!(!balanced("loop true\n  if x\n  end"));
        assert!(balanced("loop true\n  if x\n  end\nend"));
    }

    #[test]
    fn elif_else_then_dont_nest() {
        assert!(balanced("if x then 1 elif y then 2 else 3 end"));
    }

    #[test]
    fn docstring_balance() {
        assert!(!balanced(r#"extern """some"#));
        assert!(balanced(r#"extern """some block""""#));
    }

    #[test]
    fn bracket_inside_string_is_ignored() {
        assert!(balanced(r#"x = "(not a bracket""#));
    }
}
