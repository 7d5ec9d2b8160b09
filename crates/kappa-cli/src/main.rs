use std::{
    env, fs,
    io::{self, Read, Write},
    process::ExitCode,
};

use kappa::{compile, CompileOptions};

struct Args {
    auto_pause: bool,
    output: Option<String>,
    verbose: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut auto_pause = false;
    let mut output = None;
    let mut verbose = false;

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--auto-pause" => auto_pause = true,
            "-v" | "--verbose" => verbose = true,
            "-o" | "--output" => {
                let path = iter.next().ok_or_else(|| format!("{arg} requires a path argument"))?;
                output = Some(path);
            }
            other => return Err(format!("unrecognized argument: {other}")),
        }
    }

    Ok(Args { auto_pause, output, verbose })
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut source = String::new();
    if let Err(err) = io::stdin().read_to_string(&mut source) {
        eprintln!("error reading standard input: {err}");
        return ExitCode::FAILURE;
    }
    if args.verbose {
        eprintln!("read {} bytes from standard input", source.len());
    }

    let options = CompileOptions { auto_pause: args.auto_pause };
    let output = match compile(&source, options) {
        Ok(output) => output,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    if args.verbose {
        eprintln!("compiled to {} bytes", output.len());
    }

    // Nothing is written until the whole pipeline has succeeded: a failing compile must
    // never leave a partial program sitting on stdout or at the output path.
    match args.output {
        Some(path) => {
            if let Err(err) = fs::write(&path, output) {
                eprintln!("error writing {path}: {err}");
                return ExitCode::FAILURE;
            }
        }
        None => {
            if let Err(err) = io::stdout().write_all(output.as_bytes()) {
                eprintln!("error writing to standard output: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
