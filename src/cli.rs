// src/cli.rs
//! Argument handling shared by the binaries.

use std::ffi::OsString;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;

/// Parse arguments. Help and version print and exit 0; any other parse error prints the
/// usage message to stderr and exits 1.
pub fn parse_or_exit<T: Parser>() -> T {
    match parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(code) => std::process::exit(code),
    }
}

/// Parse `args`; on failure print clap's message and return the exit status to use.
pub fn parse_from<T, I, A>(args: I) -> Result<T, i32>
where
    T: Parser,
    I: IntoIterator<Item = A>,
    A: Into<OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(cli),
        Err(e) => {
            let code = exit_code_for(e.kind());
            // print() routes help/version to stdout and errors to stderr
            let _ = e.print();
            Err(code)
        }
    }
}

fn exit_code_for(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        _ => 1,
    }
}

/// Log the full error chain and map to the process exit status.
pub fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
