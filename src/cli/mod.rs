pub mod args;

pub use args::{Arguments, Sensitivity};

use clap::CommandFactory;
use clap::Parser;
use clap::error::ErrorKind;

/// Parses command-line arguments.
///
/// Invoked with no arguments at all, prints usage and exits 0. Help and
/// version requests also exit 0. Any other parse error (unknown flag,
/// bad value) prints the usage hint and exits 1.
pub fn parse() -> Arguments {
    if std::env::args().len() == 1 {
        let mut cmd = Arguments::command();
        let _ = cmd.print_help();
        std::process::exit(0);
    }
    match Arguments::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            std::process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}
