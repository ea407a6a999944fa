//! Print the packets recorded in datalog files as text.
//!
//! ```bash
//! portagent-decode hydrophone.datalog hydrophone.datalog.2014_04_01
//! ```

// A decode tool's whole job is writing to stdout.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::{fs::File, io::BufReader, path::PathBuf, process::ExitCode};

use clap::{Parser, error::ErrorKind};
use portagent_proto::PacketStream;

/// Decode recorded port agent datalogs
#[derive(Parser, Debug)]
#[command(name = "portagent-decode")]
#[command(version)]
struct Args {
    /// Datalog files to decode, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
            let _ = e.print();
            return code;
        },
    };

    let mut status = ExitCode::SUCCESS;
    for path in &args.files {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                status = ExitCode::FAILURE;
                continue;
            },
        };

        for packet in PacketStream::new(BufReader::new(file)) {
            match packet {
                Ok(packet) => println!("{packet}"),
                Err(e) => {
                    eprintln!("{}: {e}", path.display());
                    status = ExitCode::FAILURE;
                    break;
                },
            }
        }
    }

    status
}
