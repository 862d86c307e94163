use std::process::ExitCode;

fn main() -> ExitCode {
    perch_cli::run()
}
