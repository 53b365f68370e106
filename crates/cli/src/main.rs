use std::process::ExitCode;

fn main() -> ExitCode {
    matchline_cli::run()
}
