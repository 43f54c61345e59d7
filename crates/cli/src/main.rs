use std::process::ExitCode;

fn main() -> ExitCode {
    kahawa_cli::run()
}
