use std::process::ExitCode;

fn main() -> ExitCode {
    furlo_cli::run()
}
