use std::process::ExitCode;

fn main() -> ExitCode {
    propline_cli::run()
}
