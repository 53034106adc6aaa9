use std::process::ExitCode;

fn main() -> ExitCode {
    clientdesk_cli::run()
}
