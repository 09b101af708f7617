use std::process::ExitCode;

fn main() -> ExitCode {
    expensecart_cli::run()
}
