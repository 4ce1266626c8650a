use bakeoff::comm::SerialComm;
use bakeoff::ex1::{self, Ex1Args};
use bakeoff::options::{parse_command, report_parse_failure};
use env_logger::Env;
use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let code = match parse_command::<Ex1Args, _, _>(std::env::args_os()) {
        Ok(args) => match ex1::run(&args.into_config()) {
            Ok(_) => 0,
            Err(err) => {
                eprintln!("{err}");
                err.exit_code()
            }
        },
        Err(err) => report_parse_failure(&SerialComm::new(), &err, &mut io::stdout(), &mut io::stderr()),
    };
    ExitCode::from(code as u8)
}
