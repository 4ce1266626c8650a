use bakeoff::bench;
use bakeoff::comm::Communicator;
use bakeoff::options::{parse_args, report_parse_failure, Args};
use env_logger::Env;
use std::io;
use std::process::ExitCode;

/// Runs one rank and returns its exit code.
///
/// Fatal errors on a multi-rank run take down every rank.
fn run_rank<C: Communicator>(comm: &C, args: Args) -> i32 {
    let result = args
        .into_config(comm.size())
        .and_then(|config| bench::run(comm, &config));
    match result {
        Ok(_) => 0,
        Err(err) => {
            let code = err.exit_code();
            if err.is_fatal() {
                if comm.size() > 1 {
                    eprintln!("rank {}: {err}", comm.rank());
                    comm.abort(code);
                }
                eprintln!("{err}");
            } else if comm.is_root() {
                println!("{err}");
            }
            code
        }
    }
}

#[cfg(feature = "mpi")]
fn launch() -> i32 {
    use bakeoff::comm::MpiComm;
    let Some(comm) = MpiComm::initialize() else {
        eprintln!("failed to initialize MPI");
        return 9;
    };
    match parse_args(std::env::args_os()) {
        Ok(args) => {
            if args.ranks != 1 && comm.is_root() {
                log::warn!("--ranks is ignored when running under MPI");
            }
            run_rank(&comm, args)
        }
        Err(err) => report_parse_failure(&comm, &err, &mut io::stdout(), &mut io::stderr()),
    }
}

#[cfg(not(feature = "mpi"))]
fn launch() -> i32 {
    use bakeoff::comm::{spawn_ranks, SerialComm};
    let args = match parse_args(std::env::args_os()) {
        Ok(args) => args,
        // A single process parses on behalf of every in-process rank
        Err(err) => return report_parse_failure(&SerialComm::new(), &err, &mut io::stdout(), &mut io::stderr()),
    };
    if args.ranks == 0 {
        eprintln!("--ranks must be at least 1");
        return 1;
    }
    let codes = spawn_ranks(args.ranks, |comm| run_rank(&comm, args.clone()));
    codes.into_iter().find(|&code| code != 0).unwrap_or(0)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    ExitCode::from(launch() as u8)
}
