use std::{
    io::{self, Read},
    process::ExitCode,
};

use anyhow::Context;
use ptproute_cni::{
    args::CmdArgs,
    command::cni_command_from,
    error::{reply_version, ErrorReply},
};
use tracing::error;

async fn dispatch(stdin: &[u8]) -> anyhow::Result<()> {
    let args = CmdArgs::from_env()?;
    let command = cni_command_from(&args.command)?;
    command.run(&args, stdin).await
}

// Namespace switching is per thread, so everything runs on this one.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let mut stdin = Vec::new();
    let result = match io::stdin().read_to_end(&mut stdin).context("failed to read stdin") {
        Ok(_) => dispatch(&stdin).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            let version = reply_version(&String::from_utf8_lossy(&stdin));
            match serde_json::to_string(&ErrorReply::new(&e, &version)) {
                Ok(reply) => println!("{reply}"),
                Err(_) => eprintln!("{e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
