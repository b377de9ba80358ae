use clap::Parser;
use tiermem_cli::ImpCli;
use tiermem_core::exit;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match ImpCli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { exit::USAGE } else { exit::SUCCESS };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    std::process::exit(cli.execute().await);
}
