fn main() -> anyhow::Result<()> {
    reqpipe::cli::run_cli()
}
