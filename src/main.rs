fn main() -> anyhow::Result<()> {
    ioframe::cli::run_cli(ioframe::exmodule::register)
}
