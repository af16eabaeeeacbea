fn main() -> anyhow::Result<()> {
    nativerdf_cli::run()
}
