fn main() -> anyhow::Result<()> {
    fanout_sink::run()
}
