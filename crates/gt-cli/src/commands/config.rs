use gt_core::config::Config;

pub fn run(cfg: &Config) -> anyhow::Result<()> {
    print!("{}", cfg.to_toml()?);
    Ok(())
}
