use anyhow::Result;

pub fn check_serial_config(baud: u32, allowlist: &[String], probe_timeout_ms: u64) -> Result<()> {
    anyhow::ensure!(baud > 0, "serial.baud invalid");
    anyhow::ensure!(
        !allowlist.is_empty(),
        "serial.allowlist empty; discovery would match nothing"
    );
    anyhow::ensure!(
        probe_timeout_ms >= 100 && probe_timeout_ms <= 10_000,
        "serial.probe_timeout_ms should be 100..10000"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_allowlist;

    #[test]
    fn default_config_passes() {
        check_serial_config(115_200, &default_allowlist(), 1000).unwrap();
    }

    #[test]
    fn empty_allowlist_is_rejected() {
        assert!(check_serial_config(115_200, &[], 1000).is_err());
    }
}
