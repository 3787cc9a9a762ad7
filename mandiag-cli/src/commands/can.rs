//! CAN request/response command implementation.

use {
    crate::{Cli, config::Config},
    anyhow::Result,
    mandiag::can::MAX_EXTENDED_ID,
};

/// Receive timeout when neither `--timeout-ms` nor `[can] timeout_ms` is set.
const DEFAULT_CAN_TIMEOUT_MS: u64 = 5000;

/// Options of the `can-check` command.
pub(crate) struct CanCheckArgs<'a> {
    pub(crate) interface: Option<&'a str>,
    pub(crate) request_id: u32,
    pub(crate) response_id: u32,
    pub(crate) payload: &'a str,
    pub(crate) expect: Option<&'a str>,
    pub(crate) timeout_ms: Option<u64>,
}

/// Parse a hex arbitration ID (`0x18DA10F1` or `18DA10F1`).
pub(crate) fn parse_can_id(text: &str) -> Result<u32, String> {
    let digits = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let id = u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex ID '{text}': {e}"))?;
    if id > MAX_EXTENDED_ID {
        return Err(format!(
            "ID 0x{id:X} exceeds the 29-bit maximum 0x{MAX_EXTENDED_ID:X}"
        ));
    }
    Ok(id)
}

/// CAN check command implementation. Returns whether the reply passed.
#[cfg(target_os = "linux")]
pub(crate) fn cmd_can_check(cli: &Cli, config: &Config, args: &CanCheckArgs<'_>) -> Result<bool> {
    use {
        anyhow::Context,
        console::style,
        mandiag::{CanDiagnostics, SocketCanBus, parse_can_payload},
        std::time::Duration,
    };

    let interface = args
        .interface
        .or(config.can.interface.as_deref())
        .context("No CAN interface specified. Use --interface or [can] interface in mandiag.toml")?;
    let payload = parse_can_payload(args.payload).context("Invalid --payload")?;
    let expected = args
        .expect
        .map(parse_can_payload)
        .transpose()
        .context("Invalid --expect")?;
    let timeout = Duration::from_millis(
        args.timeout_ms
            .or(config.can.timeout_ms)
            .unwrap_or(DEFAULT_CAN_TIMEOUT_MS),
    );

    if !cli.quiet {
        eprintln!(
            "{} Using CAN interface {}",
            style("•").cyan(),
            style(interface).green()
        );
    }

    let bus = SocketCanBus::open(interface)
        .with_context(|| format!("Failed to open CAN interface {interface}"))?;
    let mut diag = CanDiagnostics::new(bus);

    let passed = diag.send_and_validate(
        args.request_id,
        args.response_id,
        &payload,
        expected.as_deref(),
        timeout,
    )?;
    diag.close()?;

    println!("{}", if passed { "PASS" } else { "FAIL" });
    if !cli.quiet && !passed {
        eprintln!(
            "{} No matching reply on ID 0x{:X} within {} ms",
            style("✗").red().bold(),
            args.response_id,
            timeout.as_millis()
        );
    }

    Ok(passed)
}

/// CAN check command implementation.
#[cfg(not(target_os = "linux"))]
pub(crate) fn cmd_can_check(_cli: &Cli, _config: &Config, _args: &CanCheckArgs<'_>) -> Result<bool> {
    anyhow::bail!("can-check requires Linux SocketCAN")
}
