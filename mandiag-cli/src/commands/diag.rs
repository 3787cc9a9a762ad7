//! Serial request/response command implementations.

use {
    crate::{Cli, DEFAULT_BAUD, config::Config},
    anyhow::{Context, Result, bail},
    console::style,
    log::debug,
    mandiag::{
        DispatchOutcome, Engine, Expectation, LineTransport, NativePort, REQUEST_PREFIX,
        RESPONSE_PREFIX, ResponsePattern, RetryPolicy, normalize_command,
    },
    std::time::Duration,
};

/// Options of the `check` command.
pub(crate) struct CheckArgs<'a> {
    pub(crate) status: &'a str,
    pub(crate) length: &'a str,
    pub(crate) data: Option<&'a str>,
    pub(crate) expect: Option<&'a str>,
    pub(crate) repeat: u32,
    pub(crate) attempts: Option<u32>,
}

/// Join the command words into one request line, adding the request prefix
/// when the text does not already start with it.
pub(crate) fn frame_command(words: &[String], request_prefix: &str) -> Result<String> {
    let line = words.join(" ");
    if line.trim().is_empty() {
        bail!("Empty command");
    }

    let command = normalize_command(&line, request_prefix.trim())
        .with_context(|| format!("Invalid command '{}'", line.trim()))?;
    Ok(command.as_str().to_string())
}

fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| config.serial.port.clone())
        .context("No serial port specified. Use --port, MANDIAG_PORT, or [serial] port in mandiag.toml")
}

fn open_engine(
    cli: &Cli,
    config: &Config,
    policy: RetryPolicy,
) -> Result<Engine<LineTransport<NativePort>>> {
    let port = resolve_port(cli, config)?;
    let baud = cli.baud.or(config.serial.baud).unwrap_or(DEFAULT_BAUD);
    let serial = config.serial_config(&port, baud)?;

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("•").cyan(),
            style(&port).green(),
            baud
        );
    }

    let link = LineTransport::open(&serial, &config.open_options())
        .with_context(|| format!("Failed to open serial port {port}"))?;
    let prefix = config
        .protocol
        .response_prefix
        .as_deref()
        .unwrap_or(RESPONSE_PREFIX);

    debug!("Retry policy: {policy:?}");
    Ok(Engine::new(link)
        .with_policy(policy)
        .with_response_prefix(prefix))
}

fn request_line(config: &Config, words: &[String]) -> Result<String> {
    let prefix = config
        .protocol
        .request_prefix
        .as_deref()
        .unwrap_or(REQUEST_PREFIX);
    frame_command(words, prefix)
}

/// Send command implementation. Returns `false` when nothing answered.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    words: &[String],
    attempts: Option<u32>,
    pending_deadline_ms: Option<u64>,
    json: bool,
) -> Result<bool> {
    let command = request_line(config, words)?;

    let mut policy = config.retry_policy();
    if let Some(attempts) = attempts {
        policy = policy.with_attempts(attempts);
    }
    if let Some(ms) = pending_deadline_ms {
        policy = policy.with_pending_deadline(Duration::from_millis(ms));
    }

    let mut engine = open_engine(cli, config, policy)?;
    let (outcome, response) = engine.send_and_classify(&command)?;
    engine.link_mut().close()?;

    if json {
        let output = serde_json::json!({
            "ok": response.is_some(),
            "data": {
                "command": command,
                "outcome": outcome.to_string(),
                "response": response,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(response.is_some());
    }

    let Some(response) = response else {
        eprintln!(
            "{} No response to '{}'",
            style("✗").red().bold(),
            style(&command).cyan()
        );
        return Ok(false);
    };

    println!("{response}");
    if !cli.quiet {
        let marker = match outcome {
            DispatchOutcome::Success => style("✓").green(),
            _ => style("⚠").yellow(),
        };
        eprintln!("{marker} {outcome} (status {})", response.status);
    }

    Ok(true)
}

/// Check command implementation. Returns whether every repetition passed.
pub(crate) fn cmd_check(
    cli: &Cli,
    config: &Config,
    words: &[String],
    args: &CheckArgs<'_>,
) -> Result<bool> {
    let command = request_line(config, words)?;

    let mut policy = config.retry_policy();
    if let Some(attempts) = args.attempts {
        policy = policy.with_attempts(attempts);
    }

    let pattern = args
        .expect
        .map(|expect| {
            let prefix = config
                .protocol
                .response_prefix
                .as_deref()
                .unwrap_or(RESPONSE_PREFIX);
            ResponsePattern::parse(expect, prefix)
                .with_context(|| format!("Invalid --expect pattern '{expect}'"))
        })
        .transpose()?;

    let mut engine = open_engine(cli, config, policy)?;

    let passed = if let Some(pattern) = pattern {
        let mut passed = 0;
        for round in 1..=args.repeat {
            if !engine.send_and_match(&command, &pattern)? {
                debug!("Pattern check failed on repetition {round}");
                break;
            }
            passed += 1;
        }
        passed
    } else {
        let mut expectation = Expectation::new(args.status, args.length);
        if let Some(data) = args.data {
            expectation = expectation.with_data(data);
        }
        engine.send_repeated(&command, args.repeat, &expectation)?
    };
    engine.link_mut().close()?;

    let ok = passed == args.repeat;
    if ok {
        println!("PASS");
    } else {
        println!("FAIL");
    }
    if !cli.quiet {
        let marker = if ok {
            style("✓").green()
        } else {
            style("✗").red().bold()
        };
        eprintln!(
            "{marker} {}/{} repetition(s) of '{}' passed",
            passed,
            args.repeat,
            style(&command).cyan()
        );
    }

    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_frame_command_adds_prefix() {
        let line = frame_command(&words(&["6e", "03", "00", "00", "00"]), REQUEST_PREFIX).unwrap();
        assert_eq!(line, "6D643E 6E 03 00 00 00");
    }

    #[test]
    fn test_frame_command_keeps_existing_prefix() {
        let line = frame_command(&words(&["6D643E 6E 03 00", "00 00"]), REQUEST_PREFIX).unwrap();
        assert_eq!(line, "6D643E 6E 03 00 00 00");
    }

    #[test]
    fn test_frame_command_rejects_non_hex() {
        assert!(frame_command(&words(&["6E", "ZZ"]), REQUEST_PREFIX).is_err());
        assert!(frame_command(&words(&["  "]), REQUEST_PREFIX).is_err());
    }

    #[test]
    fn test_frame_command_custom_prefix() {
        let line = frame_command(&words(&["01", "02"]), "ab").unwrap();
        assert_eq!(line, "AB 01 02");
    }

    #[test]
    fn test_frame_command_splits_compact_body() {
        let line = frame_command(&words(&["6D643E", "6E0300", "0000"]), REQUEST_PREFIX).unwrap();
        assert_eq!(line, "6D643E 6E 03 00 00 00");
    }
}
