//! Minimal CLI parsing for run mode selection.

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// Run the scheduler until interrupted
    #[default]
    Daemon,
    /// Execute one queue and exit
    RunQueue(i64),
    /// Run one health sweep and exit
    CheckHealth,
    /// Print a fresh base64 encryption key and exit
    GenerateKey,
}

#[derive(Debug, Default)]
pub struct CliOptions {
    pub command: Command,
}

impl CliOptions {
    pub fn from_args() -> anyhow::Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut options = CliOptions::default();
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--check-health" => options.command = Command::CheckHealth,
                "--generate-key" => options.command = Command::GenerateKey,
                "--run-queue" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--run-queue requires a queue id"))?;
                    options.command = Command::RunQueue(parse_queue_id(&value)?);
                }
                _ if arg.starts_with("--run-queue=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.command = Command::RunQueue(parse_queue_id(value)?);
                    }
                }
                other => anyhow::bail!("Unknown argument: {}", other),
            }
        }
        Ok(options)
    }
}

fn parse_queue_id(value: &str) -> anyhow::Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid queue id: {}", value))
}
