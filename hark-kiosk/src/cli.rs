//! Command-line parsing for the kiosk host.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};

pub const USAGE: &str = "usage: hark-kiosk [listen|selftest|devices] [--settings <path>] [--out <dir>]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// Capture one utterance and write it as WAV.
    #[default]
    Listen,
    SelfTest,
    Devices,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub command: Command,
    pub settings: Option<PathBuf>,
    pub out: Option<PathBuf>,
}

impl Args {
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Args::default();
        let mut command_seen = false;
        let mut iter = args.into_iter().map(Into::into);

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--settings" => {
                    let path = iter.next().context("--settings needs a path")?;
                    parsed.settings = Some(PathBuf::from(path));
                }
                "--out" => {
                    let dir = iter.next().context("--out needs a directory")?;
                    parsed.out = Some(PathBuf::from(dir));
                }
                cmd if !cmd.starts_with('-') && !command_seen => {
                    parsed.command = match cmd {
                        "listen" => Command::Listen,
                        "selftest" | "self-test" | "test" => Command::SelfTest,
                        "devices" => Command::Devices,
                        other => bail!("unknown command '{other}'"),
                    };
                    command_seen = true;
                }
                other => bail!("unexpected argument '{other}'"),
            }
        }
        Ok(parsed)
    }
}

/// `{YYYYmmdd_HHMMSS}_utterance.wav`
pub fn utterance_file_name(at: DateTime<Local>) -> String {
    format!("{}_utterance.wav", at.format("%Y%m%d_%H%M%S"))
}
