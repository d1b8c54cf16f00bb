//! Output formatting utilities for CLI commands.

use std::io::{self, Write};

use serde::Serialize;

use crate::cli::{CommandContext, OutputFormat};
use crate::error::CliError;

/// Types that can be rendered for a human reader
pub trait FormattedOutput: Serialize {
    fn format_text(&self) -> String;
}

/// Print formatted output to stdout
pub fn print_output<T: FormattedOutput>(ctx: &CommandContext, value: &T) -> Result<(), CliError> {
    write_output(ctx.format, ctx.quiet, value, io::stdout().lock())
}

/// Print formatted output to a writer. JSON is always written; text honours `quiet`.
pub fn write_output<T, W>(format: OutputFormat, quiet: bool, value: &T, mut writer: W) -> Result<(), CliError>
where
    T: FormattedOutput,
    W: Write,
{
    let output = match format {
        OutputFormat::Text if quiet => return Ok(()),
        OutputFormat::Text => value.format_text(),
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| CliError::Other(anyhow::anyhow!("JSON serialization failed: {e}")))?,
    };

    writeln!(writer, "{output}").map_err(|e| CliError::Other(e.into()))?;
    Ok(())
}

/// Render a yes/no flag
pub fn flag(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
