use std::fmt::Write;

use jiff::{Zoned, tz::TimeZone};
use log::{Level, Record};
use logforth::{
    append::Stdout,
    layout::{JsonLayout, Layout},
};

use crate::args::{Args, LogStyle};

/// One line per record: UTC timestamp, level, emitting crate and the message.
#[derive(Debug, Clone)]
struct TextLayout {
    colored: bool,
}

impl TextLayout {
    fn colored() -> Self {
        Self { colored: true }
    }

    fn plain() -> Self {
        Self { colored: false }
    }

    fn write_line(&self, output: &mut String, now: &Zoned, record: &Record<'_>) -> std::fmt::Result {
        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = record.level();

        match ansi_color(level) {
            Some(color) if self.colored => write!(output, "\x1b[{color}m{level:>5}\x1b[0m")?,
            _ => write!(output, "{level:>5}")?,
        }

        let target = record.target().split("::").next().unwrap_or_default();

        write!(output, "  {target}: {}", record.args())
    }
}

fn ansi_color(level: Level) -> Option<u8> {
    match level {
        Level::Error => Some(31),
        Level::Warn => Some(33),
        Level::Info => Some(32),
        Level::Debug => Some(34),
        Level::Trace => Some(35),
    }
}

impl Layout for TextLayout {
    fn format(
        &self,
        record: &Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();
        let now = Zoned::now().with_time_zone(TimeZone::UTC);

        self.write_line(&mut output, &now, record)?;

        Ok(output.into_bytes())
    }
}

pub(super) fn init(args: &Args) -> anyhow::Result<()> {
    let filter = args.log_level.env_filter()?;

    logforth::builder()
        .dispatch(|d| {
            let d = d.filter(filter);

            match args.log_style {
                LogStyle::Color => d.append(Stdout::default().with_layout(TextLayout::colored())),
                LogStyle::Text => d.append(Stdout::default().with_layout(TextLayout::plain())),
                LogStyle::Json => d.append(Stdout::default().with_layout(JsonLayout::default())),
            }
        })
        .apply();

    Ok(())
}
