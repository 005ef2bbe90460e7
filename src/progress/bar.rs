//! Single-line progress indicator driven by a display template.
//!
//! Templates use `:token` placeholders: the built-in tokens below plus the
//! payload's own (see [`BarData`]). Substituted text is never scanned again.
//! `:bar` is sized last so it can take whatever width the rest of the line
//! leaves over:
//!
//! | Token      | Value                                  |
//! |------------|----------------------------------------|
//! | `:bar`     | the bar itself                         |
//! | `:current` | current counter (0 until reported)     |
//! | `:total`   | total counter                          |
//! | `:percent` | floored percentage, e.g. `42%`         |
//! | `:elapsed` | seconds since the bar was created      |
//! | `:eta`     | estimated seconds remaining            |
//! | `:rate`    | items per second                       |

use super::cursor;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Instant;

pub const DEFAULT_TEMPLATE: &str = ":name :bar (:current/:total) :status";
pub const DEFAULT_MAX_WIDTH: usize = 80;
const BAR_TOKEN: &str = "bar";

/// Payload types that contribute named tokens to a bar's template.
pub trait BarData {
    /// `(name, value)` pairs substituted for `:name` in the template.
    fn tokens(&self) -> Vec<(&str, String)>;
}

impl BarData for BTreeMap<String, String> {
    fn tokens(&self) -> Vec<(&str, String)> {
        self.iter().map(|(k, v)| (k.as_str(), v.clone())).collect()
    }
}

/// Visual options shared by every bar of a registry.
#[derive(Clone, Copy, Debug)]
pub struct BarOptions {
    /// Upper bound on the width of the `:bar` token.
    pub max_width: usize,
    /// Terminal width if known. Unknown widths fall back to `max_width`.
    pub columns: Option<usize>,
    pub complete: char,
    pub incomplete: char,
    /// Erase each line on terminate instead of leaving the last frame.
    pub clear: bool,
    /// Hide the terminal cursor while the region is live.
    pub hide_cursor: bool,
}

impl BarOptions {
    pub fn with_columns(mut self, columns: Option<usize>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_max_width(mut self, max_width: usize) -> Self {
        self.max_width = max_width.max(1);
        self
    }

    pub fn with_chars(mut self, complete: char, incomplete: char) -> Self {
        self.complete = complete;
        self.incomplete = incomplete;
        self
    }

    pub fn clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    pub fn hide_cursor(mut self, hide: bool) -> Self {
        self.hide_cursor = hide;
        self
    }

    /// Columns available for a whole line.
    pub fn line_columns(&self) -> usize {
        self.columns.unwrap_or(self.max_width).max(1)
    }

    /// Widest the `:bar` token may ever get.
    pub fn bar_width(&self) -> usize {
        self.max_width.min(self.line_columns())
    }
}

impl Default for BarOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            columns: None,
            complete: '#',
            incomplete: '.',
            clear: true,
            hide_cursor: true,
        }
    }
}

/// Counters and start time for one line of progress.
#[derive(Debug)]
pub struct LineBar {
    total: u64,
    current: Option<u64>,
    started: Instant,
}

impl LineBar {
    pub fn new() -> Self {
        Self {
            total: 1,
            current: None,
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn current(&self) -> Option<u64> {
        self.current
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    /// Set the counter, clamped into `[0, total]`.
    pub fn set_current(&mut self, current: i64) {
        let clamped = u64::try_from(current).unwrap_or(0).min(self.total);
        self.current = Some(clamped);
    }

    fn ratio(&self) -> f64 {
        if self.total > 0 {
            (self.current.unwrap_or(0) as f64 / self.total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Build the line for `template` without writing anything.
    pub fn compose(&self, template: &str, data: &impl BarData, options: &BarOptions) -> String {
        let current = self.current.unwrap_or(0);
        let ratio = self.ratio();
        let percent = (ratio * 100.0).floor() as u64;
        let elapsed = self.started.elapsed().as_secs_f64();
        let eta = if percent == 100 || current == 0 {
            0.0
        } else {
            elapsed * (self.total as f64 / current as f64 - 1.0)
        };
        let rate = if elapsed > 0.0 {
            (current as f64 / elapsed).round()
        } else {
            0.0
        };

        let mut values = vec![
            ("current", current.to_string()),
            ("total", self.total.to_string()),
            ("elapsed", format!("{elapsed:.1}")),
            ("eta", format!("{eta:.1}")),
            ("percent", format!("{percent}%")),
            ("rate", format!("{rate:.0}")),
        ];
        let payload = data.tokens();
        values.extend(payload.iter().map(|(name, value)| (*name, value.clone())));
        let (mut line, bar_at) = fill_template(template, &values);

        let columns = options.line_columns();
        if let Some(at) = bar_at {
            let width = options
                .bar_width()
                .min(columns.saturating_sub(line.chars().count()));
            let filled = ((width as f64 * ratio).round() as usize).min(width);
            let bar: String = std::iter::repeat_n(options.complete, filled)
                .chain(std::iter::repeat_n(options.incomplete, width - filled))
                .collect();
            line.insert_str(at, &bar);
        }

        if line.chars().count() > columns {
            line.chars().take(columns).collect()
        } else {
            line
        }
    }

    /// Draw the line over whatever the cursor's row currently shows.
    ///
    /// Always writes: a sorted repaint may put a different bar on this row.
    pub fn render<W: Write + ?Sized>(
        &self,
        w: &mut W,
        template: &str,
        data: &impl BarData,
        options: &BarOptions,
    ) -> io::Result<()> {
        let line = self.compose(template, data, options);
        cursor::move_to_column(w, 0)?;
        w.write_all(line.as_bytes())?;
        cursor::erase_line_right(w)
    }

    /// Finish the bar's line: erase it when `clear` is set.
    pub fn terminate<W: Write + ?Sized>(&self, w: &mut W, clear: bool) -> io::Result<()> {
        if clear {
            cursor::erase_line(w)?;
            cursor::move_to_column(w, 0)?;
        }
        Ok(())
    }
}

/// Substitute every `:token` of `template` in one left-to-right pass.
///
/// Values are inserted verbatim and never rescanned, so a payload such as
/// `foo:bar` cannot capture another token's slot. Each token is replaced at
/// its first occurrence only, and the longest matching name wins. The `:bar`
/// slot is left empty; its byte offset in the result is returned.
fn fill_template(template: &str, values: &[(&str, String)]) -> (String, Option<usize>) {
    let mut line = String::with_capacity(template.len());
    let mut bar_at = None;
    let mut used: Vec<&str> = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find(':') {
        line.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let mut matched: Option<(&str, Option<&str>)> = None;
        let candidates = std::iter::once((BAR_TOKEN, None))
            .chain(values.iter().map(|(name, value)| (*name, Some(value.as_str()))));
        for (name, value) in candidates {
            let longer = matched.is_none_or(|(best, _)| name.len() > best.len());
            if !name.is_empty() && longer && after.starts_with(name) && !used.contains(&name) {
                matched = Some((name, value));
            }
        }

        match matched {
            Some((name, value)) => {
                used.push(name);
                match value {
                    Some(value) => line.push_str(value),
                    None => bar_at = Some(line.len()),
                }
                rest = &after[name.len()..];
            }
            None => {
                line.push(':');
                rest = after;
            }
        }
    }
    line.push_str(rest);
    (line, bar_at)
}

impl Default for LineBar {
    fn default() -> Self {
        Self::new()
    }
}
