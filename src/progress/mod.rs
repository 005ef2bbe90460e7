//! Multi-line progress display for concurrently running tasks.
//!
//! [`MultiProgressBar`] keeps one line per task key, in insertion order, and
//! repaints the whole region on every render. It never tracks the cursor
//! itself; instead it relies on one rule: after every call, the cursor sits at
//! column 0 of the line just below the last entry. Creating an entry reserves
//! its line immediately so the next render can move up by exactly `len()`
//! lines and land on the first one.
//!
//! Only one writer may touch the stream at a time. In a multi-threaded host,
//! funnel all updates through a single consumer (see [`crate::lifecycle`]).
//!
//! ```ignore
//! let mut bars = MultiProgressBar::new(":name :bar :status", std::io::stderr());
//! bars.update(1, job, Some(3), Some(10))?;
//! bars.render()?;
//! bars.terminate()?;
//! ```

pub mod bar;
pub mod cursor;

pub use bar::{BarData, BarOptions, DEFAULT_MAX_WIDTH, DEFAULT_TEMPLATE, LineBar};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::io::{self, Write};

/// One task's line: the caller's payload plus its bar.
#[derive(Debug)]
pub struct Entry<K, T> {
    key: K,
    payload: T,
    bar: LineBar,
    completed: bool,
}

impl<K, T> Entry<K, T> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Last reported counter, `None` until the first report.
    pub fn current(&self) -> Option<u64> {
        self.bar.current()
    }

    pub fn total(&self) -> u64 {
        self.bar.total()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Outcome of a get-or-create lookup.
///
/// Only `Created` has reserved a terminal line.
enum Upsert<'a, K, T> {
    Found(&'a mut Entry<K, T>),
    Created(&'a mut Entry<K, T>),
}

impl<'a, K, T> Upsert<'a, K, T> {
    fn into_entry(self) -> &'a mut Entry<K, T> {
        match self {
            Upsert::Found(entry) | Upsert::Created(entry) => entry,
        }
    }
}

/// Insertion-ordered registry of single-line bars sharing one output stream.
pub struct MultiProgressBar<K, T, W: Write> {
    template: String,
    options: BarOptions,
    stream: W,
    entries: Vec<Entry<K, T>>,
    index: HashMap<K, usize>,
    cursor_hidden: bool,
}

impl<K, T, W> MultiProgressBar<K, T, W>
where
    K: Eq + Hash + Clone,
    T: BarData,
    W: Write,
{
    /// Create a registry with default bar options.
    pub fn new(template: impl Into<String>, stream: W) -> Self {
        Self::with_options(template, stream, BarOptions::default())
    }

    pub fn with_options(template: impl Into<String>, stream: W, options: BarOptions) -> Self {
        Self {
            template: template.into(),
            options,
            stream,
            entries: Vec::new(),
            index: HashMap::new(),
            cursor_hidden: false,
        }
    }

    pub fn options(&self) -> &BarOptions {
        &self.options
    }

    /// The underlying output stream.
    pub fn get_ref(&self) -> &W {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.stream
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.entry(key).map(Entry::payload)
    }

    pub fn entry(&self, key: &K) -> Option<&Entry<K, T>> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry<K, T>> {
        self.entries.iter()
    }

    /// Register a new key and reserve its line.
    ///
    /// Callers normally use [`update`](Self::update), which does this on
    /// first sight. Adding a key twice keeps the existing entry and only
    /// replaces its payload.
    pub fn add(&mut self, key: K, payload: T) -> io::Result<()> {
        self.upsert(key, payload).map(|_| ())
    }

    /// Upsert `key`, replace its payload and optionally its counters.
    ///
    /// `total` is applied before `current`, which is clamped into
    /// `[0, total]`. Nothing is drawn until the next render.
    pub fn update(
        &mut self,
        key: K,
        payload: T,
        current: Option<i64>,
        total: Option<u64>,
    ) -> io::Result<()> {
        let entry = self.upsert(key, payload)?.into_entry();
        if let Some(total) = total {
            entry.bar.set_total(total);
        }
        if let Some(current) = current {
            entry.bar.set_current(current);
        }
        Ok(())
    }

    /// Mark `key` as completed. Unknown keys are ignored.
    pub fn complete(&mut self, key: &K) {
        if let Some(&i) = self.index.get(key) {
            self.entries[i].completed = true;
        }
    }

    /// Repaint every entry in insertion order.
    pub fn render(&mut self) -> io::Result<()> {
        self.render_limited(usize::MAX)
    }

    /// Repaint at most `max_lines` entries in insertion order.
    pub fn render_limited(&mut self, max_lines: usize) -> io::Result<()> {
        let order: Vec<usize> = (0..self.entries.len()).collect();
        self.draw(&order, max_lines)
    }

    /// Repaint at most `max_lines` entries ordered by `compare` over payloads.
    ///
    /// The sort only affects this pass; insertion order is untouched.
    pub fn render_sorted_by<F>(&mut self, max_lines: usize, mut compare: F) -> io::Result<()>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by(|&a, &b| compare(&self.entries[a].payload, &self.entries[b].payload));
        self.draw(&order, max_lines)
    }

    /// Finish every bar and forget all entries.
    ///
    /// With `clear` set the region is erased and the cursor returns to its
    /// first line; otherwise the last frame stays on screen and the cursor
    /// stays below it. The registry is reusable afterwards.
    pub fn terminate(&mut self) -> io::Result<()> {
        let lines = self.entries.len() as isize;
        let clear = self.options.clear;
        if clear && lines > 0 {
            cursor::move_vertical(&mut self.stream, -lines)?;
            cursor::move_to_column(&mut self.stream, 0)?;
        }
        for entry in &self.entries {
            entry.bar.terminate(&mut self.stream, clear)?;
            if clear {
                cursor::move_vertical(&mut self.stream, 1)?;
            }
        }
        if clear && lines > 0 {
            cursor::move_vertical(&mut self.stream, -lines)?;
            cursor::move_to_column(&mut self.stream, 0)?;
        }
        if self.cursor_hidden {
            cursor::show_cursor(&mut self.stream)?;
            self.cursor_hidden = false;
        }

        tracing::debug!(target: "progress", "terminated {lines} bars");
        self.entries.clear();
        self.index.clear();
        self.stream.flush()
    }

    fn upsert(&mut self, key: K, payload: T) -> io::Result<Upsert<'_, K, T>> {
        if let Some(&i) = self.index.get(&key) {
            let entry = &mut self.entries[i];
            entry.payload = payload;
            return Ok(Upsert::Found(entry));
        }

        cursor::reserve_line(&mut self.stream)?;
        let i = self.entries.len();
        self.index.insert(key.clone(), i);
        self.entries.push(Entry {
            key,
            payload,
            bar: LineBar::new(),
            completed: false,
        });
        Ok(Upsert::Created(&mut self.entries[i]))
    }

    fn draw(&mut self, order: &[usize], max_lines: usize) -> io::Result<()> {
        let lines = self.entries.len();
        if lines == 0 {
            return Ok(());
        }
        if self.options.hide_cursor && !self.cursor_hidden {
            cursor::hide_cursor(&mut self.stream)?;
            self.cursor_hidden = true;
        }

        cursor::move_vertical(&mut self.stream, -(lines as isize))?;
        cursor::move_to_column(&mut self.stream, 0)?;

        let mut drawn = 0;
        for &i in order.iter().take(max_lines) {
            let entry = &self.entries[i];
            entry
                .bar
                .render(&mut self.stream, &self.template, &entry.payload, &self.options)?;
            cursor::move_vertical(&mut self.stream, 1)?;
            cursor::move_to_column(&mut self.stream, 0)?;
            drawn += 1;
        }

        // Undrawn lines keep their old frame; step over them so the cursor
        // still ends below the region.
        if drawn < lines {
            tracing::trace!(target: "progress", "drew {drawn} of {lines} lines");
            cursor::move_vertical(&mut self.stream, (lines - drawn) as isize)?;
        }
        self.stream.flush()
    }
}

impl<K, T, W: Write> Drop for MultiProgressBar<K, T, W> {
    fn drop(&mut self) {
        if self.cursor_hidden {
            let _ = cursor::show_cursor(&mut self.stream);
            let _ = self.stream.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Job {
        name: &'static str,
        priority: i32,
    }

    impl BarData for Job {
        fn tokens(&self) -> Vec<(&str, String)> {
            vec![("name", self.name.to_string())]
        }
    }

    fn job(name: &'static str, priority: i32) -> Job {
        Job { name, priority }
    }

    fn bars() -> MultiProgressBar<u32, Job, Vec<u8>> {
        let options = BarOptions::default().hide_cursor(false);
        MultiProgressBar::with_options(":name", Vec::new(), options)
    }

    fn take_output(bars: &mut MultiProgressBar<u32, Job, Vec<u8>>) -> String {
        let out = String::from_utf8(bars.get_ref().clone()).unwrap();
        bars.get_mut().clear();
        out
    }

    /// Names in the order they were drawn.
    fn drawn_names(out: &str) -> Vec<String> {
        out.split("\x1b[1G")
            .filter_map(|chunk| chunk.strip_suffix("\x1b[0K\x1b[1B"))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_update_inserts_unseen_key() {
        let mut bars = bars();
        assert!(!bars.has(&7));

        bars.update(7, job("build", 0), None, None).unwrap();

        assert!(bars.has(&7));
        assert_eq!(bars.get(&7), Some(&job("build", 0)));
        let entry = bars.entry(&7).unwrap();
        assert_eq!(entry.current(), None);
        assert_eq!(entry.total(), 1);
        assert!(!entry.is_completed());
    }

    #[test]
    fn test_only_new_keys_reserve_a_line() {
        let mut bars = bars();
        bars.add(1, job("a", 0)).unwrap();
        bars.update(2, job("b", 0), None, None).unwrap();
        assert_eq!(take_output(&mut bars), "\n\n");

        bars.update(1, job("a2", 0), Some(1), None).unwrap();
        bars.add(2, job("b2", 0)).unwrap();
        assert_eq!(take_output(&mut bars), "");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars.get(&1), Some(&job("a2", 0)));
        assert_eq!(bars.get(&2), Some(&job("b2", 0)));
    }

    #[test]
    fn test_update_clamps_current() {
        let mut bars = bars();
        bars.update(1, job("a", 0), Some(150), Some(100)).unwrap();
        assert_eq!(bars.entry(&1).unwrap().current(), Some(100));

        bars.update(1, job("a", 0), Some(-5), Some(100)).unwrap();
        assert_eq!(bars.entry(&1).unwrap().current(), Some(0));
    }

    #[test]
    fn test_completion_survives_updates() {
        let mut bars = bars();
        bars.update(1, job("a", 0), Some(1), Some(4)).unwrap();
        bars.complete(&1);
        bars.update(1, job("a", 1), Some(2), Some(4)).unwrap();

        let entry = bars.entry(&1).unwrap();
        assert!(entry.is_completed());
        assert_eq!(entry.current(), Some(2));
        assert_eq!(entry.payload(), &job("a", 1));
    }

    #[test]
    fn test_complete_unknown_key_is_noop() {
        let mut bars = bars();
        bars.complete(&9);
        assert!(!bars.has(&9));
        assert!(bars.is_empty());
    }

    #[test]
    fn test_render_draws_all_in_insertion_order() {
        let mut bars = bars();
        for (key, name) in [(3, "c"), (1, "a"), (2, "b")] {
            bars.update(key, job(name, 0), None, None).unwrap();
        }
        take_output(&mut bars);

        bars.render().unwrap();
        let out = take_output(&mut bars);

        assert!(out.starts_with("\x1b[3A\x1b[1G"));
        assert_eq!(drawn_names(&out), vec!["c", "a", "b"]);
        assert!(out.ends_with("\x1b[1B\x1b[1G"));
    }

    #[test]
    fn test_render_limited_draws_at_most_max_lines() {
        let mut bars = bars();
        for (key, name) in [(1, "a"), (2, "b"), (3, "c")] {
            bars.update(key, job(name, 0), None, None).unwrap();
        }
        take_output(&mut bars);

        bars.render_limited(5).unwrap();
        assert_eq!(drawn_names(&take_output(&mut bars)), vec!["a", "b", "c"]);

        bars.update(1, job("a1", 0), None, None).unwrap();
        bars.update(2, job("b1", 0), None, None).unwrap();
        bars.render_limited(1).unwrap();
        let out = take_output(&mut bars);
        assert_eq!(drawn_names(&out), vec!["a1"]);
        // cursor steps over the two undrawn lines
        assert!(out.ends_with("\x1b[1B\x1b[1G\x1b[2B"));
    }

    #[test]
    fn test_render_sorted_is_a_view() {
        let mut bars = bars();
        bars.update(1, job("three", 3), None, None).unwrap();
        bars.update(2, job("one", 1), None, None).unwrap();
        bars.update(3, job("two", 2), None, None).unwrap();
        take_output(&mut bars);

        bars.render_sorted_by(usize::MAX, |a, b| a.priority.cmp(&b.priority))
            .unwrap();
        let out = take_output(&mut bars);
        assert_eq!(drawn_names(&out), vec!["one", "two", "three"]);

        let priorities: Vec<i32> = bars.entries().map(|e| e.payload().priority).collect();
        assert_eq!(priorities, vec![3, 1, 2]);
    }

    #[test]
    fn test_render_with_no_entries_writes_nothing() {
        let mut bars = bars();
        bars.render().unwrap();
        assert!(bars.get_ref().is_empty());
    }

    #[test]
    fn test_hidden_cursor_is_restored_on_terminate() {
        let mut bars: MultiProgressBar<u32, Job, Vec<u8>> =
            MultiProgressBar::with_options(":name", Vec::new(), BarOptions::default().clear(false));
        bars.update(1, job("a", 0), None, None).unwrap();
        bars.render().unwrap();
        bars.render().unwrap();
        bars.terminate().unwrap();

        let out = String::from_utf8(bars.get_ref().clone()).unwrap();
        assert_eq!(out.matches("\x1b[?25l").count(), 1);
        assert!(out.ends_with("\x1b[?25h"));
    }

    #[test]
    fn test_terminate_clears_region_and_resets() {
        let mut bars = bars();
        bars.update(1, job("a", 0), None, None).unwrap();
        bars.update(2, job("b", 0), None, None).unwrap();
        bars.render().unwrap();
        take_output(&mut bars);

        bars.terminate().unwrap();
        let out = take_output(&mut bars);
        assert_eq!(
            out,
            "\x1b[2A\x1b[1G\x1b[2K\x1b[1G\x1b[1B\x1b[2K\x1b[1G\x1b[1B\x1b[2A\x1b[1G"
        );
        assert!(!bars.has(&1));
        assert!(!bars.has(&2));
        assert!(bars.is_empty());

        bars.update(1, job("again", 0), None, None).unwrap();
        assert_eq!(take_output(&mut bars), "\n");
        let entry = bars.entry(&1).unwrap();
        assert_eq!(entry.total(), 1);
        assert_eq!(entry.current(), None);
        assert!(!entry.is_completed());
    }
}
