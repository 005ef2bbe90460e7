//! ANSI cursor helpers for redrawing a multi-line region in place.
//!
//! Every function writes an escape sequence to the given stream and nothing
//! else. None of them know where the cursor is: the caller tracks how many
//! lines it occupies and moves relative to that.

use std::io::{self, Write};

const CSI: &str = "\x1b[";
const CURSOR_HIDE: &str = "\x1b[?25l";
const CURSOR_SHOW: &str = "\x1b[?25h";
const ERASE_LINE: &str = "\x1b[2K";
const ERASE_LINE_RIGHT: &str = "\x1b[0K";

/// Move the cursor up (`dy < 0`) or down (`dy > 0`) by `|dy|` lines.
///
/// The column is left unchanged. A zero delta writes nothing.
pub fn move_vertical<W: Write + ?Sized>(w: &mut W, dy: isize) -> io::Result<()> {
    match dy {
        0 => Ok(()),
        up if up < 0 => write!(w, "{CSI}{}A", up.unsigned_abs()),
        down => write!(w, "{CSI}{down}B"),
    }
}

/// Move the cursor to a zero-based column on the current line.
pub fn move_to_column<W: Write + ?Sized>(w: &mut W, column: usize) -> io::Result<()> {
    write!(w, "{CSI}{}G", column + 1)
}

/// Claim one more line below the cursor.
///
/// Unlike [`move_vertical`], a newline scrolls the screen when the cursor is
/// already on the last row, so the reserved line always exists.
pub fn reserve_line<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    w.write_all(b"\n")
}

/// Erase the whole current line. The cursor does not move.
pub fn erase_line<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    w.write_all(ERASE_LINE.as_bytes())
}

/// Erase from the cursor to the end of the current line.
pub fn erase_line_right<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    w.write_all(ERASE_LINE_RIGHT.as_bytes())
}

pub fn hide_cursor<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    w.write_all(CURSOR_HIDE.as_bytes())
}

pub fn show_cursor<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    w.write_all(CURSOR_SHOW.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_vertical_moves() {
        assert_eq!(written(|w| move_vertical(w, -3)), "\x1b[3A");
        assert_eq!(written(|w| move_vertical(w, 2)), "\x1b[2B");
        assert_eq!(written(|w| move_vertical(w, 0)), "");
    }

    #[test]
    fn test_column_is_one_based_on_the_wire() {
        assert_eq!(written(|w| move_to_column(w, 0)), "\x1b[1G");
        assert_eq!(written(|w| move_to_column(w, 9)), "\x1b[10G");
    }

    #[test]
    fn test_reserve_line_is_a_newline() {
        assert_eq!(written(|w| reserve_line(w)), "\n");
    }
}
