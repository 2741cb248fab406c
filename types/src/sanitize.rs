//! Sanitization of untrusted text before it reaches a terminal or the model.
//!
//! Tool output and tool arguments both originate outside our control: a
//! subprocess can print terminal escape sequences, and a model can emit paths
//! padded with invisible characters. Everything here is pure and allocation-free
//! on the clean path.

use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';

/// Whether `c` is invisible or reorders text without being visible itself.
///
/// Covers zero-width joiners/spaces, bidi embedding/override/isolate controls,
/// Unicode tag characters, variation selectors, and the filler code points
/// commonly used to smuggle content past a human reviewer.
#[must_use]
pub fn is_steganographic_char(c: char) -> bool {
    matches!(
        c,
        '\u{00ad}'
            | '\u{034f}'
            | '\u{061c}'
            | '\u{115f}'
            | '\u{1160}'
            | '\u{17b4}'
            | '\u{17b5}'
            | '\u{180b}'..='\u{180f}'
            | '\u{200b}'..='\u{200f}'
            | '\u{202a}'..='\u{202e}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{3164}'
            | '\u{fe00}'..='\u{fe0f}'
            | '\u{feff}'
            | '\u{ffa0}'
            | '\u{e0000}'..='\u{e007f}'
            | '\u{e0100}'..='\u{e01ef}'
    )
}

/// Whether `c` must never appear in a filesystem path handed to a tool.
///
/// C0/C1 controls and DEL, plus everything [`is_steganographic_char`] flags.
#[must_use]
pub fn is_unsafe_path_char(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{001f}' | '\u{007f}' | '\u{0080}'..='\u{009f}')
        || is_steganographic_char(c)
}

/// Strip escape sequences, disallowed controls and invisible characters.
///
/// Newlines, tabs and carriage returns survive. Clean input is returned
/// borrowed.
#[must_use]
pub fn sanitize_terminal_text(input: &str) -> Cow<'_, str> {
    if !input.chars().any(needs_stripping) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ESC => skip_escape(&mut chars),
            // C1 CSI behaves like ESC [ on some terminals.
            '\u{009b}' => skip_csi(&mut chars),
            '\n' | '\t' | '\r' => out.push(c),
            c if needs_stripping(c) => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn needs_stripping(c: char) -> bool {
    match c {
        '\n' | '\t' | '\r' => false,
        '\u{0000}'..='\u{001f}' | '\u{007f}' | '\u{0080}'..='\u{009f}' => true,
        c => is_steganographic_char(c),
    }
}

type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn skip_escape(chars: &mut Chars<'_>) {
    match chars.peek().copied() {
        Some('[') => {
            chars.next();
            skip_csi(chars);
        }
        Some(']') => {
            chars.next();
            skip_string_sequence(chars, true);
        }
        Some('P' | '^' | '_') => {
            chars.next();
            skip_string_sequence(chars, false);
        }
        Some('(' | ')' | '*' | '+' | '#' | ' ') => {
            chars.next();
            chars.next();
        }
        Some('7' | '8' | 'c' | 'D' | 'E' | 'H' | 'M' | 'N' | 'O' | 'Z' | '=' | '>' | '<') => {
            chars.next();
        }
        _ => {}
    }
}

/// CSI: parameter/intermediate bytes (0x20-0x3F) then one final byte (0x40-0x7E).
fn skip_csi(chars: &mut Chars<'_>) {
    while let Some(&c) = chars.peek() {
        if ('\x40'..='\x7e').contains(&c) {
            chars.next();
            return;
        }
        if !('\x20'..='\x3f').contains(&c) {
            return;
        }
        chars.next();
    }
}

/// OSC/DCS/PM/APC bodies end at ST (`ESC \`); OSC may also end at BEL.
fn skip_string_sequence(chars: &mut Chars<'_>, bel_terminates: bool) {
    while let Some(c) = chars.next() {
        if bel_terminates && c == BEL {
            return;
        }
        if c == ESC && chars.peek() == Some(&'\\') {
            chars.next();
            return;
        }
    }
}
