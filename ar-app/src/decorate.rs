//! Outbound text decoration.
//!
//! Replies can be framed in a unicode box so they stand out in busy
//! chats. The frame width tracks the longest line, clamped so short
//! replies still get a readable box and long ones do not blow up chat
//! layout.

const MIN_WIDTH: usize = 22;
const MAX_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderStyle {
    None,
    Rounded,
}

pub struct Decorator {
    style: BorderStyle,
}

impl Decorator {
    pub fn new(style: BorderStyle) -> Self {
        Self { style }
    }

    /// Apply the configured frame. `BorderStyle::None` passes text
    /// through untouched.
    pub fn decorate(&self, text: &str) -> String {
        match self.style {
            BorderStyle::None => text.to_string(),
            BorderStyle::Rounded => frame_rounded(text),
        }
    }
}

fn frame_rounded(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let width = (longest + 6).clamp(MIN_WIDTH, MAX_WIDTH);
    let inner = width - 2;

    let mut out = String::new();
    out.push('╭');
    out.push_str(&"─".repeat(inner));
    out.push_str("╮\n");
    for line in &lines {
        let len = line.chars().count();
        let pad = inner.saturating_sub(len + 2);
        let left = pad / 2;
        let right = pad - left;
        out.push_str("│ ");
        out.push_str(&" ".repeat(left));
        out.push_str(line);
        out.push_str(&" ".repeat(right));
        out.push_str(" │\n");
    }
    out.push('╰');
    out.push_str(&"─".repeat(inner));
    out.push('╯');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_style_is_a_passthrough() {
        let decorator = Decorator::new(BorderStyle::None);
        assert_eq!(decorator.decorate("hello"), "hello");
    }

    #[test]
    fn rounded_frame_wraps_the_text() {
        let decorator = Decorator::new(BorderStyle::Rounded);
        let framed = decorator.decorate("hello");
        assert!(framed.starts_with('╭'));
        assert!(framed.ends_with('╯'));
        assert!(framed.contains("hello"));
    }

    #[test]
    fn width_is_clamped_between_bounds() {
        let decorator = Decorator::new(BorderStyle::Rounded);

        let short = decorator.decorate("hi");
        let top = short.lines().next().expect("top line");
        assert_eq!(top.chars().count(), MIN_WIDTH);

        let long = decorator.decorate(&"x".repeat(200));
        let top = long.lines().next().expect("top line");
        assert_eq!(top.chars().count(), MAX_WIDTH);
    }

    #[test]
    fn frame_width_is_uniform_across_lines() {
        let decorator = Decorator::new(BorderStyle::Rounded);
        let framed = decorator.decorate("first line\nsecond, longer line");
        let widths: Vec<usize> = framed.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }
}
