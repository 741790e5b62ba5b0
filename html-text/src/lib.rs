//! Render item HTML into plain text suitable for embedding.
//!
//! Handles the subset of markup the forum produces:
//!
//! - `<p>` paragraph breaks
//! - `<i>`, `<b>` styled text
//! - `<a>` anchors
//! - `<pre><code></code></pre>` code blocks
//! - `&..;` escaped entities
use log::{error, warn};

mod parser;

/// An html attribute name value pair.
#[derive(Debug, Clone)]
pub struct Attribute<'a> {
    pub name: &'a str,
    pub value: String,
}

/// An html anchor tag.
#[derive(Debug, Clone)]
pub struct Anchor<'a> {
    /// Anchor attributes.
    pub attributes: Vec<Attribute<'a>>,
    /// Child elements.
    pub children: String,
}

/// A simple Html element.
#[derive(Debug, Clone)]
pub enum Element<'a> {
    /// Regular text.
    Text(&'a str),
    /// A link.
    Link(Anchor<'a>),
    /// Html escaped character
    Escaped(char),
    /// Paragraph tag.
    Paragraph,
    /// Line break.
    LineBreak,
    /// Source code block.
    Code(String),
    /// Italic text.
    Italic(Vec<Element<'a>>),
    /// Bold text.
    Bold(Vec<Element<'a>>),
}

/// Parse the input str into elements.
pub fn parse_elements(input: &str) -> Vec<Element> {
    parser::parse_nodes(input)
        .inspect(|(rest, _)| {
            if !rest.is_empty() {
                warn!("Unparsed text left over: \"{rest}\"")
            }
        })
        .map(|(_, v)| v)
        .unwrap_or_else(|err| {
            error!("Failed to parse input: {err}");
            vec![Element::Text(input)]
        })
}

/// Render the item markup as plain text. Tags are dropped, paragraph and
/// line break tags become newlines and escaped entities are replaced with
/// the character they stand for. Windows line endings are normalized.
pub fn plain_text(input: &str) -> String {
    let normalized;
    let input = if input.contains('\r') {
        normalized = input.replace("\r\n", "\n");
        &normalized
    } else {
        input
    };

    let mut out = String::with_capacity(input.len());
    render_elements(&parse_elements(input), &mut out);
    out
}

fn render_elements(elements: &[Element], out: &mut String) {
    for element in elements {
        match element {
            Element::Text(text) => out.push_str(text),
            Element::Link(anchor) => out.push_str(&anchor.children),
            Element::Escaped(c) => out.push(*c),
            Element::Paragraph | Element::LineBreak => out.push('\n'),
            Element::Code(code) => {
                out.push_str(code);
                out.push('\n');
            }
            Element::Italic(children) | Element::Bold(children) => {
                render_elements(children, out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::plain_text;

    #[test]
    fn strips_tags() {
        let s = "I agree.<p>But consider <i>this</i> case: \
                 <a href=\"https://example.com/doc\">the docs</a>";

        assert_eq!(plain_text(s), "I agree.\nBut consider this case: the docs");
    }

    #[test]
    fn unescapes_entities() {
        let s = "a &gt; b &amp;&amp; b &lt; c &#x2F; d";

        assert_eq!(plain_text(s), "a > b && b < c / d");
    }

    #[test]
    fn code_block() {
        let s = "look:<pre><code>let x = 1;</code></pre>done";

        assert_eq!(plain_text(s), "look:let x = 1;\ndone");
    }

    #[test]
    fn normalizes_line_endings() {
        assert_eq!(plain_text("one\r\ntwo"), "one\ntwo");
    }

    #[test]
    fn plain_input_unchanged() {
        assert_eq!(plain_text("no markup here"), "no markup here");
    }
}
