use super::{
    parse_anchor, parse_escaped, parse_escaped_character, parse_line_break, parse_nodes,
    parse_paragraph, parse_quote, Element,
};
use cool_asserts::assert_matches;

#[test]
fn parse_url() {
    let anchor = r#"<a href="http://www.example.com">Example</a><br/>"#;

    let (rest, Element::Link(anchor)) = parse_anchor(anchor).unwrap() else {
        panic!("Wrong type");
    };

    assert!(anchor.attributes.len() == 1);
    assert_eq!(anchor.attributes[0].value, "http://www.example.com");
    assert_eq!(anchor.children, "Example");
    assert_eq!(rest, "<br/>");
}

#[test]
fn parse_url_with_rel() {
    let anchor = r#"<a target="_blank" href="http://www.example.com">Example</a>"#;

    let (rest, Element::Link(anchor)) = parse_anchor(anchor).unwrap() else {
        panic!("Wrong type");
    };

    assert!(anchor.attributes.len() == 2);
    assert_eq!(anchor.attributes[1].value, "http://www.example.com");
    assert!(rest.is_empty());
}

#[test]
fn quote() {
    let q = r#""hello""#;

    let (rest, v) = parse_quote(q).unwrap();

    assert_eq!(v, "hello");
    assert!(rest.is_empty());
}

#[test]
fn escaped_slash() {
    let s = "&#x2F;some more stuff";

    let (rest, el) = parse_escaped(s).unwrap();

    assert!(matches!(el, Element::Escaped('/')));
    assert_eq!(rest, "some more stuff");
}

#[test]
fn escaped_decimal() {
    let s = "&#62;tail";

    let (rest, c) = parse_escaped_character(s).unwrap();

    assert_eq!(c, '>');
    assert_eq!(rest, "tail");
}

#[test]
fn paragraph() {
    let s = "<P>some more stuff";

    let (rest, el) = parse_paragraph(s).unwrap();

    assert!(matches!(el, Element::Paragraph));
    assert_eq!(rest, "some more stuff");
}

#[test]
fn line_break_variants() {
    for s in ["<br>x", "<br/>x", "<br />x", "<BR>x"] {
        let (rest, el) = parse_line_break(s).unwrap();
        assert!(matches!(el, Element::LineBreak));
        assert_eq!(rest, "x");
    }
}

#[test]
fn mixed_elements() {
    let s = r#"123h&#x2F; <P>&#x2F;&#x23;<P>Hello<P>
            <a href="some url">some link</a>"#;

    let (rest, elements) = parse_nodes(s).expect("parses");

    assert!(rest.is_empty());
    assert_matches!(elements.first(), Some(Element::Text("123h")));
    assert!(elements
        .iter()
        .any(|el| matches!(el, Element::Link(_))));
}
