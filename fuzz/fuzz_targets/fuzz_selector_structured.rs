#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sitekit_dom::SelectorList;

#[derive(Arbitrary, Debug)]
enum Token {
    Tag(u8),
    Universal,
    Id(u8),
    Class(u8),
    Attr { name: u8, op: u8, value: u8, quoted: bool },
    Descendant,
    Child,
    Comma,
    Raw(u8),
}

const NAMES: [&str; 6] = ["div", "span", "data-x", "a", "SVG", "x-1"];
const OPS: [&str; 8] = ["", "=", "~=", "^=", "$=", "*=", "|=", "=="];

impl Token {
    fn write(&self, out: &mut String) {
        let name = |i: u8| NAMES[usize::from(i) % NAMES.len()];
        match self {
            Token::Tag(i) => out.push_str(name(*i)),
            Token::Universal => out.push('*'),
            Token::Id(i) => {
                out.push('#');
                out.push_str(name(*i));
            }
            Token::Class(i) => {
                out.push('.');
                out.push_str(name(*i));
            }
            Token::Attr {
                name: n,
                op,
                value,
                quoted,
            } => {
                out.push('[');
                out.push_str(name(*n));
                let op = OPS[usize::from(*op) % OPS.len()];
                out.push_str(op);
                if !op.is_empty() {
                    if *quoted {
                        out.push('"');
                        out.push_str(name(*value));
                        out.push('"');
                    } else {
                        out.push_str(name(*value));
                    }
                }
                out.push(']');
            }
            Token::Descendant => out.push(' '),
            Token::Child => out.push_str(" > "),
            Token::Comma => out.push_str(", "),
            Token::Raw(b) => out.push(char::from(b & 0x7f)),
        }
    }
}

fuzz_target!(|tokens: Vec<Token>| {
    let mut input = String::new();
    for token in tokens.iter().take(64) {
        token.write(&mut input);
    }
    if let Ok(list) = SelectorList::parse(&input) {
        assert!(!list.is_empty());
        assert_eq!(list.to_string(), input.trim());
    }
});
