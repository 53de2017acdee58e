#![no_main]

use libfuzzer_sys::fuzz_target;
use sitekit_dom::{Document, SelectorList};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if input.len() > 1024 {
        return;
    }
    let Ok(list) = SelectorList::parse(input) else {
        return;
    };
    // The trimmed source must parse to the same list.
    let reparsed = SelectorList::parse(list.source()).expect("source reparses");
    assert_eq!(reparsed, list);

    let doc = Document::new();
    let el = doc
        .element("div")
        .id("a")
        .class("b c")
        .attr("data-x", "y-z")
        .child(doc.element("span"))
        .finish();
    doc.append_child(doc.body(), el).unwrap();
    let _ = doc.select_all(doc.document_node(), &list);
    let _ = doc.closest_list(el, &list);
});
