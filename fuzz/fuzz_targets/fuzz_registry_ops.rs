#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sitekit_dom::{Document, NodeId};
use sitekit_runtime::{Component, RuntimeContext};

const POOL: usize = 16;

#[derive(Arbitrary, Debug)]
enum Op {
    Attach { node: u8, parent: u8 },
    Detach { node: u8 },
    Replace { old: u8, new: u8 },
    Mark { node: u8, observable: bool },
    Flush,
    ContentLoaded { node: u8 },
}

struct Widget;
impl Component for Widget {}

fuzz_target!(|ops: Vec<Op>| {
    let doc = Document::new();
    let tags = ["div", "svg", "section", "iframe"];
    let pool: Vec<NodeId> = (0..POOL)
        .map(|i| {
            let builder = doc.element(tags[i % tags.len()]);
            if i % 3 == 0 {
                builder.attr("data-widget", "").finish()
            } else {
                builder.finish()
            }
        })
        .collect();
    let pick = |i: u8| pool[usize::from(i) % POOL];
    let parent = |i: u8| {
        if usize::from(i) % (POOL + 1) == POOL {
            doc.body()
        } else {
            pick(i)
        }
    };

    let ctx = RuntimeContext::new(doc.clone());
    let registry = ctx.register_infallible("[data-widget]", |_, _| Widget).unwrap();

    for op in ops.iter().take(128) {
        match *op {
            Op::Attach { node, parent: p } => {
                let _ = doc.append_child(parent(p), pick(node));
            }
            Op::Detach { node } => {
                let _ = doc.detach(pick(node));
            }
            Op::Replace { old, new } => {
                let _ = doc.replace_with(pick(old), pick(new));
            }
            Op::Mark { node, observable } => {
                let _ = ctx
                    .watcher()
                    .set_element_observable_state(pick(node), observable);
            }
            Op::Flush => {
                ctx.flush().unwrap();
            }
            Op::ContentLoaded { node } => {
                ctx.dispatch_content_loaded(pick(node)).unwrap();
            }
        }
    }

    // Filtered batches may leave stale entries; a direct reconcile may not.
    registry.reconcile().unwrap();
    for el in registry.elements() {
        assert!(doc.contains(doc.body(), el));
    }
    assert_eq!(ctx.claims().len(), registry.len());
});
