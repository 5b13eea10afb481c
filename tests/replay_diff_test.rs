use serde_json::json;

use tracetree::replay::{
    extract_diff_mutations, extract_diff_mutations_until, parse_recording, AddedNode, DiffRecord,
    DomMirror, FrameKind, FrameRange, MutationData, RemovedNode, ReplayFrame, ReplayPlayer,
    SerializedNode, VirtualDom,
};

fn element(
    id: u64,
    tag: &str,
    attributes: serde_json::Value,
    children: Vec<serde_json::Value>,
) -> serde_json::Value {
    json!({"type": 2, "id": id, "tagName": tag, "attributes": attributes, "childNodes": children})
}

fn text(id: u64, content: &str) -> serde_json::Value {
    json!({"type": 3, "id": id, "textContent": content})
}

/// Document used by all tests:
/// <html><body><div id="app"><ul class="list"><li class="item">one</li></ul></div></body></html>
fn snapshot_event(timestamp: f64) -> serde_json::Value {
    let item = element(6, "li", json!({"class": "item"}), vec![text(7, "one")]);
    let list = element(5, "ul", json!({"class": "list"}), vec![item]);
    let app = element(4, "div", json!({"id": "app"}), vec![list]);
    let body = element(3, "body", json!({}), vec![app]);
    let html = element(2, "html", json!({}), vec![body]);
    let document = json!({"type": 0, "id": 1, "childNodes": [html]});
    json!({"type": 2, "timestamp": timestamp, "data": {"node": document}})
}

fn add(parent_id: u64, next_id: Option<u64>, node: serde_json::Value) -> serde_json::Value {
    json!({"parentId": parent_id, "nextId": next_id, "node": node})
}

fn mutation_event(timestamp: f64, data: serde_json::Value) -> serde_json::Value {
    let mut data = data;
    data["source"] = json!(0);
    json!({"type": 3, "timestamp": timestamp, "data": data})
}

fn recording() -> String {
    let new_item = element(8, "li", json!({"class": "item active"}), vec![text(9, "two")]);
    json!([
        snapshot_event(1000.0),
        // Replace the list item, mark the app as loaded. Node 99 doesn't exist.
        mutation_event(2000.0, json!({
            "removes": [{"parentId": 5, "id": 6}, {"parentId": 5, "id": 99}],
            "adds": [add(5, None, new_item)],
            "attributes": [{"id": 4, "attributes": {"class": "loaded"}}],
            "texts": []
        })),
        {"type": 4, "timestamp": 2500.0, "data": {"href": "https://example.com"}},
        // Add a span and, separately, its text. The text is covered by the span.
        mutation_event(3000.0, json!({
            "adds": [
                add(4, None, element(10, "span", json!({}), vec![])),
                add(10, None, text(11, "hi"))
            ]
        })),
        // Outside of the range used by the tests.
        mutation_event(5000.0, json!({
            "removes": [{"parentId": 4, "id": 10}]
        })),
    ])
    .to_string()
}

#[test]
fn test_extract_diff_for_range() {
    let frames = parse_recording(&recording()).unwrap();
    let mut player = VirtualDom::new();

    let records = extract_diff_mutations(
        &frames,
        FrameRange {
            start: 1500.0,
            end: 4000.0,
        },
        1000.0,
        &mut player,
    );

    assert_eq!(records.keys().copied().collect::<Vec<_>>(), vec![1, 3]);

    let first = &records[&1];
    assert_eq!(first.offset, 1000.0);
    assert_eq!(first.removes.len(), 1);
    let removed = &first.removes["div#app > ul.list > li.item"];
    assert_eq!(
        removed.html_before.as_deref(),
        Some("<li class=\"item\">one</li>")
    );
    assert_eq!(removed.html_after, None);

    // Adds are resolved after the frame was applied, the class change of the app is visible.
    let added = &first.adds["div#app.loaded > ul.list > li.item.active"];
    assert_eq!(
        added.html_after.as_deref(),
        Some("<li class=\"item active\">two</li>")
    );

    // The selector is computed after the change, with the new class.
    let changed = &first.attributes["div#app.loaded"];
    assert_eq!(changed.changed, vec!["class".to_string()]);
    assert!(changed
        .snapshot
        .html_before
        .as_deref()
        .unwrap()
        .starts_with("<div id=\"app\">"));
    assert!(changed
        .snapshot
        .html_after
        .as_deref()
        .unwrap()
        .starts_with("<div class=\"loaded\" id=\"app\">"));

    let second = &records[&3];
    assert_eq!(second.offset, 2000.0);
    assert_eq!(second.adds.len(), 1);
    assert_eq!(
        second.adds["div#app.loaded > span"].html_after.as_deref(),
        Some("<span>hi</span>")
    );
    assert!(second.removes.is_empty());

    // Frames after the range are not applied.
    assert!(player.mirror().node(10).is_some());
}

#[test]
fn test_stop_visiting() {
    let frames = parse_recording(&recording()).unwrap();
    let mut player = VirtualDom::new();
    let mut visited = Vec::new();

    let records = extract_diff_mutations_until(
        &frames,
        FrameRange {
            start: 1500.0,
            end: 4000.0,
        },
        1000.0,
        &mut player,
        |index, _| {
            visited.push(index);
            visited.len() <= 1
        },
    );

    assert_eq!(records.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(visited, vec![1, 2]);
}

#[test]
fn test_frames_are_visited_in_time_order() {
    let mut events: Vec<serde_json::Value> = serde_json::from_str(&recording()).unwrap();
    events.reverse();
    let frames = parse_recording(&serde_json::Value::Array(events).to_string()).unwrap();
    let mut player = VirtualDom::new();

    let records = extract_diff_mutations(
        &frames,
        FrameRange {
            start: 1500.0,
            end: 4000.0,
        },
        1000.0,
        &mut player,
    );

    // Indexes refer to the reversed list.
    assert_eq!(records.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    assert!(records[&3].removes.contains_key("div#app > ul.list > li.item"));
    assert!(records[&1].adds.contains_key("div#app.loaded > span"));
}

#[test]
fn test_empty_recording() {
    let mut player = VirtualDom::new();
    let records = extract_diff_mutations(
        &[],
        FrameRange {
            start: 0.0,
            end: 1.0,
        },
        0.0,
        &mut player,
    );
    assert!(records.is_empty());
}

#[test]
fn test_virtual_dom_insert_before_next_sibling() {
    let frames = parse_recording(
        &json!([
            snapshot_event(0.0),
            mutation_event(1.0, json!({
                "adds": [add(5, Some(6), element(12, "li", json!({"data-test-id": "first"}), vec![]))],
                "texts": [{"id": 7, "value": "uno"}],
                "attributes": [{"id": 5, "attributes": {"class": null}}]
            })),
        ])
        .to_string(),
    )
    .unwrap();

    let mut dom = VirtualDom::new();
    for frame in &frames {
        dom.apply(frame);
    }

    assert_eq!(
        dom.outer_html(5).as_deref(),
        Some("<ul><li data-test-id=\"first\"></li><li class=\"item\">uno</li></ul>")
    );
    assert_eq!(dom.node(12).unwrap().parent, Some(5));
    assert_eq!(dom.root(), Some(1));
}

fn diff_single_mutation(mutation: serde_json::Value) -> DiffRecord {
    let frames = parse_recording(
        &json!([snapshot_event(0.0), mutation_event(10.0, mutation)]).to_string(),
    )
    .unwrap();
    let mut player = VirtualDom::new();
    let mut records = extract_diff_mutations(
        &frames,
        FrameRange {
            start: 5.0,
            end: 20.0,
        },
        0.0,
        &mut player,
    );
    records.remove(&1).unwrap_or_default()
}

/// Elements added inside an element added in the same frame are part of its snapshot, and so are
/// attribute changes made to them.
#[test]
fn test_nested_adds_are_captured_once() {
    let record = diff_single_mutation(json!({
        "adds": [
            add(4, None, element(20, "section", json!({}), vec![])),
            add(20, None, element(21, "p", json!({"class": "intro"}), vec![])),
            add(21, None, text(22, "hello"))
        ],
        "attributes": [{"id": 21, "attributes": {"title": "Intro"}}]
    }));

    assert_eq!(
        record.adds.keys().cloned().collect::<Vec<_>>(),
        vec!["div#app > section".to_string()]
    );
    assert_eq!(
        record.adds["div#app > section"].html_after.as_deref(),
        Some("<section><p class=\"intro\" title=\"Intro\">hello</p></section>")
    );
    assert!(record.attributes.is_empty());
}

#[test]
fn test_add_under_itself_is_ignored() {
    let record = diff_single_mutation(json!({
        "adds": [add(4, None, element(4, "div", json!({"id": "app"}), vec![]))]
    }));
    assert!(record.is_empty());

    // Moving the list below its own item would make a cycle as well.
    let record = diff_single_mutation(json!({
        "adds": [add(6, None, element(5, "ul", json!({"class": "list"}), vec![]))]
    }));
    assert!(record.is_empty());
}

#[test]
fn test_add_with_duplicate_ids_is_ignored() {
    let mut dom = VirtualDom::new();
    let frames = parse_recording(
        &json!([
            snapshot_event(0.0),
            mutation_event(1.0, json!({
                "adds": [add(4, None, element(30, "div", json!({}), vec![text(30, "x")]))]
            })),
        ])
        .to_string(),
    )
    .unwrap();
    for frame in &frames {
        dom.apply(frame);
    }

    assert!(dom.node(30).is_none());
    assert_eq!(dom.node(4).unwrap().children, vec![5]);
}

#[test]
fn test_deep_document() {
    const DEPTH: u64 = 100_000;

    let adds = (1..=DEPTH)
        .map(|id| AddedNode {
            parent_id: id - 1,
            next_id: None,
            node: SerializedNode {
                id,
                node_type: 2,
                tag_name: Some("div".to_string()),
                name: None,
                attributes: Default::default(),
                child_nodes: vec![],
                text_content: None,
            },
        })
        .collect();
    let document = SerializedNode {
        id: 0,
        node_type: 0,
        tag_name: None,
        name: None,
        attributes: Default::default(),
        child_nodes: vec![],
        text_content: None,
    };

    let mut dom = VirtualDom::new();
    dom.apply(&ReplayFrame {
        timestamp: 0.0,
        kind: FrameKind::FullSnapshot(document),
    });
    dom.apply(&ReplayFrame {
        timestamp: 1.0,
        kind: FrameKind::Mutation(MutationData {
            adds,
            ..Default::default()
        }),
    });
    assert_eq!(dom.len(), DEPTH as usize + 1);

    let html = dom.outer_html(1).unwrap();
    assert!(html.starts_with("<div><div>"));
    assert_eq!(html.len(), DEPTH as usize * "<div></div>".len());

    dom.apply(&ReplayFrame {
        timestamp: 2.0,
        kind: FrameKind::Mutation(MutationData {
            removes: vec![RemovedNode {
                parent_id: 0,
                id: 1,
            }],
            ..Default::default()
        }),
    });
    assert_eq!(dom.len(), 1);
}
