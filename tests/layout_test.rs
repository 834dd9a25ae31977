use pixflow_backend::flow::document::FlowDocument;
use pixflow_backend::flow::layout::{EdgeKind, FlowLayoutEngine, SLOT_WIDTH, VERTICAL_SPACING};

fn document(raw: &str) -> FlowDocument {
    serde_json::from_str(raw).unwrap()
}

#[test]
fn cycle_terminates_and_places_each_node_once() {
    let doc = document(
        r#"{"initial_screen": "a", "screens": {
            "a": {"text": "A", "buttons": [[{"text": "to b", "callback": "goto_b"}]]},
            "b": {"text": "B", "buttons": [[{"text": "back", "callback": "goto_a"}]]}
        }}"#,
    );

    let layout = FlowLayoutEngine::layout(&doc);

    assert_eq!(layout.nodes.len(), 2);
    assert_eq!(layout.node("a").unwrap().depth, 0);
    assert_eq!(layout.node("b").unwrap().depth, 1);
    assert_eq!(layout.node("b").unwrap().y, VERTICAL_SPACING);

    let forward = layout.edges.iter().find(|e| e.id == "e-a-b-0").unwrap();
    let back = layout.edges.iter().find(|e| e.id == "e-b-a-0").unwrap();
    assert_eq!(forward.kind, EdgeKind::Forward);
    assert_eq!(back.kind, EdgeKind::Back);
    assert!(back.z_index < forward.z_index);
}

#[test]
fn pure_cycle_without_initial_screen_still_lays_out() {
    let doc = document(
        r#"{"screens": {
            "x": {"buttons": [[{"text": "y", "callback": "goto_y"}]]},
            "y": {"buttons": [[{"text": "x", "callback": "goto_x"}]]}
        }}"#,
    );

    let layout = FlowLayoutEngine::layout(&doc);

    assert_eq!(layout.nodes.len(), 2);
    assert_eq!(layout.node("x").unwrap().depth, 0);
    assert_eq!(layout.node("y").unwrap().depth, 1);
    // Screens without text are labelled with their id
    assert_eq!(layout.node("x").unwrap().label, "x");
}

#[test]
fn missing_target_becomes_a_flagged_node_with_broken_edge() {
    let doc = document(
        r#"{"screens": {
            "menu": {"text": "Menu", "buttons": [[{"text": "Lost", "callback": "goto_ghost"}]]}
        }}"#,
    );

    let layout = FlowLayoutEngine::layout(&doc);

    let ghost = layout.node("ghost").unwrap();
    assert!(ghost.missing);
    assert_eq!(ghost.depth, 1);
    assert!(!layout.node("menu").unwrap().missing);

    let edge = &layout.edges[0];
    assert_eq!(edge.target, "ghost");
    assert!(edge.broken);
    assert_eq!(edge.style.stroke, "#ef4444");
}

#[test]
fn shared_child_is_placed_under_its_first_parent() {
    let doc = document(
        r#"{"initial_screen": "start", "screens": {
            "start": {"text": "Start", "buttons": [[{"text": "A", "callback": "goto_a"}, {"text": "B", "callback": "goto_b"}]]},
            "a": {"text": "A", "buttons": [[{"text": "C", "callback": "goto_c"}]]},
            "b": {"text": "B", "buttons": [[{"text": "C", "callback": "goto_c"}]]},
            "c": {"text": "C"}
        }}"#,
    );

    let layout = FlowLayoutEngine::layout(&doc);

    assert_eq!(layout.nodes.len(), 4);
    assert_eq!(layout.node("c").unwrap().x, 0.0);
    assert_eq!(layout.node("c").unwrap().depth, 2);
    assert_eq!(layout.node("a").unwrap().x, 0.0);
    assert_eq!(layout.node("b").unwrap().x, SLOT_WIDTH);
    assert_eq!(layout.node("start").unwrap().x, SLOT_WIDTH / 2.0);

    let b_to_c = layout.edges.iter().find(|e| e.id == "e-b-c-0").unwrap();
    assert_eq!(b_to_c.kind, EdgeKind::Forward);
}

#[test]
fn webhook_edges_are_their_own_kind() {
    let doc = document(
        r#"{"initial_screen": "pay", "screens": {
            "pay": {"type": "payment", "amount": 10, "webhook": "thanks"},
            "thanks": {"text": "Obrigado!"}
        }}"#,
    );

    let layout = FlowLayoutEngine::layout(&doc);

    let edge = &layout.edges[0];
    assert_eq!(edge.id, "wh-pay-thanks");
    assert_eq!(edge.kind, EdgeKind::Webhook);
    assert_eq!(edge.label, "on payment");
    assert!(edge.style.animated);
}

#[test]
fn empty_document_has_empty_layout() {
    let layout = FlowLayoutEngine::layout(&FlowDocument::default());
    assert!(layout.nodes.is_empty());
    assert!(layout.edges.is_empty());
}

#[test]
fn long_linear_chain_is_laid_out_without_recursion_limits() {
    const LENGTH: usize = 50_000;
    let screens: serde_json::Map<String, serde_json::Value> = (0..LENGTH)
        .map(|i| {
            let node = if i + 1 < LENGTH {
                serde_json::json!({
                    "text": format!("step {}", i),
                    "buttons": [[{"text": "next", "callback": format!("goto_s{}", i + 1)}]]
                })
            } else {
                serde_json::json!({"text": "end"})
            };
            (format!("s{}", i), node)
        })
        .collect();
    let doc: FlowDocument =
        serde_json::from_value(serde_json::json!({"initial_screen": "s0", "screens": screens}))
            .unwrap();

    let layout = FlowLayoutEngine::layout(&doc);

    assert_eq!(layout.nodes.len(), LENGTH);
    let last = layout.node(&format!("s{}", LENGTH - 1)).unwrap();
    assert_eq!(last.depth, LENGTH - 1);
    assert_eq!(layout.node("s0").unwrap().x, 0.0);
}
