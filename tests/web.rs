#![cfg(target_arch = "wasm32")]

use number_battle_core::{build_tablebase, GameEngine};
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

#[wasm_bindgen_test]
fn engine_plays_an_ai_turn_after_loading_the_table() {
    let json = build_tablebase().expect("tablebase json");
    let mut engine = GameEngine::new(Some("hard".into()), Some("ai".into())).expect("engine");
    engine.load_tablebase_json(&json).expect("load");
    assert!(engine.tablebase_loaded());

    let response = engine.ai_move().expect("ai move");
    assert!(response.contains("\"source\":\"tablebase\""));
    assert_eq!(engine.turn(), "player");
    assert!(engine.undo());
    assert_eq!(engine.turn(), "ai");
}

#[wasm_bindgen_test]
fn illegal_move_is_rejected_with_a_tagged_error() {
    let mut engine = GameEngine::new(None, None).expect("engine");
    let result = engine.apply_move_json(r#"{"type":"split","owner":"ai","left":2,"right":0}"#);
    assert!(result.is_err());
}

#[wasm_bindgen_test]
async fn think_ai_resolves_without_touching_the_game() {
    let mut engine = GameEngine::new(Some("hard".into()), None).expect("engine");
    let before = engine.state_json().expect("state");
    let value = wasm_bindgen_futures::JsFuture::from(engine.think_ai(Some(5)))
        .await
        .expect("promise resolves");
    let json = value.as_string().expect("decision json");
    assert!(json.contains("\"move\""));
    assert_eq!(engine.state_json().expect("state"), before);
}
