use super::*;
use serde_json::json;
use std::sync::Arc;
use std::thread;

#[test]
fn test_update_state_creates_entity() {
    let engine = StateEngine::new();
    assert!(engine.get_state("light.kitchen").is_none());

    engine.update_state(EntityState::new("light.kitchen", "on"));

    let state = engine.get_state("light.kitchen").unwrap();
    assert_eq!(state.state, "on");
}

#[test]
fn test_update_replaces_previous_state() {
    let engine = StateEngine::new();

    engine.update_state(EntityState::new("switch.tv", "off"));
    engine.update_state(EntityState::new("switch.tv", "on").with_attribute("source", json!("hdmi1")));

    let state = engine.get_state("switch.tv").unwrap();
    assert_eq!(state.state, "on");
    assert_eq!(state.attribute_string("source"), Some("hdmi1".to_string()));
}

#[test]
fn test_attribute_helpers() {
    let state = EntityState::new("light.desk", "on")
        .with_attribute("brightness", json!(128))
        .with_attribute("preset", json!("eco"))
        .with_attribute("level", json!("42.5"));

    assert_eq!(state.attribute_f64("brightness"), Some(128.0));
    assert_eq!(state.attribute_f64("level"), Some(42.5));
    assert_eq!(state.attribute_f64("preset"), None);
    assert_eq!(state.attribute_string("preset"), Some("eco".to_string()));
    assert_eq!(state.attribute_string("brightness"), Some("128".to_string()));
}

#[test]
fn test_non_finite_attributes_are_not_numbers() {
    let state = EntityState::new("light.desk", "on")
        .with_attribute("brightness", json!("nan"))
        .with_attribute("color_temp", json!("inf"))
        .with_attribute("level", json!("-inf"));

    assert_eq!(state.attribute_f64("brightness"), None);
    assert_eq!(state.attribute_f64("color_temp"), None);
    assert_eq!(state.attribute_f64("level"), None);
    assert_eq!(EntityState::new("sensor.p", "NaN").numeric_state(), None);
}

#[test]
fn test_numeric_state_and_availability() {
    assert_eq!(EntityState::new("sensor.p", "12.5").numeric_state(), Some(12.5));
    assert_eq!(EntityState::new("sensor.p", "on").numeric_state(), None);
    assert!(EntityState::new("sensor.p", "unavailable").is_unavailable());
    assert!(EntityState::new("sensor.p", "unknown").is_unavailable());
    assert!(!EntityState::new("sensor.p", "0").is_unavailable());
}

#[test]
fn test_concurrent_updates() {
    let engine = Arc::new(StateEngine::new());
    let mut handles = vec![];

    for i in 0..10 {
        let engine_clone = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            let entity_id = format!("sensor.entity_{}", i);
            engine_clone.update_state(EntityState::new(&entity_id, &i.to_string()));
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..10 {
        let state = engine.get_state(&format!("sensor.entity_{}", i)).unwrap();
        assert_eq!(state.numeric_state(), Some(i as f64));
    }
}
