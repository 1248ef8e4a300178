use super::*;

#[test]
fn test_parse_entity_id() {
    let parsed = parse_entity_id("light.kitchen").unwrap();
    assert_eq!(parsed.domain, "light");
    assert_eq!(parsed.object_id, "kitchen");

    let parsed = parse_entity_id("sensor.washing_machine_2").unwrap();
    assert_eq!(parsed.domain, "sensor");
    assert_eq!(parsed.object_id, "washing_machine_2");
}

#[test]
fn test_parse_entity_id_empty() {
    let result = parse_entity_id("");
    assert!(matches!(result, Err(ParseError::Empty)));
}

#[test]
fn test_parse_entity_id_missing_separator() {
    let result = parse_entity_id("kitchen");
    assert!(matches!(result, Err(ParseError::InvalidFormat(_))));
}

#[test]
fn test_parse_entity_id_empty_parts() {
    assert!(matches!(
        parse_entity_id(".kitchen"),
        Err(ParseError::InvalidFormat(_))
    ));
    assert!(matches!(
        parse_entity_id("light."),
        Err(ParseError::InvalidFormat(_))
    ));
}

#[test]
fn test_parse_entity_id_multiple_separators() {
    let result = parse_entity_id("light.kitchen.ceiling");
    assert!(matches!(result, Err(ParseError::InvalidFormat(_))));
}

#[test]
fn test_parse_entity_id_invalid_characters() {
    let result = parse_entity_id("Light.kitchen");
    assert!(matches!(result, Err(ParseError::InvalidCharacters(_))));

    let result = parse_entity_id("light.kitchen-1");
    assert!(matches!(result, Err(ParseError::InvalidCharacters(_))));
}

#[test]
fn test_monitored_entity_from_entity_id() {
    let entity = MonitoredEntity::from_entity_id("light.living_room_lamp").unwrap();
    assert_eq!(entity.domain, "light");
    assert_eq!(entity.object_id, "living_room_lamp");
    assert_eq!(entity.name, "Living Room Lamp");
    assert!(entity.device.is_none());
}

#[test]
fn test_color_mode_parse() {
    assert_eq!(ColorMode::parse("color_temp"), ColorMode::ColorTemp);
    assert_eq!(ColorMode::parse("hs"), ColorMode::Hs);
    assert_eq!(ColorMode::parse("bogus"), ColorMode::Unknown);
}
