use super::*;
use crate::group::GroupTopology;
use crate::lut::StaticLutSource;
use crate::scheduler::ManualScheduler;
use crate::strategy::{CsvPlaybookLoader, StrategyConfig};
use chrono::TimeZone;
use serde_json::json;

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 6, 0, 0).unwrap()
}

fn at(seconds: i64) -> DateTime<Utc> {
    start_time() + chrono::Duration::seconds(seconds)
}

fn settings() -> PowercalcConfig {
    let mut config = PowercalcConfig::default();
    config.group.energy_update_interval_seconds = 0;
    config.energy.unit_prefix = crate::energy::UnitPrefix::None;
    config
}

fn session_with(config: PowercalcConfig) -> (Session, Arc<ManualScheduler>) {
    let scheduler = Arc::new(ManualScheduler::new(start_time()));
    let session = Session::from_config(
        config,
        Arc::new(LutRegistry::new(Arc::new(StaticLutSource::new()))),
        scheduler.clone(),
        Arc::new(CsvPlaybookLoader::default()),
        Arc::new(PreviousStateStore::new()),
    );
    (session, scheduler)
}

fn sensor(value: serde_json::Value) -> PowerSensorConfig {
    serde_json::from_value(value).unwrap()
}

fn fixed_sensor(entity_id: &str, power: f64) -> PowerSensorConfig {
    sensor(json!({
        "entity_id": entity_id,
        "calculation": {"strategy": "fixed", "power": power}
    }))
}

fn custom_group(id: &str, kind: SensorKind, members: &[&str]) -> GroupConfig {
    GroupConfig::new(
        id,
        kind,
        GroupTopology::Custom {
            members: members.iter().map(|m| m.to_string()).collect(),
        },
    )
}

fn state(entity_id: &str, value: &str, seconds: i64) -> EntityState {
    EntityState::new(entity_id, value).at(at(seconds))
}

fn value_of(updates: &[SensorUpdate], sensor_id: &str) -> Option<f64> {
    updates
        .iter()
        .rev()
        .find(|u| u.sensor_id == sensor_id)
        .and_then(|u| u.value)
}

#[test]
fn test_power_sensors_feed_power_group() {
    let mut config = settings();
    config.sensors = vec![fixed_sensor("light.desk", 8.0), fixed_sensor("light.hall", 4.5)];
    config.groups = vec![custom_group(
        "sensor.lights_power",
        SensorKind::Power,
        &["sensor.desk_power", "sensor.hall_power"],
    )];
    let (mut session, _) = session_with(config);

    let updates = session.handle_state(state("light.desk", "on", 0));
    assert_eq!(value_of(&updates, "sensor.desk_power"), Some(8.0));
    assert_eq!(value_of(&updates, "sensor.lights_power"), Some(8.0));

    session.handle_state(state("light.hall", "on", 1));
    assert_eq!(session.get_power("sensor.lights_power"), Some(12.5));

    session.handle_state(state("light.desk", "off", 2));
    assert_eq!(session.get_power("sensor.desk_power"), Some(0.0));
    assert_eq!(session.get_power("sensor.lights_power"), Some(4.5));

    // Derived values land in the state cache like any other entity
    let cached = session.states().get_state("sensor.lights_power").unwrap();
    assert_eq!(cached.state, "4.5");
}

#[test]
fn test_energy_sensor_integrates_power() {
    let mut config = settings();
    let mut heater = fixed_sensor("switch.heater", 1000.0);
    heater.create_energy_sensor = true;
    config.sensors = vec![heater];
    let (mut session, _) = session_with(config);
    assert_eq!(session.energy_sensor_ids(), vec!["sensor.heater_energy".to_string()]);

    session.handle_state(state("switch.heater", "on", 0));
    let updates = session.handle_state(state("switch.heater", "on", 1800));
    assert_eq!(value_of(&updates, "sensor.heater_energy"), Some(500.0));

    // Trapezoid down to the 0 W standby reading
    session.handle_state(state("switch.heater", "off", 3600));
    assert_eq!(session.get_energy("sensor.heater_energy"), Some(750.0));
    assert_eq!(session.store().get("sensor.heater_energy").unwrap().value, 750.0);
}

#[test]
fn test_template_reference_triggers_recalculation() {
    let mut config = settings();
    config.sensors = vec![sensor(json!({
        "entity_id": "climate.office",
        "calculation": {
            "strategy": "fixed",
            "states_power": {"heat": "{{ states('input_number.office_heater_watts') }}"}
        }
    }))];
    let (mut session, _) = session_with(config);

    session.handle_state(state("input_number.office_heater_watts", "750", 0));
    session.handle_state(state("climate.office", "heat", 1));
    assert_eq!(session.get_power("sensor.office_power"), Some(750.0));

    let updates = session.handle_state(state("input_number.office_heater_watts", "900", 2));
    assert_eq!(value_of(&updates, "sensor.office_power"), Some(900.0));
}

#[test]
fn test_tracked_entity_before_source_is_ignored() {
    let mut config = settings();
    config.sensors = vec![sensor(json!({
        "entity_id": "switch.pump",
        "calculation": {"strategy": "fixed", "power": "{{ states('input_number.pump_watts') }}"}
    }))];
    let (mut session, _) = session_with(config);

    let updates = session.handle_state(state("input_number.pump_watts", "60", 0));
    assert!(updates.is_empty());
    assert_eq!(session.get_power("sensor.pump_power"), None);
}

#[test]
fn test_energy_group_reset_cascades() {
    let mut config = settings();
    let mut washer = fixed_sensor("switch.washer", 2000.0);
    washer.create_energy_sensor = true;
    let mut dryer = fixed_sensor("switch.dryer", 1000.0);
    dryer.create_energy_sensor = true;
    config.sensors = vec![washer, dryer];
    config.groups = vec![custom_group(
        "sensor.laundry_energy",
        SensorKind::Energy,
        &["sensor.washer_energy", "sensor.dryer_energy"],
    )];
    config.groups[0].unit = Some("Wh".to_string());
    let (mut session, _) = session_with(config);

    session.handle_state(state("switch.washer", "on", 0));
    session.handle_state(state("switch.dryer", "on", 0));
    session.handle_state(state("switch.washer", "on", 3600));
    session.handle_state(state("switch.dryer", "on", 3600));
    assert_eq!(session.get_energy("sensor.washer_energy"), Some(2000.0));
    assert_eq!(session.get_energy("sensor.laundry_energy"), Some(3000.0));

    let updates = session.reset("sensor.laundry_energy").unwrap();
    assert_eq!(value_of(&updates, "sensor.laundry_energy"), Some(0.0));
    assert_eq!(session.get_energy("sensor.laundry_energy"), Some(0.0));
    assert_eq!(session.get_energy("sensor.washer_energy"), Some(0.0));
    assert_eq!(session.get_energy("sensor.dryer_energy"), Some(0.0));
    assert!(session
        .store()
        .get("sensor.laundry_energy::sensor.dryer_energy")
        .map_or(true, |row| row.value == 0.0));

    // Counting starts again from the reset baseline
    session.handle_state(state("switch.washer", "on", 5400));
    session.handle_state(state("switch.washer", "on", 7200));
    assert_eq!(session.get_energy("sensor.washer_energy"), Some(1000.0));
    assert_eq!(session.get_energy("sensor.laundry_energy"), Some(1000.0));
}

#[test]
fn test_calibrate_energy() {
    let mut config = settings();
    let mut tv = fixed_sensor("media_player.tv", 80.0);
    tv.create_energy_sensor = true;
    config.sensors = vec![tv];
    let (mut session, _) = session_with(config);

    let updates = session.calibrate("sensor.tv_energy", 250.0).unwrap();
    assert_eq!(value_of(&updates, "sensor.tv_energy"), Some(250.0));
    assert_eq!(session.get_energy("sensor.tv_energy"), Some(250.0));

    assert!(matches!(
        session.calibrate("sensor.tv_power", 1.0),
        Err(PowercalcError::UnsupportedMode(_))
    ));
    assert!(session.reset("sensor.unknown_energy").is_err());
}

#[test]
fn test_playbook_timer_updates_groups() {
    let mut config = settings();
    let mut washer = sensor(json!({
        "entity_id": "switch.washer",
        "calculation": {"strategy": "playbook", "playbooks": {"wash": "0,40\n5,120"}}
    }));
    washer.id = Some("sensor.washer_power".to_string());
    config.sensors = vec![washer, fixed_sensor("light.utility", 10.0)];
    config.groups = vec![custom_group(
        "sensor.utility_power",
        SensorKind::Power,
        &["sensor.washer_power", "sensor.utility_power_1"],
    )];
    config.sensors[1].id = Some("sensor.utility_power_1".to_string());
    let (mut session, scheduler) = session_with(config);

    session.handle_state(state("light.utility", "on", 0));
    session.activate_playbook("sensor.washer_power", "wash").unwrap();

    let fired = scheduler.next_due(at(1)).unwrap();
    let updates = session.handle_timer(fired);
    assert_eq!(value_of(&updates, "sensor.washer_power"), Some(40.0));
    assert_eq!(value_of(&updates, "sensor.utility_power"), Some(50.0));

    let fired = scheduler.next_due(at(6)).unwrap();
    session.handle_timer(fired);
    assert_eq!(session.get_power("sensor.utility_power"), Some(130.0));

    assert!(session.activate_playbook("sensor.utility_power_1", "wash").is_err());
    session.stop_playbook("sensor.washer_power").unwrap();
    assert!(session.stop_playbook("sensor.nothing_power").is_err());
}

#[test]
fn test_throttled_energy_group_flushes_on_timer() {
    let mut config = settings();
    config.group.energy_update_interval_seconds = 60;
    config.group.startup_window_seconds = 0;
    config.groups = vec![custom_group("sensor.meters_energy", SensorKind::Energy, &["sensor.meter_energy"])];
    let (mut session, scheduler) = session_with(config);

    let updates = session.handle_state(state("sensor.meter_energy", "1.5", 0));
    assert_eq!(value_of(&updates, "sensor.meters_energy"), Some(1.5));

    let updates = session.handle_state(state("sensor.meter_energy", "2.0", 10));
    assert!(updates.is_empty());
    assert_eq!(session.get_energy("sensor.meters_energy"), Some(2.0));

    let fired = scheduler.next_due(at(120)).unwrap();
    assert_eq!(fired.owner, "sensor.meters_energy");
    let updates = session.handle_timer(fired);
    assert_eq!(value_of(&updates, "sensor.meters_energy"), Some(2.0));
}

#[test]
fn test_invalid_entries_do_not_block_others() {
    let mut config = settings();
    config.sensors = vec![
        sensor(json!({"entity_id": "light.broken", "calculation": {"strategy": "linear"}})),
        fixed_sensor("light.ok", 3.0),
        fixed_sensor("light.ok", 3.0),
    ];
    config.groups = vec![
        custom_group("sensor.empty_power", SensorKind::Power, &[]),
        custom_group("sensor.ok_group_power", SensorKind::Power, &["sensor.ok_power"]),
    ];
    let (session, _) = session_with(config);

    assert_eq!(session.power_sensor_ids(), vec!["sensor.ok_power".to_string()]);
    assert_eq!(session.group_ids(), vec!["sensor.ok_group_power".to_string()]);
}

#[test]
fn test_subscribe_and_metrics() {
    let mut config = settings();
    config.sensors = vec![fixed_sensor("light.porch", 6.0)];
    let (mut session, _) = session_with(config);
    let mut rx = session.subscribe();

    session.handle_state(state("light.porch", "on", 0));
    session.handle_state(state("light.porch", "unavailable", 1));

    let first = rx.try_recv().unwrap();
    assert_eq!(first.sensor_id, "sensor.porch_power");
    assert_eq!(first.value, Some(6.0));
    assert_eq!(rx.try_recv().unwrap().value, None);

    let metrics = session.metrics();
    assert_eq!(metrics.total_notifications, 2);
    assert_eq!(metrics.calculations, 2);
    assert_eq!(metrics.unavailable_results, 1);
}

#[test]
fn test_group_cycle_stops_propagating() {
    let mut session = session_with(settings()).0;
    session
        .add_group(custom_group("sensor.a_power", SensorKind::Power, &["sensor.b_power"]))
        .unwrap();
    session
        .add_group(custom_group("sensor.b_power", SensorKind::Power, &["sensor.a_power", "sensor.seed_power"]))
        .unwrap();

    let updates = session.handle_state(state("sensor.seed_power", "5", 0));
    assert!(!updates.is_empty());
    assert!(updates.len() <= MAX_DEPTH);
    assert!(session.get_power("sensor.a_power").is_some());
}

#[test]
fn test_playbook_strategy_config_shape() {
    let config = sensor(json!({
        "entity_id": "switch.dishwasher",
        "calculation": {"strategy": "playbook", "playbooks": {"eco": "eco.csv"}, "repeat": true}
    }));
    assert!(matches!(config.calculation, Some(StrategyConfig::Playbook(ref p)) if p.repeat));
}

#[test]
fn test_nan_attribute_publishes_unavailable() {
    let mut config = settings();
    config.sensors = vec![sensor(json!({
        "entity_id": "light.desk",
        "calculation": {"strategy": "linear", "min_power": 0.5, "max_power": 8.0}
    }))];
    let (mut session, _) = session_with(config);

    let bad = state("light.desk", "on", 0).with_attribute("brightness", json!("nan"));
    let updates = session.handle_state(bad);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].value, None);
    assert_eq!(session.metrics().unavailable_results, 1);

    session.handle_state(state("light.desk", "on", 1).with_attribute("brightness", json!(255)));
    assert_eq!(session.get_power("sensor.desk_power"), Some(8.0));
}
