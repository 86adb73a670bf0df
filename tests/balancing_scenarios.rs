//! End-to-end balancing passes against scripted appliances and a settable
//! meter: the deficit, surplus, and fault-tolerance scenarios the control
//! loop must survive.

use std::sync::Arc;

use home_energy_balancer::controller::{run_tick, BalancingSettings};
use home_energy_balancer::domain::{
    Equipment, EquipmentKind, FixedMeter, ScriptedEquipment, Unconstrained, Voltage,
};
use home_energy_balancer::registry::EquipmentRegistry;

fn settings() -> BalancingSettings {
    BalancingSettings {
        action_threshold_a: 0.5,
        generator_start_threshold_a: 1.0,
        reference_voltage: Voltage::volts(220.0),
        verbose: false,
    }
}

fn register(
    registry: &EquipmentRegistry,
    id: &str,
    kind: EquipmentKind,
    priority: u8,
    equipment: Arc<ScriptedEquipment>,
) {
    registry
        .register(id, kind, equipment, priority, Arc::new(Unconstrained))
        .unwrap();
}

#[tokio::test]
async fn balanced_house_takes_no_action() {
    // Scenario A: consumption 10 A, production 10 A.
    let registry = EquipmentRegistry::new();
    let heater = Arc::new(ScriptedEquipment::new(vec![0.0, 2000.0], 1));
    register(&registry, "heater-1", EquipmentKind::Heater, 2, heater.clone());

    let meter = FixedMeter::new(10.0, 10.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();

    assert_eq!(report.balance_a, 0.0);
    assert!(report.suspended.is_empty());
    assert!(report.resumed.is_empty());
    assert!(!heater.is_suspended());
}

#[tokio::test]
async fn single_appliance_covers_the_deficit() {
    // Scenario B: balance 2 A, one candidate drawing 1500 W / 220 V ~ 6.8 A.
    let registry = EquipmentRegistry::new();
    let machine = Arc::new(ScriptedEquipment::new(vec![0.0, 1500.0], 1));
    register(&registry, "coffee-1", EquipmentKind::CoffeeMachine, 5, machine.clone());

    let meter = FixedMeter::new(12.0, 10.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();

    assert_eq!(report.suspended, vec!["coffee-1"]);
    assert!(machine.is_suspended());
    assert_eq!(machine.suspend_calls(), 1);
    assert!(report.unresolved_deficit_a.is_none());
    assert!(!report.generator_start_needed);

    let snap = registry.get("coffee-1").unwrap();
    assert!(snap.suspended);
    assert_eq!(snap.prior_mode, 1);
}

#[tokio::test]
async fn shedding_stops_once_inside_the_dead_band() {
    // Three fans at 110 W (0.5 A each); deficit of 1.2 A needs two of them.
    let registry = EquipmentRegistry::new();
    let fans: Vec<_> = (1..=3)
        .map(|i| {
            let fan = Arc::new(ScriptedEquipment::new(vec![0.0, 110.0], 1));
            register(&registry, &format!("fan-{i}"), EquipmentKind::Fan, 9, fan.clone());
            fan
        })
        .collect();

    let meter = FixedMeter::new(11.2, 10.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();

    // 1.2 - 0.5 = 0.7 > 0.5, 0.7 - 0.5 = 0.2 <= 0.5: two suspensions.
    assert_eq!(report.suspended, vec!["fan-1", "fan-2"]);
    assert!(fans[0].is_suspended());
    assert!(fans[1].is_suspended());
    assert!(!fans[2].is_suspended());
}

#[tokio::test]
async fn unresolved_deficit_requests_generator_start() {
    // Scenario C: balance 2 A with nothing suspendable.
    let registry = EquipmentRegistry::new();

    let meter = FixedMeter::new(12.0, 10.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();

    assert!(report.suspended.is_empty());
    assert_eq!(report.unresolved_deficit_a, Some(2.0));
    assert!(report.generator_start_needed);
}

#[tokio::test]
async fn small_surplus_resumes_nothing() {
    // Scenario D: balance -0.3 A is inside the dead band.
    let registry = EquipmentRegistry::new();
    let heater = Arc::new(ScriptedEquipment::new(vec![0.0, 2000.0], 1));
    register(&registry, "heater-1", EquipmentKind::Heater, 2, heater.clone());
    heater.suspend().await.unwrap();
    registry.commit_suspension("heater-1", 1);

    let meter = FixedMeter::new(9.7, 10.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();

    assert!(report.resumed.is_empty());
    assert!(heater.is_suspended());
    assert_eq!(heater.resume_calls(), 0);
}

#[tokio::test]
async fn failing_suspend_is_skipped_not_fatal() {
    // Scenario E: the first candidate's suspend call errors.
    let registry = EquipmentRegistry::new();
    let flaky = Arc::new(ScriptedEquipment::new(vec![0.0, 660.0], 1));
    flaky.fail_next_suspend();
    let healthy = Arc::new(ScriptedEquipment::new(vec![0.0, 660.0], 1));

    register(&registry, "flaky-1", EquipmentKind::Fan, 9, flaky.clone());
    register(&registry, "healthy-1", EquipmentKind::Fan, 9, healthy.clone());

    let meter = FixedMeter::new(12.0, 10.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();

    assert!(report
        .skipped
        .iter()
        .any(|s| s.id == "flaky-1" && s.reason.contains("suspend failed")));
    assert_eq!(report.suspended, vec!["healthy-1"]);
    assert!(!flaky.is_suspended());
    assert!(healthy.is_suspended());
    // The registry still matches reality.
    assert!(!registry.get("flaky-1").unwrap().suspended);
    assert!(registry.get("healthy-1").unwrap().suspended);
}

#[tokio::test]
async fn suspend_then_resume_restores_the_prior_mode() {
    let registry = EquipmentRegistry::new();
    let heater = Arc::new(ScriptedEquipment::new(vec![0.0, 800.0, 2000.0], 2));
    register(&registry, "heater-1", EquipmentKind::Heater, 2, heater.clone());

    // Deficit tick: 2000 W / 220 V ~ 9.1 A comes off.
    let meter = FixedMeter::new(12.0, 10.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();
    assert_eq!(report.suspended, vec!["heater-1"]);
    assert_eq!(registry.get("heater-1").unwrap().prior_mode, 2);

    // Surplus tick with room for the restored draw.
    let meter = FixedMeter::new(8.0, 20.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();
    assert_eq!(report.resumed, vec!["heater-1"]);

    let snap = registry.get("heater-1").unwrap();
    assert!(!snap.suspended);
    assert_eq!(snap.current_mode, 2);
    assert_eq!(heater.mode(), 2);
}

#[tokio::test]
async fn suspension_order_sheds_least_important_first() {
    let registry = EquipmentRegistry::new();
    let heater = Arc::new(ScriptedEquipment::new(vec![0.0, 330.0], 1));
    let kettle = Arc::new(ScriptedEquipment::new(vec![0.0, 330.0], 1));
    let fan = Arc::new(ScriptedEquipment::new(vec![0.0, 330.0], 1));
    register(&registry, "heater-1", EquipmentKind::Heater, 2, heater.clone());
    register(&registry, "kettle-1", EquipmentKind::Kettle, 7, kettle.clone());
    register(&registry, "fan-1", EquipmentKind::Fan, 9, fan.clone());

    // Deficit of 4.2 A against three 1.5 A loads takes all of them,
    // highest numeric priority first.
    let meter = FixedMeter::new(14.2, 10.0);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();

    assert_eq!(report.suspended, vec!["fan-1", "kettle-1", "heater-1"]);
    assert!(report.unresolved_deficit_a.is_none());
    assert!(!report.generator_start_needed);
}

#[tokio::test]
async fn meter_failure_estimates_and_still_balances() {
    let registry = EquipmentRegistry::new();
    let kettle = Arc::new(ScriptedEquipment::new(vec![0.0, 2200.0], 1));
    register(&registry, "kettle-1", EquipmentKind::Kettle, 7, kettle.clone());

    let meter = FixedMeter::new(12.0, 10.0);
    meter.set_failing(true);
    let report = run_tick(&registry, &meter, &settings()).await.unwrap();

    // Estimated 10 A of consumption with no production: the kettle sheds.
    assert!(report.estimated);
    assert!((report.consumption_a - 10.0).abs() < 1e-9);
    assert_eq!(report.suspended, vec!["kettle-1"]);
}
