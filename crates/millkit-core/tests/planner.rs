use millkit_core::motion::join_commands;
use millkit_core::*;
use proptest::prelude::*;

fn planner() -> SafeMotionPlanner {
    SafeMotionPlanner::new(PlannerLimits::new(
        Coordinates::new(-415.0, -300.0, -200.0),
        0.0,
        -10.0,
    ))
}

fn plan(current: Coordinates, goto: Coordinates, offset: Coordinates) -> Vec<String> {
    planner()
        .plan_move(&current, &goto, &offset, MoveOptions::default())
        .unwrap()
        .commands
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[test]
fn test_lift_then_travel_then_descend() {
    let commands = plan(
        Coordinates::new(-100.0, -100.0, -50.0),
        Coordinates::new(-200.0, -200.0, -75.0),
        Coordinates::zero(),
    );
    assert_eq!(commands, vec!["G01 Z0", "G01 X-200 Y-200", "G01 Z-75"]);
}

#[test]
fn test_tool_offset_shifts_target() {
    let offset = Coordinates::new(10.0, 10.0, 10.0);
    let p = planner();
    let target = p.resolve_target(&Coordinates::new(-200.0, -200.0, -75.0), &offset);
    assert_eq!(target, Coordinates::new(-190.0, -190.0, -65.0));

    let commands = plan(
        Coordinates::new(-100.0, -100.0, -50.0),
        Coordinates::new(-200.0, -200.0, -75.0),
        offset,
    );
    assert_eq!(commands, vec!["G01 Z0", "G01 X-190 Y-190", "G01 Z-65"]);
}

#[test]
fn test_batch_concatenates_in_order() {
    let plan = planner()
        .plan_many(
            &Coordinates::new(-100.0, -100.0, -50.0),
            &[
                Coordinates::new(-200.0, -200.0, -75.0),
                Coordinates::new(-100.0, -100.0, -50.0),
            ],
            &Coordinates::zero(),
            true,
        )
        .unwrap();
    assert_eq!(
        join_commands(&plan.commands),
        "G01 Z0\nG01 X-200 Y-200\nG01 Z-75\nG01 Z0\nG01 X-100 Y-100\nG01 Z-50"
    );
    assert_eq!(plan.target, Coordinates::new(-100.0, -100.0, -50.0));
}

#[test]
fn test_unsafe_batch_above_clearance_travels_xy_then_z() {
    let plan = planner()
        .plan_many(
            &Coordinates::new(-100.0, -100.0, -5.0),
            &[
                Coordinates::new(-200.0, -200.0, -75.0),
                Coordinates::new(-150.0, -120.0, -75.0),
            ],
            &Coordinates::zero(),
            false,
        )
        .unwrap();
    // The second leg starts below the clearance plane and has no lift to rely on.
    assert_eq!(
        join_commands(&plan.commands),
        "G01 X-200 Y-200\nG01 Z-75\nG01 X-150\nG01 Y-120"
    );
}

#[test]
fn test_batch_rejects_before_queueing() {
    let err = planner()
        .plan_many(
            &Coordinates::new(-100.0, -100.0, -50.0),
            &[
                Coordinates::new(-200.0, -200.0, -75.0),
                Coordinates::new(-500.0, -100.0, -50.0),
            ],
            &Coordinates::zero(),
            true,
        )
        .unwrap_err();
    assert!(err.is_out_of_range());
    assert!(err.to_string().starts_with("x coordinate out of range"));
}

#[test]
fn test_non_finite_targets_are_out_of_range() {
    let current = Coordinates::new(-100.0, -100.0, -50.0);
    // NaN and +inf on Z would otherwise clamp to the ceiling.
    for (target, axis) in [
        (Coordinates::new(-100.0, -100.0, f64::NAN), Axis::Z),
        (Coordinates::new(-100.0, -100.0, f64::INFINITY), Axis::Z),
        (Coordinates::new(f64::NEG_INFINITY, -100.0, -50.0), Axis::X),
    ] {
        let err = planner()
            .plan_move(&current, &target, &Coordinates::zero(), MoveOptions::default())
            .unwrap_err();
        match err {
            Error::Motion(MotionError::OutOfRange { axis: reported, .. }) => {
                assert_eq!(reported, axis)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(planner()
            .plan_many(&current, &[target], &Coordinates::zero(), false)
            .unwrap_err()
            .is_out_of_range());
    }

    let err = planner()
        .plan_move(
            &current,
            &Coordinates::new(-150.0, -150.0, -20.0),
            &Coordinates::zero(),
            MoveOptions {
                force_lift: false,
                secondary: Some(SecondaryDescent {
                    z: f64::NAN,
                    feed: 300.0,
                    restore_feed: 2000.0,
                }),
            },
        )
        .unwrap_err();
    assert!(err.is_out_of_range());
}

#[test]
fn test_positive_x_rejected() {
    let err = planner()
        .plan_move(
            &Coordinates::new(-100.0, -100.0, -50.0),
            &Coordinates::new(5.0, -100.0, -50.0),
            &Coordinates::zero(),
            MoveOptions::default(),
        )
        .unwrap_err();
    match err {
        Error::Motion(MotionError::OutOfRange { axis, value, .. }) => {
            assert_eq!(axis, Axis::X);
            assert_eq!(value, 5.0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

proptest! {
    #[test]
    fn prop_rounding_is_idempotent(x in -1e6f64..1e6, y in -1e6f64..1e6, z in -1e6f64..1e6) {
        let c = Coordinates::new(x, y, z);
        prop_assert_eq!(round_to(c.x(), 6), c.x());
        prop_assert_eq!(round_to(c.y(), 6), c.y());
        prop_assert_eq!(round_to(c.z(), 6), c.z());
    }

    #[test]
    fn prop_resolution_is_deterministic(
        x in -400.0f64..0.0, y in -300.0f64..0.0, z in -250.0f64..50.0,
        ox in -20.0f64..20.0, oy in -20.0f64..20.0, oz in -20.0f64..20.0,
    ) {
        let p = planner();
        let goto = Coordinates::new(x, y, z);
        let offset = Coordinates::new(ox, oy, oz);
        let first = p.resolve_target(&goto, &offset);
        prop_assert_eq!(first, p.resolve_target(&goto, &offset));
        prop_assert!(first.z() <= 0.0);
        prop_assert!(first.z() >= -197.0);
    }

    #[test]
    fn prop_at_target_emits_nothing(x in -400.0f64..0.0, y in -300.0f64..0.0, z in -197.0f64..0.0) {
        let p = planner();
        let current = p.resolve_target(&Coordinates::new(x, y, z), &Coordinates::zero());
        let plan = p
            .plan_move(&current, &current, &Coordinates::zero(), MoveOptions::default())
            .unwrap();
        prop_assert!(plan.is_noop());
        prop_assert_eq!(plan.target, current);
    }

    #[test]
    fn prop_out_of_range_xy_rejected(
        x in prop_oneof![-1000.0f64..-415.001, 0.001f64..500.0],
        y in -300.0f64..0.0,
    ) {
        let p = planner();
        let result = p.plan_move(
            &Coordinates::new(-10.0, -10.0, -5.0),
            &Coordinates::new(x, y, -20.0),
            &Coordinates::zero(),
            MoveOptions::default(),
        );
        prop_assert!(result.unwrap_err().is_out_of_range());
    }

    #[test]
    fn prop_out_of_range_y_rejected(y in prop_oneof![-1000.0f64..-300.001, 0.001f64..500.0]) {
        let result = planner().plan_many(
            &Coordinates::new(-10.0, -10.0, -5.0),
            &[Coordinates::new(-50.0, y, -20.0)],
            &Coordinates::zero(),
            true,
        );
        prop_assert!(result.unwrap_err().is_out_of_range());
    }

    #[test]
    fn prop_low_xy_change_lifts_first(
        cz in -190.0f64..-10.5,
        x in -400.0f64..-1.0, y in -290.0f64..-1.0, z in -190.0f64..-1.0,
    ) {
        let p = planner();
        let current = Coordinates::new(0.0, 0.0, cz);
        let commands = p
            .plan_move(&current, &Coordinates::new(x, y, z), &Coordinates::zero(), MoveOptions::default())
            .unwrap()
            .commands;
        prop_assert_eq!(commands.len(), 3);
        prop_assert_eq!(commands[0].to_string(), "G01 Z0");
        prop_assert!(commands[2].to_string().starts_with("G01 Z"));
    }

    #[test]
    fn prop_clear_height_is_two_commands(
        cz in -10.0f64..0.0,
        x in -400.0f64..-1.0, y in -290.0f64..-1.0, z in -190.0f64..-1.0,
    ) {
        let p = planner();
        let current = Coordinates::new(0.0, 0.0, cz);
        let commands = p
            .plan_move(&current, &Coordinates::new(x, y, z), &Coordinates::zero(), MoveOptions::default())
            .unwrap()
            .commands;
        prop_assert_eq!(commands.len(), 2);
        prop_assert!(commands[0].to_string().starts_with("G01 X"));
        prop_assert!(commands[1].to_string().starts_with("G01 Z"));
    }
}
