use nightstack_core::quality::gate::{evaluate, RejectionKind, Thresholds, Verdict};
use nightstack_core::quality::metrics::QualityMetrics;
use nightstack_core::register::solve::Transform;

fn metrics(score: f64, star_count: usize, fwhm: f64, background: f64) -> QualityMetrics {
    QualityMetrics {
        score,
        star_count,
        fwhm,
        sky_background_percent: background,
    }
}

fn thresholds() -> Thresholds {
    Thresholds {
        min_score: 50.0,
        min_star_count: 10,
        max_fwhm: 6.0,
        max_sky_background_percent: 30.0,
        max_offset_pixels: 50.0,
        max_angle_degrees: 2.0,
    }
}

#[test]
fn passing_frame_is_stackable() {
    let verdict = evaluate(
        &metrics(80.0, 20, 3.0, 10.0),
        &Transform::identity(),
        &thresholds(),
    );
    assert_eq!(verdict, Verdict::Stackable);
}

#[test]
fn score_check_has_priority_over_star_count() {
    // Score fails, star count passes: the reported reason must be the
    // first check in priority order.
    let verdict = evaluate(
        &metrics(49.0, 20, 3.0, 10.0),
        &Transform::identity(),
        &thresholds(),
    );
    match verdict {
        Verdict::Rejected {
            kind,
            measured,
            threshold,
        } => {
            assert_eq!(kind, RejectionKind::ScoreTooLow);
            assert_eq!(measured, 49.0);
            assert_eq!(threshold, 50.0);
        }
        Verdict::Stackable => panic!("frame should be rejected"),
    }
}

#[test]
fn comparisons_are_inclusive() {
    // Exactly on every threshold: passes.
    let exact = metrics(50.0, 10, 6.0, 30.0);
    let transform = Transform {
        dx: 50.0,
        dy: -50.0,
        angle_degrees: 2.0,
    };
    assert_eq!(evaluate(&exact, &transform, &thresholds()), Verdict::Stackable);
}

#[test]
fn offset_is_gated_per_axis() {
    let m = metrics(80.0, 20, 3.0, 10.0);
    // Both axes within the limit pass even though the diagonal
    // magnitude exceeds it.
    let diagonal = Transform {
        dx: 45.0,
        dy: 45.0,
        angle_degrees: 0.0,
    };
    assert_eq!(evaluate(&m, &diagonal, &thresholds()), Verdict::Stackable);

    let tall = Transform {
        dx: 0.0,
        dy: -60.0,
        angle_degrees: 0.0,
    };
    match evaluate(&m, &tall, &thresholds()) {
        Verdict::Rejected { kind, measured, .. } => {
            assert_eq!(kind, RejectionKind::OffsetTooHigh);
            assert_eq!(measured, 60.0);
        }
        Verdict::Stackable => panic!("offset should exceed the axis limit"),
    }
}

#[test]
fn each_kind_is_reported() {
    let t = thresholds();
    let identity = Transform::identity();

    let cases = [
        (metrics(10.0, 20, 3.0, 10.0), identity, RejectionKind::ScoreTooLow),
        (metrics(80.0, 5, 3.0, 10.0), identity, RejectionKind::StarCountTooLow),
        (metrics(80.0, 20, 8.0, 10.0), identity, RejectionKind::FwhmTooHigh),
        (metrics(80.0, 20, 3.0, 45.0), identity, RejectionKind::BackgroundTooHigh),
        (
            metrics(80.0, 20, 3.0, 10.0),
            Transform {
                dx: 60.0,
                dy: 0.0,
                angle_degrees: 0.0,
            },
            RejectionKind::OffsetTooHigh,
        ),
        (
            metrics(80.0, 20, 3.0, 10.0),
            Transform {
                dx: 0.0,
                dy: 0.0,
                angle_degrees: -3.0,
            },
            RejectionKind::AngleTooHigh,
        ),
    ];

    for (m, transform, expected) in cases {
        match evaluate(&m, &transform, &t) {
            Verdict::Rejected { kind, .. } => assert_eq!(kind, expected),
            Verdict::Stackable => panic!("expected rejection with {expected:?}"),
        }
    }
}

#[test]
fn default_thresholds_admit_reasonable_frames() {
    let verdict = evaluate(
        &metrics(5.0, 3, 4.0, 8.0),
        &Transform::identity(),
        &Thresholds::default(),
    );
    assert_eq!(verdict, Verdict::Stackable);
}
