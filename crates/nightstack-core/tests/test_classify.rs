mod common;

use common::{flat_buffer, record, reference_field};
use nightstack_core::frame::FrameType;
use nightstack_core::pipeline::classify::{ClassifierConfig, FrameClassifier};

fn classifier() -> FrameClassifier {
    FrameClassifier::new(ClassifierConfig::default())
}

#[test]
fn explicit_hint_always_wins() {
    let mut classifier = classifier();
    // Metadata says offset (zero exposure), the hint says dark.
    let frame = record("dark.raw", flat_buffer(0.01, 8, 8), 0.0).with_hint(FrameType::Dark);
    assert_eq!(classifier.classify(&frame), FrameType::Dark);
}

#[test]
fn zero_exposure_is_an_offset() {
    let mut classifier = classifier();
    let frame = record("bias.raw", flat_buffer(0.01, 8, 8), 0.0);
    assert_eq!(classifier.classify(&frame), FrameType::Offset);
}

#[test]
fn bright_featureless_frame_is_a_flat() {
    let mut classifier = classifier();
    let frame = record("flat.raw", flat_buffer(0.45, 8, 8), 2.0);
    assert_eq!(classifier.classify(&frame), FrameType::Flat);
}

#[test]
fn dim_long_exposure_is_a_dark() {
    let mut classifier = classifier();
    let frame = record("dark.raw", flat_buffer(0.01, 8, 8), 120.0);
    assert_eq!(classifier.classify(&frame), FrameType::Dark);
}

#[test]
fn dark_matching_flat_exposure_is_a_dark_flat() {
    let mut classifier = classifier();
    classifier.classify(&record("flat.raw", flat_buffer(0.45, 8, 8), 2.0));
    let frame = record("darkflat.raw", flat_buffer(0.01, 8, 8), 2.0);
    assert_eq!(classifier.classify(&frame), FrameType::DarkFlat);

    // A dark whose exposure does not match the flats stays a dark.
    let frame = record("dark.raw", flat_buffer(0.01, 8, 8), 120.0);
    assert_eq!(classifier.classify(&frame), FrameType::Dark);
}

#[test]
fn flat_hint_records_exposure_for_dark_flat_matching() {
    let mut classifier = classifier();
    classifier.classify(&record("flat.raw", flat_buffer(0.45, 8, 8), 3.0).with_hint(FrameType::Flat));
    let frame = record("darkflat.raw", flat_buffer(0.01, 8, 8), 3.0);
    assert_eq!(classifier.classify(&frame), FrameType::DarkFlat);
}

#[test]
fn star_field_defaults_to_light() {
    let mut classifier = classifier();
    let frame = record("light.raw", reference_field(), 30.0);
    assert_eq!(classifier.classify(&frame), FrameType::Light);
}
