mod support;

use std::time::Duration;

use knownface_core::{
    FaceMatchService, FailureClass, MatchConfig, MatchError, Outcome, ProviderError,
};
use support::{image_with_faces, write_reference, FakeProvider, SLOW_MARKER};
use tempfile::TempDir;

const ALICE: [f32; 2] = [0.0, 0.0];
const BOB: [f32; 2] = [0.95, 0.0];

fn alice_and_bob() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_reference(tmp.path(), "alice.jpg", &[&ALICE]);
    write_reference(tmp.path(), "bob.jpg", &[&BOB]);
    tmp
}

fn service(dir: &std::path::Path) -> FaceMatchService<FakeProvider> {
    FaceMatchService::new(FakeProvider::new(), MatchConfig::new(dir)).unwrap()
}

#[tokio::test]
async fn single_face_matches_closest_identity_only() {
    let gallery = alice_and_bob();
    let service = service(gallery.path());

    // 0.05 from alice, 0.9 from bob.
    let result = service
        .match_image(&image_with_faces(&[&[0.05, 0.0]]))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Match);
    assert_eq!(result.identities, vec!["alice.jpg"]);
    assert_eq!(result.faces.len(), 1);
    assert!((result.faces[0].matches[0].distance - 0.05).abs() < 1e-6);
    assert_eq!(result.comparisons, 2);
}

#[tokio::test]
async fn no_faces_wins_over_gallery_state() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp.path().join("missing"));

    let err = service.match_image(b"").await.unwrap_err();
    assert!(matches!(err, MatchError::NoFacesDetected));
    assert_eq!(err.class(), FailureClass::Input);
}

#[tokio::test]
async fn faceless_gallery_is_empty_not_no_match() {
    let tmp = TempDir::new().unwrap();
    write_reference(tmp.path(), "alice.jpg", &[]);
    write_reference(tmp.path(), "bob.jpg", &[]);
    let service = service(tmp.path());

    let err = service
        .match_image(&image_with_faces(&[&ALICE]))
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::GalleryEmpty { skipped: 2, .. }), "{err:?}");
    assert_eq!(err.class(), FailureClass::Resource);
}

#[tokio::test]
async fn missing_gallery_propagates() {
    let tmp = TempDir::new().unwrap();
    let service = service(&tmp.path().join("known_faces"));

    let err = service
        .match_image(&image_with_faces(&[&ALICE]))
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::GalleryUnavailable { .. }), "{err:?}");
}

#[tokio::test]
async fn partial_match_across_faces_is_a_match() {
    let gallery = alice_and_bob();
    let service = service(gallery.path());

    let query = image_with_faces(&[&[0.02, 0.01], &[-5.0, 7.0]]);
    let result = service.match_image(&query).await.unwrap();

    assert!(result.is_match());
    assert_eq!(result.identities, vec!["alice.jpg"]);
    assert!(result.faces[0].is_match());
    assert!(!result.faces[1].is_match());
    assert_eq!(result.comparisons, 4);
}

#[tokio::test]
async fn stranger_is_no_match() {
    let gallery = alice_and_bob();
    let service = service(gallery.path());

    let result = service
        .match_image(&image_with_faces(&[&[5.0, 5.0]]))
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::NoMatch);
    assert!(result.identities.is_empty());
    assert_eq!(result.message(), "No match found in the database");
}

#[tokio::test]
async fn repeated_match_is_idempotent() {
    let gallery = alice_and_bob();
    let service = service(gallery.path());
    let query = image_with_faces(&[&[0.5, 0.0], &[0.9, 0.05]]);

    let first = service.match_image(&query).await.unwrap();
    let second = service.match_image(&query).await.unwrap();

    assert_eq!(first.identities, second.identities);
    assert_eq!(first.faces, second.faces);
    assert_eq!(first.gallery.fingerprint, second.gallery.fingerprint);
    // 0.5 is within 0.6 of both alice and bob.
    assert_eq!(first.identities, vec!["alice.jpg", "bob.jpg"]);
}

#[tokio::test]
async fn dimension_mismatch_surfaces() {
    let gallery = alice_and_bob();
    let service = service(gallery.path());

    let err = service
        .match_image(&image_with_faces(&[&[0.0, 0.0, 0.0]]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MatchError::DimensionMismatch { expected: 2, actual: 3 }
    ));
}

#[tokio::test]
async fn corrupt_query_is_extraction_failed() {
    let gallery = alice_and_bob();
    let service = service(gallery.path());

    let err = service.match_image(&[0xff, 0xfe, 0x00]).await.unwrap_err();
    assert!(matches!(
        err,
        MatchError::ExtractionFailed(ProviderError::Decode(_))
    ));
    assert_eq!(err.class(), FailureClass::Provider);
}

#[tokio::test]
async fn slow_query_times_out() {
    let gallery = alice_and_bob();
    let mut config = MatchConfig::new(gallery.path());
    config.extraction_timeout = Duration::from_millis(50);
    let service = FaceMatchService::new(FakeProvider::new(), config).unwrap();

    let err = service
        .match_image(SLOW_MARKER.as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::ExtractionTimeout(_)));
    // The gallery was never consulted.
    assert!(service.gallery().current().await.is_none());
}

#[tokio::test]
async fn invalid_threshold_rejected_at_construction() {
    let gallery = alice_and_bob();
    let mut config = MatchConfig::new(gallery.path());
    config.distance_threshold = -1.0;
    assert!(matches!(
        FaceMatchService::new(FakeProvider::new(), config),
        Err(MatchError::InvalidThreshold(_))
    ));
}

#[tokio::test]
async fn zero_timeout_rejected_at_construction() {
    let gallery = alice_and_bob();
    let mut config = MatchConfig::new(gallery.path());
    config.extraction_timeout = Duration::ZERO;
    let err = FaceMatchService::new(FakeProvider::new(), config).err().unwrap();
    assert!(matches!(err, MatchError::InvalidTimeout));
    assert_eq!(err.class(), FailureClass::Input);
}

#[tokio::test]
async fn result_serializes_for_callers() {
    let gallery = alice_and_bob();
    let service = service(gallery.path());

    let result = service
        .match_image(&image_with_faces(&[&[0.05, 0.0]]))
        .await
        .unwrap();
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["outcome"], "match");
    assert_eq!(json["identities"][0], "alice.jpg");
    assert_eq!(json["gallery"]["entries"], 2);
    assert_eq!(json["gallery"]["model_version"], "fake-v1");
}
