mod common;
use common::{cyclic_labels, synth_signal};

use ndarray::array;
use somno::store::{SubjectDir, SubjectStore};
use somno::{
    prepare, BatchGenerator, ChannelStats, LabelMap, PipelineConfig, PipelineError,
    SubjectPartition,
};

#[test]
fn raw_arrays_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubjectDir::new(dir.path());

    let x = synth_signal(300, 5, 0.0);
    let y = cyclic_labels(300);
    store.save_raw("S001", &x, &y).unwrap();

    let (signal, labels) = store.load_raw("S001").unwrap();
    assert_eq!(signal, x);
    assert_eq!(labels, y);
    assert_eq!(store.load_labels("S001").unwrap(), y);
}

#[test]
fn sample_count_peeks_the_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubjectDir::new(dir.path());
    store
        .save_raw("S001", &synth_signal(1234, 3, 0.0), &cyclic_labels(1234))
        .unwrap();

    assert_eq!(store.sample_count("S001").unwrap(), 1234);
}

#[test]
fn missing_arrays_surface_as_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubjectDir::new(dir.path());

    assert!(matches!(
        store.load_raw("S404"),
        Err(PipelineError::SubjectNotFound { kind: "raw", .. })
    ));
    assert!(matches!(
        store.sample_count("S404"),
        Err(PipelineError::SubjectNotFound { kind: "raw", .. })
    ));
    assert!(!store.has_normalized("S404"));
    assert!(matches!(
        store.load_normalized("S404"),
        Err(PipelineError::SubjectNotFound {
            kind: "normalized",
            ..
        })
    ));
}

#[test]
fn normalized_arrays_round_trip_and_gate_on_has() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubjectDir::new(dir.path());

    let xn = synth_signal(64, 4, 0.5);
    assert!(!store.has_normalized("S001"));
    store.save_normalized("S001", &xn).unwrap();
    assert!(store.has_normalized("S001"));
    assert_eq!(store.load_normalized("S001").unwrap(), xn);
}

#[test]
fn statistics_artifact_round_trips_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubjectDir::new(dir.path());

    assert!(!store.has_statistics());
    assert!(matches!(
        store.load_statistics(),
        Err(PipelineError::StatisticsMissing)
    ));

    let stats = ChannelStats {
        mean: array![1.25e-3, -7.5, 0.0],
        std: array![0.5, 2.0, 1e-8],
    };
    store.save_statistics(&stats).unwrap();
    assert!(store.has_statistics());
    // f64 round trip must be bit-exact.
    assert_eq!(store.load_statistics().unwrap(), stats);
}

#[test]
fn mislabeled_raw_file_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubjectDir::new(dir.path());
    let x = synth_signal(10, 2, 0.0);
    assert!(matches!(
        store.save_raw("S001", &x, &cyclic_labels(9)),
        Err(PipelineError::Format(_))
    ));
}

/// Full filesystem pass: ingest → prepare → batches, all through one
/// directory.
#[test]
fn prepare_and_batch_over_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubjectDir::new(dir.path());

    store
        .save_raw("S001", &synth_signal(300, 3, 0.0), &cyclic_labels(300))
        .unwrap();
    store
        .save_raw("S002", &synth_signal(280, 3, 2.0), &cyclic_labels(280))
        .unwrap();

    let cfg = PipelineConfig {
        window_size: 64,
        batch_size: 2,
        n_channels: 3,
        shuffle: false,
        ..PipelineConfig::default()
    };
    let partition = SubjectPartition::new(vec!["S001".into()], vec!["S002".into()]);
    prepare(&store, &partition, &cfg).unwrap();

    assert!(store.has_statistics());
    assert!(store.has_normalized("S001"));
    assert!(store.has_normalized("S002"));

    let mut gen = BatchGenerator::new(
        &store,
        vec!["S001".into(), "S002".into()],
        LabelMap::sleep_stages(),
        cfg.clone(),
    )
    .unwrap();

    // floor(300/64)=4 windows + floor(280/64)=4 windows → 4 batches of 2.
    assert_eq!(gen.num_windows(), 8);
    assert_eq!(gen.num_batches(), 4);
    for i in 0..gen.num_batches() {
        let batch = gen.get_batch(i).unwrap();
        assert_eq!(batch.signals.shape(), &[2, 64, 3, 1]);
        assert_eq!(batch.labels.shape(), &[2, 7]);
        // Every row resolved here, so exactly one unit entry per row.
        for row in batch.labels.rows() {
            assert_eq!(row.sum(), 1.0);
        }
    }

    // A second prepare over the same directory is a no-op.
    prepare(&store, &partition, &cfg).unwrap();
}
