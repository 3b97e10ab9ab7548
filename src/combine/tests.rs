use super::*;
use crate::store::{ArrayData, ArraySpec, Complex64, DataType, Store, StoreError, GROUP_METADATA_FILE};
use serde_json::json;
use std::fs;
use tempfile::{tempdir, TempDir};

const CHANNELS: [&str; 2] = ["GPT 38 kHz", "GPT 120 kHz"];

/// Shape of one synthetic converted store
struct SourceSpec {
    name: &'static str,
    model: SonarModel,
    first_ping: i64,
    pings: usize,
    range_samples: usize,
    serial: &'static str,
    with_environment: bool,
}

impl SourceSpec {
    fn ek60(name: &'static str, first_ping: i64, pings: usize) -> Self {
        Self {
            name,
            model: SonarModel::Ek60,
            first_ping,
            pings,
            range_samples: 4,
            serial: "1001",
            with_environment: true,
        }
    }

    fn model(mut self, model: SonarModel) -> Self {
        self.model = model;
        self
    }
}

fn int_array(group: &Group, name: &str, dims: &[&str], values: Vec<i64>) -> Result<(), StoreError> {
    let len = values.len() as u64;
    group.create_array(name, ArraySpec::new(DataType::Int64, dims, 64), &ArrayData::Int64(values), &[len])?;
    Ok(())
}

fn build_source(dir: &TempDir, spec: &SourceSpec) -> Result<PathBuf, StoreError> {
    let path = dir.path().join(spec.name);
    let store = Store::create(&path)?;
    let mut root = store.root_group()?;
    root.insert_attribute(SONAR_MODEL_ATTRIBUTE, spec.model.as_str())?;

    let mut provenance = store.create_group("Provenance")?;
    provenance.insert_attribute("source_filenames", spec.name)?;

    let mut sonar = store.create_group("Sonar")?;
    sonar.insert_attribute("sonar_serial_number", spec.serial)?;

    let times: Vec<i64> = (0..spec.pings as i64).map(|i| spec.first_ping + i).collect();
    let mut beam = store.create_group("Beam")?;
    beam.insert_attribute("beam_mode", "vertical")?;
    int_array(&beam, "ping_time", &["ping_time"], times.clone())?;
    beam.create_array(
        "channel",
        ArraySpec::new(DataType::Utf8, &["channel"], 2),
        &ArrayData::Utf8(CHANNELS.iter().map(|c| c.to_string()).collect()),
        &[2],
    )?;
    let cells = spec.pings * CHANNELS.len() * spec.range_samples;
    let backscatter: Vec<f64> = (0..cells).map(|i| spec.first_ping as f64 + i as f64).collect();
    beam.create_array(
        "backscatter_r",
        ArraySpec::new(DataType::Float64, &["ping_time", "channel", "range_sample"], 32),
        &ArrayData::Float64(backscatter),
        &[spec.pings as u64, 2, spec.range_samples as u64],
    )?;

    if spec.with_environment {
        let env = store.create_group("Environment")?;
        if spec.model == SonarModel::Azfp {
            int_array(&env, "ping_time", &["ping_time"], times.clone())?;
            env.create_array(
                "temperature",
                ArraySpec::new(DataType::Float64, &["ping_time"], 64),
                &ArrayData::Float64(vec![spec.first_ping as f64; spec.pings]),
                &[spec.pings as u64],
            )?;
        } else {
            env.create_array(
                "sound_speed",
                ArraySpec::new(DataType::Float64, &["channel"], 2),
                &ArrayData::Float64(vec![1500.0, 1500.0]),
                &[2],
            )?;
        }
    }

    let platform = store.create_group("Platform")?;
    int_array(&platform, "location_time", &["location_time"], times.clone())?;

    match spec.model {
        SonarModel::Ek60 | SonarModel::Ek80 => {
            let nmea = store.create_group("Platform/NMEA")?;
            int_array(&nmea, "time", &["time"], times.clone())?;
        }
        SonarModel::Azfp => {
            let vendor = store.create_group("Vendor")?;
            int_array(&vendor, "ping_time", &["ping_time"], times)?;
        }
    }

    if spec.model == SonarModel::Ek80 {
        let mut vendor = store.create_group("Vendor")?;
        vendor.insert_attribute("decimation", json!([6, 1]))?;
        let coefficients: Vec<Complex64> = (0..8).map(|i| Complex64::new(i as f32, -(i as f32))).collect();
        vendor.create_array(
            "WBT_filter",
            ArraySpec::new(DataType::Complex64, &["WBT_filter_n"], 8),
            &ArrayData::Complex64(coefficients),
            &[8],
        )?;
    }

    store.finalize()?;
    Ok(path)
}

fn combined(outcome: CombineOutcome) -> CombineReport {
    match outcome {
        CombineOutcome::Combined(report) => report,
        CombineOutcome::Skipped(reason) => panic!("combine skipped: {reason}"),
    }
}

fn skipped(outcome: CombineOutcome) -> SkipReason {
    match outcome {
        CombineOutcome::Skipped(reason) => reason,
        CombineOutcome::Combined(report) => panic!("unexpected combine: {report}"),
    }
}

// ==================== Concatenation Tests ====================

#[test]
fn test_three_sources_concatenate_beam_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 100))?,
        build_source(&dir, &SourceSpec::ek60("D2.zarr", 1_000, 100))?,
        build_source(&dir, &SourceSpec::ek60("D3.zarr", 2_000, 100))?,
    ];

    let report = combined(StoreCombiner::new(SonarModel::Ek60).combine(&sources, None)?);
    assert_eq!(report.outputs.len(), 1);
    let output = &report.outputs[0];
    assert_eq!(output.path, dir.path().join("D1[combined].zarr"));
    assert_eq!(output.sources, sources);

    let store = Store::open(&output.path)?;
    assert!(store.is_finalized());
    let beam = store.group("Beam")?;
    let ping_time = beam.array("ping_time")?;
    assert_eq!(ping_time.shape(), &[300]);
    let expected: Vec<i64> = (0..100).chain(1_000..1_100).chain(2_000..2_100).collect();
    assert_eq!(ping_time.read()?, ArrayData::Int64(expected));

    assert_eq!(beam.array("backscatter_r")?.shape(), &[300, 2, 4]);
    assert_eq!(beam.array("channel")?.shape(), &[2]);
    assert_eq!(beam.attribute("beam_mode"), Some(&json!("vertical")));
    assert_eq!(
        store.root_group()?.attribute(SONAR_MODEL_ATTRIBUTE),
        Some(&json!("EK60"))
    );
    assert_eq!(store.group("Platform/NMEA")?.array("time")?.shape(), &[300]);
    assert!(!store.has_group("Vendor"));
    Ok(())
}

#[test]
fn test_copy_first_groups_are_byte_identical() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 10))?,
        build_source(&dir, &SourceSpec::ek60("D2.zarr", 10, 10))?,
    ];

    let report = combined(StoreCombiner::new(SonarModel::Ek60).combine(&sources, None)?);
    let dest = &report.outputs[0].path;

    for group in ["Provenance", "Sonar"] {
        let source_meta = fs::read(sources[0].join(group).join(GROUP_METADATA_FILE))?;
        let dest_meta = fs::read(dest.join(group).join(GROUP_METADATA_FILE))?;
        assert_eq!(source_meta, dest_meta, "{group}/group.json differs");
    }
    let chunk = |root: &Path| fs::read(root.join("Environment/sound_speed/c/0.parquet"));
    assert_eq!(chunk(&sources[0])?, chunk(dest)?);

    let provenance = Store::open(dest)?.group("Provenance")?;
    assert_eq!(provenance.attribute("source_filenames"), Some(&json!("D1.zarr")));
    Ok(())
}

#[test]
fn test_groups_keep_source_order() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 500, 2))?,
        build_source(&dir, &SourceSpec::ek60("D2.zarr", 100, 2))?,
    ];

    let report = combined(StoreCombiner::new(SonarModel::Ek60).combine(&sources, None)?);
    let store = Store::open(&report.outputs[0].path)?;

    let in_source_order = ArrayData::Int64(vec![500, 501, 100, 101]);
    assert_eq!(store.group("Beam")?.array("ping_time")?.read()?, in_source_order);
    assert_eq!(store.group("Platform")?.array("location_time")?.read()?, in_source_order);
    assert_eq!(store.group("Platform/NMEA")?.array("time")?.read()?, in_source_order);
    assert_eq!(
        store.group("Provenance")?.attribute("source_filenames"),
        Some(&json!("D1.zarr"))
    );
    Ok(())
}

#[test]
fn test_by_time_order_is_opt_in() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 500, 3))?,
        build_source(&dir, &SourceSpec::ek60("D2.zarr", 100, 3))?,
    ];

    let mut policy = PolicyTable::default();
    policy.set(SonarModel::Ek60, GroupSlot::Beam, MergeStrategy::ConcatTime(ConcatOrder::ByTime));
    let report = combined(
        StoreCombiner::new(SonarModel::Ek60)
            .with_policy(policy)
            .combine(&sources, None)?,
    );
    let store = Store::open(&report.outputs[0].path)?;

    assert_eq!(
        store.group("Beam")?.array("ping_time")?.read()?,
        ArrayData::Int64(vec![100, 101, 102, 500, 501, 502])
    );
    assert_eq!(
        store.group("Platform/NMEA")?.array("time")?.read()?,
        ArrayData::Int64(vec![500, 501, 502, 100, 101, 102])
    );
    Ok(())
}

#[test]
fn test_nested_rejects_mismatched_extents() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut wide = SourceSpec::ek60("D2.zarr", 10, 2);
    wide.range_samples = 6;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 2))?,
        build_source(&dir, &wide)?,
    ];

    let mut policy = PolicyTable::default();
    policy.set(SonarModel::Ek60, GroupSlot::Beam, MergeStrategy::ConcatTime(ConcatOrder::Nested));
    let result = StoreCombiner::new(SonarModel::Ek60)
        .with_policy(policy)
        .combine(&sources, None);

    assert!(matches!(result, Err(CombineError::Store(StoreError::ShapeMismatch { .. }))));
    assert!(!dir.path().join("D1[combined].zarr").exists());
    Ok(())
}

#[test]
fn test_concat_streams_many_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut narrow = SourceSpec::ek60("D1.zarr", 0, 70);
    narrow.range_samples = 3;
    let sources = vec![
        build_source(&dir, &narrow)?,
        build_source(&dir, &SourceSpec::ek60("D2.zarr", 1_000, 50))?,
    ];

    let report = combined(StoreCombiner::new(SonarModel::Ek60).combine(&sources, None)?);
    let beam = Store::open(&report.outputs[0].path)?.group("Beam")?;

    // Sources hold 32-row chunks; the destination keeps that chunk length
    let backscatter = beam.array("backscatter_r")?;
    assert_eq!(backscatter.shape(), &[120, 2, 4]);
    assert_eq!(backscatter.chunks()[0], 32);
    assert_eq!(backscatter.num_chunks(), 4);

    let data = backscatter.read()?;
    let values = data.as_f64().unwrap();
    // Last row of the narrow source: 3 samples then one padded cell
    let row = (69 * 2 + 1) * 4;
    assert_eq!(&values[row..row + 3], &[417.0, 418.0, 419.0]);
    assert!(values[row + 3].is_nan());
    // First row of the wide source follows directly
    assert_eq!(values[70 * 2 * 4], 1_000.0);

    let expected: Vec<i64> = (0..70).chain(1_000..1_050).collect();
    assert_eq!(beam.array("ping_time")?.read()?, ArrayData::Int64(expected));
    Ok(())
}

#[test]
fn test_smaller_extents_are_padded_with_fill_value() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut wide = SourceSpec::ek60("D2.zarr", 10, 1);
    wide.range_samples = 6;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 1))?,
        build_source(&dir, &wide)?,
    ];

    let report = combined(StoreCombiner::new(SonarModel::Ek60).combine(&sources, None)?);
    let array = Store::open(&report.outputs[0].path)?.group("Beam")?.array("backscatter_r")?;
    assert_eq!(array.shape(), &[2, 2, 6]);

    let data = array.read()?;
    let values = data.as_f64().unwrap();
    // First source, first channel: 4 samples then padding
    assert_eq!(&values[0..4], &[0.0, 1.0, 2.0, 3.0]);
    assert!(values[4..6].iter().all(|v| v.is_nan()));
    // Second source is stored as-is
    assert_eq!(values[12], 10.0);
    assert!(values[12..].iter().all(|v| !v.is_nan()));
    Ok(())
}

// ==================== Precondition Tests ====================

#[test]
fn test_single_source_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let source = build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 5))?;

    let config = CombineConfig {
        remove_sources: true,
        ..CombineConfig::default()
    };
    let outcome = StoreCombiner::new(SonarModel::Ek60)
        .with_config(config)
        .combine(&[&source], None)?;

    assert_eq!(skipped(outcome), SkipReason::InsufficientSources { found: 1 });
    assert!(source.exists());
    assert!(!dir.path().join("D1[combined].zarr").exists());
    Ok(())
}

#[test]
fn test_inconsistent_sources_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut other = SourceSpec::ek60("D2.zarr", 10, 5);
    other.serial = "2002";
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 5))?,
        build_source(&dir, &other)?,
    ];

    let config = CombineConfig {
        remove_sources: true,
        key_attributes: vec![SONAR_MODEL_ATTRIBUTE.to_string(), "sonar_serial_number".to_string()],
        ..CombineConfig::default()
    };
    let outcome = StoreCombiner::new(SonarModel::Ek60)
        .with_config(config)
        .combine(&sources, None)?;

    let reason = skipped(outcome);
    assert!(matches!(reason, SkipReason::ConsistencyCheckFailed(ref r) if r.contains("sonar_serial_number")));
    assert!(!dir.path().join("D1[combined].zarr").exists());
    assert!(sources.iter().all(|s| s.exists()));
    Ok(())
}

#[test]
fn test_model_mismatch_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 5))?,
        build_source(&dir, &SourceSpec::ek60("D2.zarr", 10, 5).model(SonarModel::Azfp))?,
    ];

    let outcome = StoreCombiner::new(SonarModel::Ek60).combine(&sources, None)?;
    assert!(matches!(skipped(outcome), SkipReason::ConsistencyCheckFailed(_)));
    Ok(())
}

// ==================== Split Tests ====================

#[test]
fn test_ek80_split_writes_two_outputs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let ek80 = |name, first| SourceSpec::ek60(name, first, 4).model(SonarModel::Ek80);
    let sources = vec![
        build_source(&dir, &ek80("D1.zarr", 0))?,
        build_source(&dir, &ek80("D1_cw.zarr", 0))?,
        build_source(&dir, &ek80("D2.zarr", 10))?,
        build_source(&dir, &ek80("D2_cw.zarr", 10))?,
    ];

    let report = combined(StoreCombiner::new(SonarModel::Ek80).combine(&sources, None)?);
    assert!(report.empty_subgroups.is_empty());
    let paths: Vec<PathBuf> = report.outputs.iter().map(|o| o.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            dir.path().join("D1[combined].zarr"),
            dir.path().join("D1[combined]_cw.zarr"),
        ]
    );
    assert_eq!(report.outputs[0].sources, vec![sources[0].clone(), sources[2].clone()]);
    assert_eq!(report.outputs[1].sources, vec![sources[1].clone(), sources[3].clone()]);

    for output in &report.outputs {
        let store = Store::open(&output.path)?;
        assert_eq!(store.group("Beam")?.array("ping_time")?.shape(), &[8]);
        assert_eq!(
            output.groups.last(),
            Some(&(GroupSlot::FilterCoefficients.to_string(), MergeStrategy::CopyBinaryBlock))
        );
    }
    Ok(())
}

#[test]
fn test_empty_split_subgroup_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let ek80 = |name, first| SourceSpec::ek60(name, first, 4).model(SonarModel::Ek80);
    let sources = vec![
        build_source(&dir, &ek80("D1.zarr", 0))?,
        build_source(&dir, &ek80("D2.zarr", 10))?,
    ];

    let report = combined(StoreCombiner::new(SonarModel::Ek80).combine(&sources, None)?);
    assert_eq!(report.outputs.len(), 1);
    assert_eq!(report.empty_subgroups, vec!["_cw".to_string()]);
    assert!(!dir.path().join("D1[combined]_cw.zarr").exists());
    Ok(())
}

#[test]
fn test_filter_coefficients_are_copied_once() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let ek80 = |name, first| SourceSpec::ek60(name, first, 2).model(SonarModel::Ek80);
    let sources = vec![
        build_source(&dir, &ek80("D1.zarr", 0))?,
        build_source(&dir, &ek80("D2.zarr", 10))?,
    ];

    let report = combined(
        StoreCombiner::new(SonarModel::Ek80)
            .with_split(None)
            .combine(&sources, None)?,
    );
    let vendor = Store::open(&report.outputs[0].path)?.group("Vendor")?;
    assert_eq!(vendor.attribute("decimation"), Some(&json!([6, 1])));

    let block = FilterCoefficientBlock::read(&vendor)?;
    assert_eq!(block.arrays.len(), 1);
    let (name, metadata, values) = &block.arrays[0];
    assert_eq!(name, "WBT_filter");
    assert_eq!(metadata.shape, vec![8]);
    assert_eq!(values[3], Complex64::new(3.0, -3.0));
    Ok(())
}

// ==================== Failure and Cleanup Tests ====================

#[test]
fn test_group_missing_from_some_sources_aborts() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut bare = SourceSpec::ek60("D2.zarr", 10, 5);
    bare.with_environment = false;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 5))?,
        build_source(&dir, &bare)?,
    ];

    let result = StoreCombiner::new(SonarModel::Ek60).combine(&sources, None);
    assert!(matches!(result, Err(CombineError::Store(StoreError::NotFound(_)))));
    assert!(!dir.path().join("D1[combined].zarr").exists());
    assert!(sources.iter().all(|s| s.exists()));
    Ok(())
}

#[test]
fn test_existing_destination_requires_overwrite() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 3))?,
        build_source(&dir, &SourceSpec::ek60("D2.zarr", 10, 3))?,
    ];
    let dest = dir.path().join("all.zarr");

    let combiner = StoreCombiner::new(SonarModel::Ek60);
    combined(combiner.combine(&sources, Some(&dest))?);
    assert!(matches!(
        combiner.combine(&sources, Some(&dest)),
        Err(CombineError::AlreadyExists(_))
    ));

    let overwrite = combiner.with_config(CombineConfig {
        overwrite: true,
        ..CombineConfig::default()
    });
    let report = combined(overwrite.combine(&sources, Some(&dest))?);
    assert_eq!(report.outputs[0].path, dest);
    Ok(())
}

#[test]
fn test_remove_sources_after_combine() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = vec![
        build_source(&dir, &SourceSpec::ek60("D1.zarr", 0, 3))?,
        build_source(&dir, &SourceSpec::ek60("D2.zarr", 10, 3))?,
    ];
    let save_dir = dir.path().join("combined");

    let config = CombineConfig {
        remove_sources: true,
        ..CombineConfig::default()
    };
    let report = combined(
        StoreCombiner::new(SonarModel::Ek60)
            .with_config(config)
            .combine(&sources, Some(&save_dir))?,
    );

    assert_eq!(report.outputs[0].path, save_dir.join("D1[combined].zarr"));
    assert!(report.outputs[0].path.exists());
    assert!(report.deletion.is_complete());
    assert_eq!(report.deletion.removed, sources);
    assert!(sources.iter().all(|s| !s.exists()));
    Ok(())
}

#[test]
fn test_partial_deletion_failure_is_reported() {
    let report = DeletionReport {
        removed: vec![PathBuf::from("a.zarr")],
        failed: vec![(PathBuf::from("b.zarr"), "permission denied".to_string())],
    };
    assert!(!report.is_complete());
    match report.into_result() {
        Err(CombineError::PartialDeletionFailure { failed }) => {
            assert_eq!(failed, vec![PathBuf::from("b.zarr")]);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// ==================== AZFP Policy Tests ====================

#[test]
fn test_azfp_concatenates_environment_and_vendor() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let azfp = |name, first| SourceSpec::ek60(name, first, 5).model(SonarModel::Azfp);
    let sources = vec![
        build_source(&dir, &azfp("A1.zarr", 0))?,
        build_source(&dir, &azfp("A2.zarr", 100))?,
    ];

    let report = combined(StoreCombiner::new(SonarModel::Azfp).combine(&sources, None)?);
    let output = &report.outputs[0];
    let store = Store::open(&output.path)?;

    assert_eq!(store.group("Environment")?.array("temperature")?.shape(), &[10]);
    assert_eq!(store.group("Vendor")?.array("ping_time")?.shape(), &[10]);
    // Platform is copied from the first source only
    assert_eq!(store.group("Platform")?.array("location_time")?.shape(), &[5]);
    assert!(!store.has_group("Platform/NMEA"));

    let strategies: Vec<(String, MergeStrategy)> = output.groups.clone();
    assert!(strategies.contains(&(
        "Environment".to_string(),
        MergeStrategy::ConcatTime(ConcatOrder::ByCoords)
    )));
    assert!(strategies.contains(&("Platform".to_string(), MergeStrategy::CopyFirst)));
    Ok(())
}
