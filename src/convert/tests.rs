use super::*;
use crate::record::DatagramRecord;
use crate::store::DataType;
use serde_json::json;
use tempfile::{tempdir, TempDir};

/// Reads `<first ping>` from a text file and makes `pings` pings on two channels
#[derive(Debug)]
struct FakeParser {
    pings: i64,
}

impl DatagramParser for FakeParser {
    fn sonar_model(&self) -> SonarModel {
        SonarModel::Ek60
    }

    fn parse(&self, source: &Path, _output: &Path) -> Result<ParsedFile, ParseError> {
        let first: i64 = fs::read_to_string(source)?.trim().parse()?;

        let mut records = Vec::new();
        for t in first..first + self.pings {
            records.push(DatagramRecord::new(t, "GPT 38 kHz", vec![-60.0; 6]).with_aux("sample_interval", 1e-4));
            records.push(DatagramRecord::new(t, "GPT 120 kHz", vec![-70.0; 4]).with_aux("sample_interval", 2e-4));
        }

        let environment = GroupPayload::new("Environment").with_array(ArrayPayload::new(
            "sound_speed",
            ArraySpec::new(DataType::Float64, &["channel"], 2),
            ArrayData::Float64(vec![1500.0, 1500.0]),
            vec![2],
        ));

        Ok(ParsedFile {
            groups: vec![
                GroupPayload::new("Sonar").with_attribute("sonar_serial_number", "1001"),
                environment,
                GroupPayload::new("Platform").with_attribute("platform_type", "unknown"),
            ],
            batches: vec![FieldBatch::new("Beam", "backscatter_r", records)],
            auxiliary_outputs: Vec::new(),
        })
    }
}

fn raw_files(dir: &TempDir, contents: &[&str]) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for (i, content) in contents.iter().enumerate() {
        let path = dir.path().join(format!("D{}.raw", i + 1));
        fs::write(&path, content)?;
        paths.push(path);
    }
    Ok(paths)
}

fn params() -> ConversionParams {
    let mut extra = Attributes::new();
    extra.insert("cruise_id".to_string(), json!("SH1701"));
    ConversionParams {
        platform_name: Some("Bell M. Shimada".to_string()),
        platform_code_ices: Some("315J".to_string()),
        platform_type: Some("Research vessel".to_string()),
        water_level: Some(0.0),
        survey_name: Some("2017 Hake Survey".to_string()),
        extra,
    }
}

#[test]
fn test_convert_writes_one_store_per_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = raw_files(&dir, &["0", "100"])?;

    let converter = Converter::new(FakeParser { pings: 5 }, &sources).with_params(params());
    let report = converter.convert(None)?;

    assert_eq!(report.failed_count(), 0);
    assert!(report.combine.is_none());
    assert_eq!(
        report.outputs(),
        vec![dir.path().join("D1.zarr"), dir.path().join("D2.zarr")]
    );

    let store = Store::open(dir.path().join("D1.zarr"))?;
    assert!(store.is_finalized());

    let root = store.root_group()?;
    assert_eq!(root.attribute(SONAR_MODEL_ATTRIBUTE), Some(&json!("EK60")));
    assert_eq!(root.attribute("survey_name"), Some(&json!("2017 Hake Survey")));
    assert_eq!(root.attribute("cruise_id"), Some(&json!("SH1701")));

    let provenance = store.group(PROVENANCE_GROUP)?;
    assert_eq!(
        provenance.attribute("conversion_software_name"),
        Some(&json!(env!("CARGO_PKG_NAME")))
    );
    assert_eq!(provenance.attribute("source_filenames"), Some(&json!(["D1.raw"])));
    assert!(provenance.attribute("conversion_time").is_some());

    let platform = store.group(PLATFORM_GROUP)?;
    assert_eq!(platform.attribute("platform_type"), Some(&json!("Research vessel")));
    assert_eq!(platform.attribute("platform_code_ICES"), Some(&json!("315J")));
    assert_eq!(platform.attribute("water_level"), Some(&json!(0.0)));

    let beam = store.group("Beam")?;
    assert_eq!(beam.array("backscatter_r")?.shape(), &[5, 2, 6]);
    assert_eq!(beam.array("sample_interval")?.shape(), &[5, 2]);
    assert_eq!(store.group("Environment")?.array("sound_speed")?.shape(), &[2]);

    match &report.files[0] {
        FileOutcome::Converted(file) => {
            assert!(file.fields.is_success());
            assert_eq!(file.fields.written.len(), 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_existing_output_is_skipped_unless_overwrite() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = raw_files(&dir, &["0"])?;

    let converter = Converter::new(FakeParser { pings: 3 }, &sources);
    converter.convert(None)?;

    let report = converter.convert(None)?;
    assert!(matches!(report.files[0], FileOutcome::AlreadyConverted { .. }));
    assert_eq!(report.outputs(), vec![dir.path().join("D1.zarr")]);

    let overwrite = Converter::new(FakeParser { pings: 4 }, &sources).with_config(ConvertConfig {
        overwrite: true,
        ..ConvertConfig::default()
    });
    let report = overwrite.convert(None)?;
    assert!(matches!(report.files[0], FileOutcome::Converted(_)));
    let store = Store::open(dir.path().join("D1.zarr"))?;
    assert_eq!(store.group("Beam")?.array("ping_time")?.shape(), &[4]);
    Ok(())
}

#[test]
fn test_partial_output_is_not_reused() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = raw_files(&dir, &["0", "100"])?;
    // Left behind by an interrupted run: created, never finalized
    Store::create(dir.path().join("D1.zarr"))?;

    let config = ConvertConfig {
        combine: Some(CombineConfig {
            remove_sources: true,
            ..CombineConfig::default()
        }),
        ..ConvertConfig::default()
    };
    let report = Converter::new(FakeParser { pings: 2 }, &sources)
        .with_config(config.clone())
        .convert(None)?;

    assert!(matches!(
        &report.files[0],
        FileOutcome::Failed { error: ConvertError::PartialStore(path), .. } if path == &dir.path().join("D1.zarr")
    ));
    assert!(matches!(report.files[1], FileOutcome::Converted(_)));
    assert_eq!(
        report.combine,
        Some(CombineOutcome::Skipped(SkipReason::FailedConversions { failed: 1 }))
    );
    assert!(dir.path().join("D1.zarr").exists());
    assert!(dir.path().join("D2.zarr").exists());

    let report = Converter::new(FakeParser { pings: 2 }, &sources)
        .with_config(ConvertConfig { overwrite: true, ..config })
        .convert(None)?;
    assert_eq!(report.failed_count(), 0);
    assert!(report.combine.as_ref().is_some_and(CombineOutcome::is_combined));
    assert!(dir.path().join("D1[combined].zarr").exists());
    Ok(())
}

#[test]
fn test_failed_file_does_not_stop_others() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = raw_files(&dir, &["0", "not a number", "200"])?;

    let config = ConvertConfig {
        combine: Some(CombineConfig::default()),
        ..ConvertConfig::default()
    };
    let report = Converter::new(FakeParser { pings: 2 }, &sources)
        .with_config(config)
        .convert(None)?;

    assert_eq!(report.failed_count(), 1);
    assert!(matches!(
        &report.files[1],
        FileOutcome::Failed { error: ConvertError::Parse { .. }, .. }
    ));
    assert_eq!(report.files[1].source(), sources[1].as_path());
    assert!(dir.path().join("D1.zarr").exists());
    assert!(dir.path().join("D3.zarr").exists());

    assert_eq!(
        report.combine,
        Some(CombineOutcome::Skipped(SkipReason::FailedConversions { failed: 1 }))
    );
    assert!(!dir.path().join("D1[combined].zarr").exists());
    Ok(())
}

#[test]
fn test_parallel_convert_then_combine() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sources = raw_files(&dir, &["0", "10", "20"])?;
    let save_dir = dir.path().join("out");

    let config = ConvertConfig {
        parallel: true,
        workers: 2,
        combine: Some(CombineConfig {
            remove_sources: true,
            ..CombineConfig::default()
        }),
        ..ConvertConfig::default()
    };
    let report = Converter::new(FakeParser { pings: 10 }, &sources)
        .with_params(params())
        .with_config(config)
        .convert(Some(&save_dir))?;

    assert_eq!(report.failed_count(), 0);
    let combined = match report.combine {
        Some(CombineOutcome::Combined(combined)) => combined,
        other => panic!("unexpected combine outcome: {other:?}"),
    };
    assert_eq!(combined.outputs[0].path, save_dir.join("D1[combined].zarr"));
    assert_eq!(combined.deletion.removed.len(), 3);
    assert!(!save_dir.join("D1.zarr").exists());

    let store = Store::open(save_dir.join("D1[combined].zarr"))?;
    let beam = store.group("Beam")?;
    assert_eq!(
        beam.array("ping_time")?.read()?,
        ArrayData::Int64((0..30).collect())
    );
    assert_eq!(beam.array("backscatter_r")?.shape(), &[30, 2, 6]);
    Ok(())
}

#[test]
fn test_output_paths() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let one = raw_files(&dir, &["0"])?;
    let converter = Converter::new(FakeParser { pings: 1 }, &one);
    let target = dir.path().join("custom.zarr");
    assert_eq!(converter.output_paths(Some(&target))?, vec![target.clone()]);

    let two = raw_files(&dir, &["0", "1"])?;
    let converter = Converter::new(FakeParser { pings: 1 }, &two);
    assert!(matches!(
        converter.output_paths(Some(&target)),
        Err(ConvertError::InvalidSavePath(_))
    ));
    assert_eq!(
        converter.output_paths(Some(&dir.path().join("out")))?,
        vec![dir.path().join("out/D1.zarr"), dir.path().join("out/D2.zarr")]
    );

    let empty: [&Path; 0] = [];
    assert!(matches!(
        Converter::new(FakeParser { pings: 1 }, &empty).convert(None),
        Err(ConvertError::NoSources)
    ));
    Ok(())
}

#[test]
fn test_params_deserialize_with_extra_keys() -> Result<(), serde_json::Error> {
    let params: ConversionParams = serde_json::from_value(json!({
        "platform_name": "OOI",
        "platform_code_ICES": "3164",
        "survey_name": "Endurance",
        "deployment": "CE04",
    }))?;

    assert_eq!(params.platform_name.as_deref(), Some("OOI"));
    assert_eq!(params.platform_code_ices.as_deref(), Some("3164"));
    assert_eq!(params.platform_attributes().len(), 2);

    let root = params.root_attributes();
    assert_eq!(root.get("survey_name"), Some(&json!("Endurance")));
    assert_eq!(root.get("deployment"), Some(&json!("CE04")));
    Ok(())
}
