mod common;

use chrono::Local;
use common::{blank_image, displaced_target, section_image};
use cross_section_aligner::batch::{BatchRunner, LogRecord, OutputLayout, Progress, RunHeader, RunLog};
use cross_section_aligner::config::Config;
use cross_section_aligner::data::PairSource;
use cross_section_aligner::pipeline::ThresholdGrid;
use cross_section_aligner::{Aligner, RigidTransform, ScaleBounds};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use uuid::Uuid;

const SIZE: u32 = 256;

struct Fixture {
    _dir: TempDir,
    reference: PathBuf,
    target: PathBuf,
    work: PathBuf,
}

/// `aligned.png` is a displaced copy, `blank.png` has nothing to match, and
/// `orphan.png` has no target.
fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let reference = dir.path().join("reference");
    let target = dir.path().join("sections");
    let work = dir.path().join("work");
    for path in [&reference, &target, &work] {
        fs::create_dir_all(path).unwrap();
    }

    let scene = section_image(SIZE, 41);
    let truth = RigidTransform::about_center(3.0, 1.01, SIZE as f64 / 2.0, SIZE as f64 / 2.0);
    scene.save(reference.join("aligned.png")).unwrap();
    displaced_target(&scene, &truth)
        .save(target.join("aligned.png"))
        .unwrap();

    section_image(SIZE, 42).save(reference.join("blank.png")).unwrap();
    blank_image(SIZE).save(target.join("blank.png")).unwrap();

    section_image(SIZE, 43).save(reference.join("orphan.png")).unwrap();
    fs::write(target.join("broken.png"), b"not an image").unwrap();
    fs::write(reference.join("broken.png"), b"not an image either").unwrap();

    Fixture {
        _dir: dir,
        reference,
        target,
        work,
    }
}

fn config(overlay: bool) -> Config {
    let mut config = Config::default();
    config.search.threshold_max_change = 4;
    config.output.overlay = overlay;
    config
}

fn run_batch(fixture: &Fixture, out: &Path, config: Config, jobs: usize) -> (Vec<String>, Vec<Progress>) {
    let source = PairSource::new(&fixture.reference, &fixture.target);
    source.validate().unwrap();
    let listing = source.list().unwrap();

    let layout = OutputLayout::prepare(Some(out), out, config.output.overlay).unwrap();
    let mut log = RunLog::create(Some(fixture.work.as_path()), &fixture.work, "sections_Log test.txt").unwrap();

    let aligner = Aligner::new(config);
    let search = aligner.config().search.clone();
    log.write_header(&RunHeader {
        command_line: "align batch".to_string(),
        working_directory: fixture.work.clone(),
        reference_directory: fixture.reference.clone(),
        target_directory: fixture.target.clone(),
        output_directory: out.to_path_buf(),
        reference_threshold: search.reference_threshold,
        target_threshold: search.target_threshold,
        reference_thresholds: ThresholdGrid::new(search.reference_threshold, 2, 4).thresholds().collect(),
        target_thresholds: ThresholdGrid::new(search.target_threshold, 2, 4).thresholds().collect(),
        scale_bounds: ScaleBounds::default(),
        run_id: Uuid::new_v4(),
        started: Local::now(),
    })
    .unwrap();

    let updates = Mutex::new(Vec::new());
    let runner = BatchRunner::new(aligner, layout).with_jobs(jobs);
    let summary = runner
        .run(&listing, &mut log, |p| updates.lock().unwrap().push(p.clone()))
        .unwrap();
    assert_eq!(summary.aligned, 1);
    assert_eq!(summary.unsuccessful, 1);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.skipped, 1);

    let path = log.finish(&Local::now()).unwrap();
    let text = fs::read_to_string(path).unwrap();
    let records = text
        .lines()
        .filter(|line| !line.starts_with("    "))
        .map(str::to_string)
        .collect();
    (records, updates.into_inner().unwrap())
}

#[test]
fn test_batch_writes_outputs_and_records_in_order() {
    let fixture = fixture();
    let out = fixture.work.join("out");
    let (records, progress) = run_batch(&fixture, &out, config(true), 1);

    assert_eq!(records.len(), 3);
    assert!(records[0].starts_with("aligned.png; Used threshold reference image: 128; Used threshold target image: 128; Rotation angle: "));
    assert_eq!(records[1], "blank.png alignment unsuccessful");
    assert!(records[2].starts_with("Error aligning image broken.png, error: "));

    assert!(out.join("aligned.png").is_file());
    assert!(out.join("overlap").join("aligned.png").is_file());
    assert!(!out.join("blank.png").exists());
    assert!(!out.join("overlap").join("blank.png").exists());
    assert!(!out.join("orphan.png").exists());

    let completed: Vec<usize> = progress.iter().map(|p| p.completed).collect();
    assert_eq!(completed, vec![1, 2, 3]);
    assert!(progress.iter().all(|p| p.total == 3));
}

#[test]
fn test_suppressed_overlay_writes_no_overlap_images() {
    let fixture = fixture();
    let out = fixture.work.join("plain");
    run_batch(&fixture, &out, config(false), 1);

    assert!(out.join("aligned.png").is_file());
    assert!(!out.join("overlap").exists());
}

#[test]
fn test_rerun_and_parallel_run_are_identical() {
    let fixture = fixture();
    let first_out = fixture.work.join("first");
    let second_out = fixture.work.join("second");

    let (first_records, _) = run_batch(&fixture, &first_out, config(true), 1);
    let (second_records, _) = run_batch(&fixture, &second_out, config(true), 3);

    assert_eq!(first_records, second_records);
    assert_eq!(
        fs::read(first_out.join("aligned.png")).unwrap(),
        fs::read(second_out.join("aligned.png")).unwrap()
    );
    assert_eq!(
        fs::read(first_out.join("overlap").join("aligned.png")).unwrap(),
        fs::read(second_out.join("overlap").join("aligned.png")).unwrap()
    );
}

#[test]
fn test_record_reports_the_accepted_transform() {
    let fixture = fixture();
    let out = fixture.work.join("single");
    let listing = PairSource::new(&fixture.reference, &fixture.target).list().unwrap();
    let layout = OutputLayout::prepare(Some(out.as_path()), &out, true).unwrap();
    let runner = BatchRunner::new(Aligner::new(config(true)), layout);

    let aligned = listing
        .pairs
        .iter()
        .find(|p| p.identifier == "aligned.png")
        .unwrap();
    match runner.process_pair(aligned) {
        LogRecord::Aligned {
            rotation_degrees,
            scale_factor,
            ..
        } => {
            assert!((rotation_degrees - 3.0).abs() < 0.5, "rotation {}", rotation_degrees);
            assert!((scale_factor - 1.01).abs() < 0.01, "scale {}", scale_factor);
        }
        other => panic!("unexpected record {}", other),
    }
}
