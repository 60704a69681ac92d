use jqs::error::JqsError;
use jqs::store::{JobDir, JobState, StateStore};
use jqs::submit::submit;
use tempfile::TempDir;

fn write_script(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_submit_with_defaults() {
    let root = TempDir::new().unwrap();
    let scripts = TempDir::new().unwrap();
    let store = StateStore::open(root.path()).unwrap();
    let script = write_script(&scripts, "hello.sh", "#!/bin/bash\necho hi\n");

    let record = submit(&store, &script).unwrap();

    assert_eq!(record.jobid, 1);
    assert_eq!(record.name, "hello");
    assert_eq!(record.cores, 1);
    assert_eq!(record.mem_mb, 512);
    assert_eq!(record.state, JobState::Queued);
    assert!(record.script_path.is_absolute());
    assert!(record.workdir.is_absolute());
    assert_eq!(record.stdout_path, record.workdir.join("stdout.log"));
    assert_eq!(record.stderr_path, record.workdir.join("stderr.log"));
    assert!(record.time_limit_sec.is_none());
    assert!(!record.cancel_requested);

    // The record landed in queue/ and decodes back.
    let loaded = store.load(JobDir::Queue, 1).unwrap();
    assert_eq!(loaded, record);
}

#[test]
fn test_submit_reads_directives() {
    let root = TempDir::new().unwrap();
    let scripts = TempDir::new().unwrap();
    let store = StateStore::open(root.path()).unwrap();
    let script = write_script(
        &scripts,
        "train.sh",
        "#!/bin/bash\n#JS name=training cores=4 mem_mb=8192 time_limit=02:00:00\n#JS workdir=/scratch/exp\nsleep 10\n",
    );

    let record = submit(&store, &script).unwrap();
    assert_eq!(record.name, "training");
    assert_eq!(record.cores, 4);
    assert_eq!(record.mem_mb, 8192);
    assert_eq!(record.time_limit_sec, Some(7200));
    assert_eq!(record.workdir, std::path::PathBuf::from("/scratch/exp"));
    assert_eq!(
        record.stdout_path,
        std::path::PathBuf::from("/scratch/exp/stdout.log")
    );
}

#[test]
fn test_submit_expands_output_templates() {
    let root = TempDir::new().unwrap();
    let scripts = TempDir::new().unwrap();
    let store = StateStore::open(root.path()).unwrap();
    let script = write_script(
        &scripts,
        "job.sh",
        "#JS name=sim stdout=%x-%j.out stderr=logs/%j.err\necho hi\n",
    );

    let record = submit(&store, &script).unwrap();
    assert_eq!(record.stdout_path, record.workdir.join("sim-1.out"));
    assert_eq!(record.stderr_path, record.workdir.join("logs/1.err"));
}

#[test]
fn test_submit_rejects_bad_directives_without_a_record() {
    let root = TempDir::new().unwrap();
    let scripts = TempDir::new().unwrap();
    let store = StateStore::open(root.path()).unwrap();
    let script = write_script(&scripts, "bad.sh", "#JS cores=zero\necho hi\n");

    let err = submit(&store, &script).unwrap_err();
    assert!(matches!(err, JqsError::BadDirective { .. }));
    assert!(store.list(JobDir::Queue).unwrap().is_empty());
    // The jobid counter must not burn an id for a rejected script.
    assert_eq!(
        std::fs::read_to_string(root.path().join("jobid_counter")).unwrap(),
        "0"
    );
}

#[test]
fn test_submit_missing_script_is_io_error() {
    let root = TempDir::new().unwrap();
    let store = StateStore::open(root.path()).unwrap();
    let err = submit(&store, std::path::Path::new("/nonexistent/script.sh")).unwrap_err();
    assert!(matches!(err, JqsError::Io(_)));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_submitted_jobids_increase_across_scripts() {
    let root = TempDir::new().unwrap();
    let scripts = TempDir::new().unwrap();
    let store = StateStore::open(root.path()).unwrap();

    let mut ids = Vec::new();
    for i in 0..4 {
        let script = write_script(&scripts, &format!("s{i}.sh"), "echo hi\n");
        ids.push(submit(&store, &script).unwrap().jobid);
    }
    assert_eq!(ids, vec![1, 2, 3, 4]);
}
