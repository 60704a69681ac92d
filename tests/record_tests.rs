use std::path::PathBuf;

use jqs::store::paths::{parse_record_filename, record_filename};
use jqs::store::record::{decode, encode, JobRecord, JobState};
use jqs::store::JobDir;

fn sample_record() -> JobRecord {
    JobRecord {
        jobid: 42,
        name: "simulation".to_string(),
        script_path: PathBuf::from("/home/u/run.sh"),
        workdir: PathBuf::from("/home/u/project"),
        cores: 4,
        mem_mb: 2048,
        stdout_path: PathBuf::from("/home/u/project/stdout.log"),
        stderr_path: PathBuf::from("/home/u/project/stderr.log"),
        time_limit_sec: Some(3600),
        state: JobState::Running,
        submit_time: 1_722_000_000,
        start_time: Some(1_722_000_005),
        end_time: None,
        supervisor_handle: Some("jqs-job-42".to_string()),
        exit_code: None,
        cancel_requested: false,
        reason: None,
    }
}

#[test]
fn test_round_trip_full_record() {
    let record = sample_record();
    let decoded = decode(&encode(&record)).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn test_round_trip_terminal_record() {
    let mut record = sample_record();
    record.state = JobState::Failed;
    record.end_time = Some(1_722_000_100);
    record.exit_code = Some(137);
    record.cancel_requested = true;
    record.reason = Some("LaunchError".to_string());
    let decoded = decode(&encode(&record)).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn test_round_trip_awkward_strings() {
    let mut record = sample_record();
    record.name = r#"weird "name" with \ slashes"#.to_string();
    record.supervisor_handle = Some(String::new());
    let decoded = decode(&encode(&record)).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn test_decode_tolerates_unknown_keys_and_comments() {
    let mut body = encode(&sample_record());
    body.push_str("\n# a comment line\nfuture_field=\"whatever\"\n\n");
    let decoded = decode(&body).unwrap();
    assert_eq!(decoded, sample_record());
}

#[test]
fn test_decode_is_order_independent() {
    let body = encode(&sample_record());
    let mut lines: Vec<&str> = body.lines().collect();
    lines.reverse();
    let decoded = decode(&lines.join("\n")).unwrap();
    assert_eq!(decoded, sample_record());
}

#[test]
fn test_missing_cancel_flag_defaults_to_false() {
    let body = encode(&sample_record());
    let without: String = body
        .lines()
        .filter(|l| !l.starts_with("cancel_requested="))
        .collect::<Vec<_>>()
        .join("\n");
    let decoded = decode(&without).unwrap();
    assert!(!decoded.cancel_requested);
}

#[test]
fn test_missing_mandatory_key_fails() {
    let body = encode(&sample_record());
    let without: String = body
        .lines()
        .filter(|l| !l.starts_with("jobid="))
        .collect::<Vec<_>>()
        .join("\n");
    assert!(decode(&without).is_err());
}

#[test]
fn test_ill_typed_values_fail() {
    for (key, bad) in [
        ("cores", "cores=\"four\""),
        ("state", "state=RUNNING"),
        ("cancel_requested", "cancel_requested=\"yes\""),
        ("submit_time", "submit_time=soon"),
    ] {
        let body: String = encode(&sample_record())
            .lines()
            .map(|l| {
                if l.starts_with(&format!("{key}=")) {
                    bad.to_string()
                } else {
                    l.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        assert!(decode(&body).is_err(), "expected failure for {bad:?}");
    }
}

#[test]
fn test_garbage_line_fails() {
    assert!(decode("this is not a record\n").is_err());
    assert!(decode("=value\n").is_err());
}

#[test]
fn test_unknown_state_fails() {
    let body = encode(&sample_record()).replace("state=\"RUNNING\"", "state=\"SLEEPING\"");
    assert!(decode(&body).is_err());
}

#[test]
fn test_state_directory_agreement() {
    assert_eq!(JobState::Queued.expected_dir(), JobDir::Queue);
    assert_eq!(JobState::Running.expected_dir(), JobDir::Running);
    for terminal in [JobState::Finished, JobState::Cancelled, JobState::Failed] {
        assert_eq!(terminal.expected_dir(), JobDir::Finished);
        assert!(terminal.is_terminal());
    }
    assert!(!JobState::Queued.is_terminal());
    assert!(!JobState::Running.is_terminal());
}

#[test]
fn test_record_filenames_sort_by_jobid() {
    assert_eq!(record_filename(7), "00000007.job");
    let mut names = vec![record_filename(10), record_filename(2), record_filename(1)];
    names.sort();
    assert_eq!(names, vec!["00000001.job", "00000002.job", "00000010.job"]);
}

#[test]
fn test_parse_record_filename() {
    assert_eq!(parse_record_filename("00000042.job"), Some(42));
    assert_eq!(parse_record_filename("00000042.job.tmp"), None);
    assert_eq!(parse_record_filename("notajob.job"), None);
    assert_eq!(parse_record_filename("00000042"), None);
}
