use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_tuitiond");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tuitiond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn result_of(resp: &serde_json::Value, method: &str) -> serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        resp
    );
    resp.get("result").cloned().expect("result")
}

struct Fixture {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Fixture {
    fn new(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut fx = Fixture {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        fx.call(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        fx
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let resp = request(&mut self.stdin, &mut self.reader, &id, method, params);
        result_of(&resp, method)
    }

    fn finish(self) {
        drop(self.stdin);
        let mut child = self.child;
        let _ = child.wait();
    }
}

fn day_entry<'a>(result: &'a serde_json::Value, date: &str) -> &'a serde_json::Value {
    result
        .get("days")
        .and_then(|v| v.as_array())
        .expect("days array")
        .iter()
        .find(|d| d["date"] == date)
        .expect("day entry")
}

#[test]
fn marking_attendance_reconciles_the_class_log() {
    let mut fx = Fixture::new("tuitiond-reconcile");

    let created = fx.call(
        "tuitions.create",
        json!({ "name": "Grade 10 Math", "teachingDays": ["monday", "wednesday", "friday"] }),
    );
    let tuition_id = created["tuitionId"].as_str().expect("tuitionId").to_string();

    let mut student_ids = Vec::new();
    for name in ["Aisha", "Bilal", "Chandra"] {
        let s = fx.call(
            "students.create",
            json!({ "tuitionId": tuition_id, "name": name, "monthlyFee": 1200.0 }),
        );
        student_ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }

    // One student present on a scheduled Monday makes the class conducted.
    let marked = fx.call(
        "attendance.mark",
        json!({
            "tuitionId": tuition_id,
            "studentId": student_ids[0],
            "date": "2024-05-06",
            "isPresent": true,
            "today": "2024-05-15"
        }),
    );
    assert_eq!(marked["wasConducted"], json!(true));
    assert_eq!(marked["dayStatus"], json!("conducted"));
    assert_eq!(marked["stats"]["conducted"], json!(1));
    assert_eq!(marked["stats"]["scheduled"], json!(14));
    assert_eq!(marked["stats"]["missed"], json!(5));
    assert_eq!(marked["stats"]["remaining"], json!(8));

    // The reconciler created a log row with the derived flag and no topic.
    let logs = fx.call(
        "classLogs.monthOpen",
        json!({ "tuitionId": tuition_id, "month": "2024-05", "today": "2024-05-15" }),
    );
    let log_rows = logs["logs"].as_array().expect("logs array");
    assert_eq!(log_rows.len(), 1);
    assert_eq!(log_rows[0]["date"], json!("2024-05-06"));
    assert_eq!(log_rows[0]["wasConducted"], json!(true));
    assert!(log_rows[0]["topicCovered"].is_null());

    // Tutor writes up the class; the topic must survive later syncs.
    fx.call(
        "classLogs.upsert",
        json!({
            "tuitionId": tuition_id,
            "date": "2024-05-06",
            "wasConducted": true,
            "topicCovered": "Algebra basics",
            "today": "2024-05-15"
        }),
    );

    // Another student marked absent changes nothing: one present is enough.
    let marked = fx.call(
        "attendance.mark",
        json!({
            "tuitionId": tuition_id,
            "studentId": student_ids[1],
            "date": "2024-05-06",
            "isPresent": false,
            "today": "2024-05-15"
        }),
    );
    assert_eq!(marked["wasConducted"], json!(true));

    let logs = fx.call(
        "classLogs.monthOpen",
        json!({ "tuitionId": tuition_id, "month": "2024-05", "today": "2024-05-15" }),
    );
    let log_rows = logs["logs"].as_array().expect("logs array");
    assert_eq!(log_rows.len(), 1);
    assert_eq!(log_rows[0]["topicCovered"], json!("Algebra basics"));

    // Everyone absent flips the derivation; the past date becomes missed
    // and the log updates in place, keeping the topic.
    let cleared = fx.call(
        "attendance.markAllAbsent",
        json!({
            "tuitionId": tuition_id,
            "studentIds": student_ids,
            "date": "2024-05-06",
            "today": "2024-05-15"
        }),
    );
    assert_eq!(cleared["wasConducted"], json!(false));
    assert_eq!(cleared["dayStatus"], json!("missed"));
    assert_eq!(cleared["stats"]["conducted"], json!(0));
    assert_eq!(cleared["stats"]["missed"], json!(6));

    let logs = fx.call(
        "classLogs.monthOpen",
        json!({ "tuitionId": tuition_id, "month": "2024-05", "today": "2024-05-15" }),
    );
    let log_rows = logs["logs"].as_array().expect("logs array");
    assert_eq!(log_rows.len(), 1);
    assert_eq!(log_rows[0]["wasConducted"], json!(false));
    assert_eq!(log_rows[0]["topicCovered"], json!("Algebra basics"));

    // Bulk present on a future Monday; running it twice stays at one log
    // row per date.
    for _ in 0..2 {
        let bulk = fx.call(
            "attendance.markAllPresent",
            json!({
                "tuitionId": tuition_id,
                "studentIds": student_ids,
                "date": "2024-05-20",
                "today": "2024-05-15"
            }),
        );
        assert_eq!(bulk["wasConducted"], json!(true));
        assert_eq!(bulk["dayStatus"], json!("conducted"));
        assert_eq!(bulk["stats"]["conducted"], json!(1));
    }

    let logs = fx.call(
        "classLogs.monthOpen",
        json!({ "tuitionId": tuition_id, "month": "2024-05", "today": "2024-05-15" }),
    );
    assert_eq!(logs["logs"].as_array().expect("logs array").len(), 2);

    // The attendance month view carries both raw signals per day.
    let month = fx.call(
        "attendance.monthOpen",
        json!({ "tuitionId": tuition_id, "month": "2024-05", "today": "2024-05-15" }),
    );
    let day = day_entry(&month, "2024-05-06");
    assert_eq!(day["conductedByAttendance"], json!(false));
    assert_eq!(day["logConducted"], json!(false));
    assert_eq!(day["status"], json!("missed"));
    let day = day_entry(&month, "2024-05-20");
    assert_eq!(day["conductedByAttendance"], json!(true));
    assert_eq!(day["status"], json!("conducted"));

    fx.finish();
}
