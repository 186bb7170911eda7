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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("tuitiond-router-smoke");
    let bundle_out = workspace.join("smoke-backup.tuition.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "tuitions.create",
        json!({ "name": "Smoke Batch", "teachingDays": ["monday", "wednesday"] }),
    );
    let tuition_id = created
        .get("result")
        .and_then(|v| v.get("tuitionId"))
        .and_then(|v| v.as_str())
        .expect("tuitionId")
        .to_string();

    let _ = request(&mut stdin, &mut reader, "4", "tuitions.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "tuitions.update",
        json!({ "tuitionId": tuition_id, "patch": { "name": "Smoke Batch B" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "setup.get",
        json!({ "section": "attendance" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "attendance", "patch": { "showArchivedStudents": true } }),
    );

    let created_student = request(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({ "tuitionId": tuition_id, "name": "Smoke Student", "monthlyFee": 1500.0 }),
    );
    let student_id = created_student
        .get("result")
        .and_then(|v| v.get("studentId"))
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "tuitionId": tuition_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "students.update",
        json!({ "studentId": student_id, "patch": { "monthlyFee": 1750.0 } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "students.archive",
        json!({ "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "students.restore",
        json!({ "studentId": student_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "attendance.monthOpen",
        json!({ "tuitionId": tuition_id, "month": "2024-05", "today": "2024-05-15" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "attendance.mark",
        json!({
            "tuitionId": tuition_id,
            "studentId": student_id,
            "date": "2024-05-06",
            "isPresent": true,
            "today": "2024-05-15"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "attendance.markAllPresent",
        json!({
            "tuitionId": tuition_id,
            "studentIds": [student_id],
            "date": "2024-05-08",
            "today": "2024-05-15"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "attendance.markAllAbsent",
        json!({
            "tuitionId": tuition_id,
            "studentIds": [student_id],
            "date": "2024-05-08",
            "today": "2024-05-15"
        }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "classLogs.monthOpen",
        json!({ "tuitionId": tuition_id, "month": "2024-05", "today": "2024-05-15" }),
    );
    let upserted = request(
        &mut stdin,
        &mut reader,
        "18",
        "classLogs.upsert",
        json!({
            "tuitionId": tuition_id,
            "date": "2024-05-06",
            "wasConducted": true,
            "topicCovered": "Quadratic equations",
            "today": "2024-05-15"
        }),
    );
    let log_id = upserted
        .get("result")
        .and_then(|v| v.get("log"))
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("log id")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "classLogs.delete",
        json!({ "logId": log_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "fees.monthOpen",
        json!({ "tuitionId": tuition_id, "month": "2024-05" }),
    );
    let payment = request(
        &mut stdin,
        &mut reader,
        "21",
        "fees.record",
        json!({
            "tuitionId": tuition_id,
            "studentId": student_id,
            "month": "2024-05",
            "amount": 1750.0,
            "paidOn": "2024-05-03"
        }),
    );
    let payment_id = payment
        .get("result")
        .and_then(|v| v.get("paymentId"))
        .and_then(|v| v.as_str())
        .expect("paymentId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "fees.delete",
        json!({ "paymentId": payment_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "24",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy()
        }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "25",
        "tuitions.delete",
        json!({ "tuitionId": tuition_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
