//! End-to-end test of the golden-path scenario from spec.md §8: spawns the
//! real server binary (it forks its own root worker at startup, exactly as
//! in production) and drives it over HTTP with `reqwest`, the same way the
//! teacher's process-coordination tests spawn and talk to real subprocesses
//! rather than mocking the transport.

use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde_json::Value;

struct ServerProcess {
    child: Child,
    base_url: String,
}

impl ServerProcess {
    fn spawn(runtime_dir: &std::path::Path) -> Self {
        let port = 20000 + (std::process::id() % 10000);
        let bind = format!("127.0.0.1:{port}");

        let child = Command::new(env!("CARGO_BIN_EXE_session-server"))
            .arg("--bind")
            .arg(&bind)
            .arg("--runtime-dir")
            .arg(runtime_dir)
            .arg("--poll-timeout-ms")
            .arg("5")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn session-server binary");

        let base_url = format!("http://{bind}");
        wait_until_ready(&base_url);

        Self { child, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_until_ready(base_url: &str) {
    let client = reqwest::blocking::Client::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if client.get(format!("{base_url}/chats")).send().is_ok() {
            return;
        }
        if std::time::Instant::now() >= deadline {
            panic!("server never became reachable at {base_url}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn json(resp: reqwest::blocking::Response) -> Value {
    resp.json().expect("response is valid JSON")
}

#[test]
fn full_session_lifecycle_matches_the_golden_path() {
    let runtime_dir = tempfile::tempdir().unwrap();
    let server = ServerProcess::spawn(runtime_dir.path());
    let client = reqwest::blocking::Client::new();

    // 1. Start server -> GET /chats -> {"ids":[0]} (the root worker is seeded in).
    let chats = json(client.get(server.url("/chats")).send().unwrap());
    assert_eq!(chats["ids"], serde_json::json!([0]));

    // 2. POST /init "Hello" -> {"id": N > 0}; /chats now includes N.
    let init = json(client.post(server.url("/init")).body("Hello").send().unwrap());
    let session_n = init["id"].as_i64().expect("init succeeded with an id");
    assert!(session_n > 0);

    let chats = json(client.get(server.url("/chats")).send().unwrap());
    let ids: Vec<i64> = chats["ids"].as_array().unwrap().iter().map(|v| v.as_i64().unwrap()).collect();
    assert!(ids.contains(&session_n));

    // 3. POST /fork/N -> {"id": M != N}; /chats contains both.
    let fork = json(client.post(server.url(&format!("/fork/{session_n}"))).send().unwrap());
    let session_m = fork["id"].as_i64().expect("fork succeeded with an id");
    assert_ne!(session_m, session_n);

    let chats = json(client.get(server.url("/chats")).send().unwrap());
    let ids: Vec<i64> = chats["ids"].as_array().unwrap().iter().map(|v| v.as_i64().unwrap()).collect();
    assert!(ids.contains(&session_n));
    assert!(ids.contains(&session_m));

    // 4. POST /send/N "Say hi" -> {"sent": N}.
    let send = json(client.post(server.url(&format!("/send/{session_n}"))).body("Say hi").send().unwrap());
    assert_eq!(send["sent"], session_n);

    // 5. POST /interact/M -> non-empty reply; subsequent GET /update/M is drained.
    let interact =
        json(client.post(server.url(&format!("/interact/{session_m}"))).body("One word answer:").send().unwrap());
    let reply = interact["reply"].as_str().expect("interact succeeded with a reply");
    assert!(!reply.is_empty());

    let update = json(client.get(server.url(&format!("/update/{session_m}"))).send().unwrap());
    assert_eq!(update["update"], "");
    assert_eq!(update["finished"], true);

    // 6. POST /delete/N -> {"deleted": N}; subsequent /send/N is rejected; /chats drops N.
    let delete = json(client.post(server.url(&format!("/delete/{session_n}"))).send().unwrap());
    assert_eq!(delete["deleted"], session_n);

    let send_after_delete = json(client.post(server.url(&format!("/send/{session_n}"))).body("x").send().unwrap());
    assert_eq!(send_after_delete["error"], "Chat not found");

    let chats = json(client.get(server.url("/chats")).send().unwrap());
    let ids: Vec<i64> = chats["ids"].as_array().unwrap().iter().map(|v| v.as_i64().unwrap()).collect();
    assert!(!ids.contains(&session_n));
}

#[test]
fn fork_rejects_while_the_session_is_busy() {
    let runtime_dir = tempfile::tempdir().unwrap();
    let server = ServerProcess::spawn(runtime_dir.path());
    let client = reqwest::blocking::Client::new();

    let init = json(client.post(server.url("/init")).body("Hello").send().unwrap());
    let session = init["id"].as_i64().unwrap();

    // Submitting a long-running input makes the session busy; a fork issued
    // in that window must be rejected with the busy sentinel translated to
    // the documented error string rather than a bogus child id.
    client.post(server.url(&format!("/send/{session}"))).body("one two three four five six seven").send().unwrap();

    let fork = json(client.post(server.url(&format!("/fork/{session}"))).send().unwrap());
    assert_eq!(fork["error"], "Fork failed, model might be busy");
}

#[test]
fn unknown_session_ids_are_reported_as_not_found() {
    let runtime_dir = tempfile::tempdir().unwrap();
    let server = ServerProcess::spawn(runtime_dir.path());
    let client = reqwest::blocking::Client::new();

    let resp = json(client.post(server.url("/delete/999999")).send().unwrap());
    assert_eq!(resp["error"], "Chat not found");
}
