use std::time::Duration;

use server::startup::ShutdownSignals;

fn send_to_self(sig: &str) {
    let status = std::process::Command::new("kill")
        .args([format!("-{sig}"), std::process::id().to_string()])
        .status()
        .expect("kill runs");
    assert!(status.success());
}

// Both cases share one test so the handlers stay installed for every send.
#[tokio::test]
async fn term_and_int_both_request_shutdown() {
    let mut signals = ShutdownSignals::install().expect("install handlers");

    send_to_self("TERM");
    let got = tokio::time::timeout(Duration::from_secs(5), signals.recv()).await.expect("SIGTERM delivered");
    assert_eq!(got, "SIGTERM");

    send_to_self("INT");
    let got = tokio::time::timeout(Duration::from_secs(5), signals.recv()).await.expect("SIGINT delivered");
    assert_eq!(got, "SIGINT");
}
