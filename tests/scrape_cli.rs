use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use articleforge::formats::ScrapeFrontMatter;
use predicates::prelude::*;

fn spawn_page_server() -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let addr = server.server_addr();
    let base_url = format!("http://{addr}");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let (status, body) = match request.url() {
                "/post" => (
                    200,
                    r#"<!doctype html>
<html>
  <head><title>Solar Basics</title></head>
  <body>
    <nav>Home | About</nav>
    <article>
      <h1>Solar Basics</h1>
      <p>Panels convert sunlight into electricity.</p>
      <img src="/img/roof.png" alt="Panels on a roof">
    </article>
  </body>
</html>"#,
                ),
                _ => (404, "not found"),
            };

            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"text/html; charset=utf-8"[..],
            )
            .expect("build header");
            let response = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(header);
            let _ = request.respond(response);
        }
    });

    (base_url, shutdown_tx, handle)
}

#[test]
fn scrape_writes_markdown_with_front_matter() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, handle) = spawn_page_server();
    let temp = tempfile::TempDir::new()?;
    let out_path = temp.path().join("reference.md");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("articleforge");
    cmd.args([
        "scrape",
        "--url",
        &format!("{base_url}/post"),
        "--out",
        out_path.to_str().unwrap(),
    ])
    .assert()
    .success();

    let markdown = fs::read_to_string(&out_path)?;
    let (front, body) = markdown
        .strip_prefix("---\n")
        .and_then(|rest| rest.split_once("---\n"))
        .expect("front matter");
    let front: ScrapeFrontMatter = serde_yaml::from_str(front)?;
    assert_eq!(front.title, "Solar Basics");
    assert_eq!(front.url, format!("{base_url}/post"));
    assert_eq!(front.images.len(), 1);
    assert_eq!(front.images[0].url, format!("{base_url}/img/roof.png"));
    assert_eq!(front.images[0].alt.as_deref(), Some("Panels on a roof"));
    assert!(body.contains("Panels convert sunlight into electricity."));
    assert!(!body.contains("Home | About"));

    // Second run without --force must not clobber the file.
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("articleforge");
    cmd.args([
        "scrape",
        "--url",
        &format!("{base_url}/post"),
        "--out",
        out_path.to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("already exists"));

    let _ = shutdown_tx.send(());
    let _ = handle.join();
    Ok(())
}

#[test]
fn scrape_reports_http_errors() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, handle) = spawn_page_server();
    let temp = tempfile::TempDir::new()?;
    let out_path = temp.path().join("missing.md");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("articleforge");
    cmd.args([
        "scrape",
        "--url",
        &format!("{base_url}/missing"),
        "--out",
        out_path.to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("404"));
    assert!(!out_path.exists());

    let _ = shutdown_tx.send(());
    let _ = handle.join();
    Ok(())
}
