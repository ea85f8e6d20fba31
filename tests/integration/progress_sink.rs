// Progress samples delivered during a session

use ffseg::config::SegmentConfig;
use ffseg::engine::progress::ThrottleHint;
use ffseg::engine::{
    AckGate, HttpProgressSink, ProgressSample, ProgressSink, SegmentScheduler, SyntheticEngine,
};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use crate::common::fixtures::*;

#[derive(Clone, Default)]
struct RecordingSink {
    samples: Arc<Mutex<Vec<ProgressSample>>>,
}

impl ProgressSink for RecordingSink {
    fn report(&mut self, sample: &ProgressSample) -> anyhow::Result<ThrottleHint> {
        self.samples.lock().unwrap().push(*sample);
        Ok(ThrottleHint::None)
    }
}

#[test]
fn test_samples_reach_the_sink() {
    let dir = TempDir::new().unwrap();
    let session = prepare(
        baseline_720p(30.0, ffseg::engine::Rational::new(1, 1)),
        main_31_caps(),
        options("3mbps", dir.path().join("clip")),
    )
    .unwrap();
    let config = SegmentConfig {
        progress_interval_ms: 0,
        ..SegmentConfig::default()
    };

    let sink = RecordingSink::default();
    let mut engine = SyntheticEngine::new(session.probe.clone());
    SegmentScheduler::new(&session, &config, AckGate::disabled())
        .with_progress_sink(Box::new(sink.clone()))
        .run(&mut engine)
        .unwrap();

    let samples = sink.samples.lock().unwrap();
    assert!(!samples.is_empty());
    assert!(
        samples
            .iter()
            .all(|s| (0.0..=100.0).contains(&s.progress_percent))
    );
    let last = samples.last().unwrap();
    assert!(last.progress_percent > 90.0);
}

/// Reads one HTTP request, returns its body, and answers with `reply`
fn serve_once(listener: TcpListener, reply: &'static str) -> thread::JoinHandle<String> {
    serve_raw(
        listener,
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.len(),
            reply
        ),
    )
}

/// Reads one HTTP request and writes `response` verbatim before closing
fn serve_raw(listener: TcpListener, response: String) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).unwrap();

        let mut stream = stream;
        stream.write_all(response.as_bytes()).unwrap();
        String::from_utf8(body).unwrap()
    })
}

#[test]
fn test_http_sink_posts_json_and_reads_throttle() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/progress", listener.local_addr().unwrap());
    let server = serve_once(listener, r#"{"throttle_ms":250}"#);

    let mut sink = HttpProgressSink::new(url).unwrap();
    let hint = sink
        .report(&ProgressSample {
            progress_percent: 42.0,
            speed_multiple: 1.5,
            eta_seconds: Some(12.0),
            throttle_hint: ThrottleHint::None,
        })
        .unwrap();

    assert_eq!(hint, ThrottleHint::Delay(Duration::from_millis(250)));
    let body = server.join().unwrap();
    assert!(body.contains("\"progressPercent\":42.0"));
    assert!(body.contains("\"etaSeconds\":12.0"));
}

#[test]
fn test_http_sink_reports_unreachable_consumer() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/progress", listener.local_addr().unwrap());
    drop(listener);

    let mut sink = HttpProgressSink::new(url).unwrap();
    let sample = ProgressSample {
        progress_percent: 1.0,
        speed_multiple: 1.0,
        eta_seconds: None,
        throttle_hint: ThrottleHint::None,
    };
    assert!(sink.report(&sample).is_err());
}

#[test]
fn test_http_sink_reports_truncated_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/progress", listener.local_addr().unwrap());
    // Promises more body than it sends, then hangs up
    let server = serve_raw(
        listener,
        "HTTP/1.1 200 OK\r\nContent-Length: 64\r\nConnection: close\r\n\r\n{\"throttle_ms\":"
            .to_string(),
    );

    let mut sink = HttpProgressSink::new(url).unwrap();
    let sample = ProgressSample {
        progress_percent: 10.0,
        speed_multiple: 2.0,
        eta_seconds: Some(30.0),
        throttle_hint: ThrottleHint::None,
    };
    let err = sink.report(&sample).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read progress reply"));
    server.join().unwrap();
}
