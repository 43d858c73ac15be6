//! DUMP transfer against a scripted device

mod common;

use acclog_core::datalog::decode;
use acclog_core::protocol::{
    dump, dump_to_file, negotiate, DumpEvent, DumpTransfer, HeaderSync, ProtocolError,
};
use common::{dump_reply, fast_config, v2_log, MockOpener, Script};
use pretty_assertions::assert_eq;

const PORT: &str = "/dev/ttyACM0";
const BAUD: u32 = 115_200;

fn opener_with(reply: Vec<u8>) -> MockOpener {
    MockOpener::new().device(BAUD, Script::responsive().on("DUMP", &reply))
}

#[test]
fn test_dump_plain() {
    let payload = v2_log(50);
    let opener = opener_with(dump_reply(&payload, b"", b"\nDONE\n"));
    let mut out = Vec::new();

    let session = dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).unwrap();

    assert_eq!(out, payload);
    assert_eq!(session.total_bytes, payload.len() as u64);
    assert_eq!(session.device_now_ms, Some(123_456));
    assert_eq!(session.baud, BAUD);
    assert_eq!(
        session.sync,
        Some(HeaderSync::Aligned {
            preamble: 0,
            magic_len: 7
        })
    );
    assert_eq!(opener.journal().live_links, 0);
}

#[test]
fn test_dump_discards_preamble() {
    let payload = v2_log(20);
    let preamble = b"\r\n[boot] fs mounted\r\n\x00\xff";
    let opener = opener_with(dump_reply(&payload, preamble, b"\nDONE\n"));
    let mut out = Vec::new();

    let session = dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).unwrap();

    assert_eq!(out, payload);
    assert_eq!(
        session.sync,
        Some(HeaderSync::Aligned {
            preamble: preamble.len(),
            magic_len: 7
        })
    );
    let log = decode(&out).unwrap();
    assert_eq!(log.samples.len(), 20);
}

#[test]
fn test_dump_events_in_order() {
    let payload = v2_log(40);
    let opener = opener_with(dump_reply(&payload, b"", b"\nDONE\n"));
    let mut config = fast_config(&[BAUD]);
    config.chunk_size = 100;

    let (mut link, _) = negotiate(&opener, PORT, &config).unwrap();
    let mut out = Vec::new();
    let events: Vec<DumpEvent> = DumpTransfer::new(&mut link, &mut out, &config)
        .collect::<Result<_, _>>()
        .unwrap();

    let total = payload.len() as u64;
    assert_eq!(
        events[0],
        DumpEvent::Accepted {
            total_bytes: total,
            device_now_ms: Some(123_456)
        }
    );
    assert!(matches!(events[1], DumpEvent::Synced(HeaderSync::Aligned { .. })));

    let progress: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            DumpEvent::Progress { done, total: t } => {
                assert_eq!(*t, total);
                Some(*done)
            }
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.first(), Some(&7));
    assert_eq!(progress.last(), Some(&total));
    // 7 magic bytes, then ceil((544 - 7) / 100) chunks
    assert_eq!(progress.len(), 1 + 6);

    assert!(matches!(events.last(), Some(DumpEvent::Completed(_))));
    assert_eq!(out, payload);
}

#[test]
fn test_dump_empty_log() {
    let opener = opener_with(b"OK 0 999\n\nDONE\n".to_vec());
    let mut config = fast_config(&[BAUD]);
    config.chunk_size = 8;

    let (mut link, _) = negotiate(&opener, PORT, &config).unwrap();
    let mut out = Vec::new();
    let events: Vec<DumpEvent> = DumpTransfer::new(&mut link, &mut out, &config)
        .collect::<Result<_, _>>()
        .unwrap();

    assert!(out.is_empty());
    assert_eq!(events.len(), 2);
    assert!(!events.iter().any(|e| matches!(e, DumpEvent::Synced(_))));
    match &events[1] {
        DumpEvent::Completed(session) => {
            assert_eq!(session.total_bytes, 0);
            assert_eq!(session.device_now_ms, Some(999));
            assert_eq!(session.sync, None);
        }
        other => panic!("expected Completed, got {:?}", other),
    }
}

#[test]
fn test_dump_skips_blank_trailer_lines() {
    let payload = v2_log(3);
    let opener = opener_with(dump_reply(&payload, b"", b"\n\r\n\nDONE\r\n"));
    let mut out = Vec::new();
    assert!(dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).is_ok());
    assert_eq!(out, payload);
}

#[test]
fn test_dump_rejects_bad_trailer() {
    let payload = v2_log(3);
    let opener = opener_with(dump_reply(&payload, b"", b"\nERROR\n"));
    let mut out = Vec::new();
    let err = dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).unwrap_err();
    assert!(matches!(err, ProtocolError::ProtocolViolation(_)), "{:?}", err);
    assert_eq!(opener.journal().live_links, 0);
}

#[test]
fn test_dump_missing_trailer_times_out() {
    let payload = v2_log(3);
    let opener = opener_with(dump_reply(&payload, b"", b""));
    let mut out = Vec::new();
    let err = dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout(_)), "{:?}", err);
}

#[test]
fn test_dump_rejects_err_reply() {
    let opener = opener_with(b"ERR\n".to_vec());
    let mut out = Vec::new();
    let err = dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).unwrap_err();
    assert!(matches!(err, ProtocolError::ProtocolViolation(_)), "{:?}", err);
    assert!(out.is_empty());
}

#[test]
fn test_dump_short_payload_times_out() {
    let payload = v2_log(10);
    let mut reply = format!("OK {}\n", payload.len() + 500).into_bytes();
    reply.extend_from_slice(&payload);
    let opener = opener_with(reply);
    let mut out = Vec::new();

    let err = dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout(_)), "{:?}", err);
    // everything that did arrive was kept
    assert_eq!(out, payload);
    assert_eq!(opener.journal().live_links, 0);
}

#[test]
fn test_dump_silent_after_ok_times_out() {
    let opener = opener_with(b"OK 128\n".to_vec());
    let mut out = Vec::new();
    let err = dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout(_)), "{:?}", err);
}

#[test]
fn test_dump_best_effort_without_magic() {
    let payload = vec![b'z'; 40];
    let opener = opener_with(dump_reply(&payload, b"", b"\nDONE\n"));
    let mut config = fast_config(&[BAUD]);
    config.sync_max_reads = 16;
    let mut out = Vec::new();

    let session = dump(&opener, PORT, &mut out, &config).unwrap();
    assert_eq!(out, payload);
    assert_eq!(
        session.sync,
        Some(HeaderSync::BestEffort {
            scanned: 16,
            magic_offset: None
        })
    );
}

#[test]
fn test_dump_best_effort_aligns_to_bare_magic() {
    // "ACCLOG" without the NUL padding never completes the sync window
    let mut body = b"ACCLOG".to_vec();
    body.extend_from_slice(&[1u8; 26]);
    let mut reply = format!("OK {}\n", body.len()).into_bytes();
    reply.extend_from_slice(b"##");
    reply.extend_from_slice(&body);
    reply.extend_from_slice(b"\nDONE\n");

    let opener = opener_with(reply);
    let mut config = fast_config(&[BAUD]);
    config.sync_max_reads = 12;
    let mut out = Vec::new();

    let session = dump(&opener, PORT, &mut out, &config).unwrap();
    assert_eq!(
        session.sync,
        Some(HeaderSync::BestEffort {
            scanned: 12,
            magic_offset: Some(2)
        })
    );
    assert!(out.starts_with(b"ACCLOG"));
    assert_eq!(out.len(), body.len());
    assert_eq!(out, body);
}

/// Rows of six big-endian channels with no header in front
fn headerless_payload(rows: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    for i in 0..rows {
        for ch in 0..6i16 {
            buf.extend_from_slice(&(i as i16 * 100 - ch).to_be_bytes());
        }
    }
    buf
}

#[test]
fn test_dump_headerless_keeps_trailer() {
    let payload = headerless_payload(10);
    assert_eq!(payload.len(), 120);
    let opener = opener_with(dump_reply(&payload, b"", b"\nDONE\n"));
    let mut out = Vec::new();

    let session = dump(&opener, PORT, &mut out, &fast_config(&[BAUD])).unwrap();

    assert_eq!(out, payload);
    assert_eq!(session.total_bytes, 120);
    assert_eq!(session.device_now_ms, Some(123_456));
    assert_eq!(
        session.sync,
        Some(HeaderSync::BestEffort {
            scanned: 120,
            magic_offset: None
        })
    );

    let log = decode(&out).unwrap();
    assert!(log.source.is_synthesized());
    assert_eq!(log.samples.len(), 10);
}

#[test]
fn test_dump_headerless_events() {
    let payload = headerless_payload(3);
    let opener = opener_with(dump_reply(&payload, b"", b"\r\nDONE\r\n"));
    let config = fast_config(&[BAUD]);

    let (mut link, _) = negotiate(&opener, PORT, &config).unwrap();
    let mut out = Vec::new();
    let events: Vec<DumpEvent> = DumpTransfer::new(&mut link, &mut out, &config)
        .collect::<Result<_, _>>()
        .unwrap();

    let total = payload.len() as u64;
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events[1],
        DumpEvent::Synced(HeaderSync::BestEffort { .. })
    ));
    assert_eq!(events[2], DumpEvent::Progress { done: total, total });
    assert!(matches!(events[3], DumpEvent::Completed(_)));
    assert_eq!(out, payload);
}

#[test]
fn test_dump_never_uses_failed_baud() {
    let payload = v2_log(5);
    let opener = MockOpener::new()
        .device(921_600, Script::new())
        .device(
            BAUD,
            Script::responsive().on("DUMP", &dump_reply(&payload, b"", b"\nDONE\n")),
        );
    let mut out = Vec::new();

    let session = dump(&opener, PORT, &mut out, &fast_config(&[921_600, BAUD])).unwrap();
    assert_eq!(session.baud, BAUD);

    let journal = opener.journal();
    assert!(journal.commands_at(921_600).iter().all(|c| c == "PING"));
    assert_eq!(journal.commands_at(BAUD), vec!["PING", "DUMP"]);
}

#[test]
fn test_dump_to_file_creates_directories() {
    let payload = v2_log(8);
    let opener = opener_with(dump_reply(&payload, b"noise", b"\nDONE\n"));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("captures").join("ACCLOG.bin");

    let session = dump_to_file(&opener, PORT, &path, &fast_config(&[BAUD])).unwrap();
    assert_eq!(session.total_bytes, payload.len() as u64);
    assert_eq!(std::fs::read(&path).unwrap(), payload);
}
